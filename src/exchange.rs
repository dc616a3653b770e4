//! Exchange - the state object shared by the ledger, the order book and the
//! flash-loan issuer.
//!
//! Public operations live next to the component they belong to
//! (`ledger.rs`, `order_book.rs`, `matching.rs`, `flash_loan.rs`); this
//! module owns the state, the event log and the atomic-call machinery.

use tracing::trace;

use crate::command::{Address, OutputEvent};
use crate::config::ExchangeConfig;
use crate::error::ExchangeError;
use crate::journal::{Journal, JournalCheckpoint, JournalEntry};
use crate::ledger::Ledger;
use crate::order_book::OrderBook;
use crate::token::{Erc20Bank, TokenBank};

/// Paired journal positions of the exchange and the token bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Checkpoint {
    journal: JournalCheckpoint,
    bank: usize,
}

/// Custody ledger, order table and token bank under one atomic boundary.
pub struct Exchange<B = Erc20Bank> {
    config: ExchangeConfig,
    pub(crate) ledger: Ledger,
    pub(crate) book: OrderBook,
    pub(crate) bank: B,
    pub(crate) journal: Journal,
    events: Vec<OutputEvent>,
    /// Current block timestamp
    timestamp: u64,
    /// Nesting depth of in-flight calls (> 1 only during re-entrancy)
    depth: u32,
}

impl<B: TokenBank> Exchange<B> {
    pub fn new(config: ExchangeConfig, bank: B) -> Self {
        Self {
            config,
            ledger: Ledger::new(),
            book: OrderBook::new(),
            bank,
            journal: Journal::new(),
            events: Vec::new(),
            timestamp: 0,
            depth: 0,
        }
    }

    /// Identity under which custodied tokens are held.
    #[inline]
    pub fn address(&self) -> Address {
        self.config.address
    }

    #[inline]
    pub fn fee_account(&self) -> Address {
        self.config.fee_account
    }

    #[inline]
    pub fn fee_percent(&self) -> u32 {
        self.config.fee_percent
    }

    #[inline]
    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Block timestamp stamped on orders and events.
    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Advance the block clock. Ignored while a call is in flight.
    pub fn set_timestamp(&mut self, timestamp: u64) {
        if self.depth == 0 {
            self.timestamp = timestamp;
        }
    }

    /// The token contracts.
    #[inline]
    pub fn tokens(&self) -> &B {
        &self.bank
    }

    /// Mutable access to the token contracts, for wallet-side actions such
    /// as approvals and loan repayment.
    ///
    /// Outside a call nothing can revert wallet writes, so the bank journal
    /// is committed first and holds at most the last batch of writes.
    #[inline]
    pub fn tokens_mut(&mut self) -> &mut B {
        if self.depth == 0 {
            self.bank.commit();
        }
        &mut self.bank
    }

    #[inline]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[inline]
    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    /// Append-only notification log since the last [`take_events`](Self::take_events).
    #[inline]
    pub fn events(&self) -> &[OutputEvent] {
        &self.events
    }

    /// Drain the notification log. Returns nothing while a call is in
    /// flight, since those events may still be reverted.
    pub fn take_events(&mut self) -> Vec<OutputEvent> {
        if self.depth > 0 {
            return Vec::new();
        }
        std::mem::take(&mut self.events)
    }

    /// True while an exchange call is executing (e.g. inside a loan callback).
    #[inline]
    pub fn in_call(&self) -> bool {
        self.depth > 0
    }

    pub(crate) fn emit(&mut self, event: OutputEvent) {
        let index = self.events.len();
        self.events.push(event);
        self.journal.record(JournalEntry::EventLogged { index });
    }

    /// Run `f` as one all-or-nothing call.
    ///
    /// On error every write made inside `f` (ledger, orders, events and
    /// token bank) is undone before the error is returned. Calls nest: an
    /// inner failure only unwinds the inner call.
    pub(crate) fn atomically<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ExchangeError>,
    ) -> Result<T, ExchangeError> {
        let checkpoint = Checkpoint {
            journal: self.journal.checkpoint(),
            bank: self.bank.checkpoint(),
        };
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;

        match &result {
            Err(err) => {
                trace!(%err, depth = self.depth, "reverting call");
                self.revert_to(checkpoint);
            }
            Ok(_) if self.depth == 0 => {
                self.journal.clear();
                self.bank.commit();
            }
            Ok(_) => {}
        }
        result
    }

    fn revert_to(&mut self, checkpoint: Checkpoint) {
        for entry in self.journal.unwind(checkpoint.journal) {
            match entry {
                JournalEntry::Balance { token, owner, previous } => {
                    self.ledger.restore(token, owner, previous);
                }
                JournalEntry::OrderInserted { .. } => {
                    self.book.remove_last();
                }
                JournalEntry::StatusChanged { id, previous } => {
                    self.book.restore_status(id, previous);
                }
                JournalEntry::EventLogged { index } => {
                    self.events.truncate(index);
                }
            }
        }
        self.bank.revert_to(checkpoint.bank);
    }
}

impl<B> std::fmt::Debug for Exchange<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("config", &self.config)
            .field("orders", &self.book.len())
            .field("events", &self.events.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

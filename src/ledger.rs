//! Custody Ledger - per-token, per-user internal balances.
//!
//! The ledger is the only writer of custody balances. Deposits pull tokens
//! in before crediting; withdrawals debit before pushing tokens out, so a
//! callback triggered by the send can never observe the pre-debit balance.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::command::{Address, Amount, BalanceChange, OutputEvent, TokenId};
use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::journal::{Journal, JournalEntry};
use crate::token::TokenBank;

/// (token, owner) -> balance. Missing entries read as zero.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    balances: FxHashMap<(TokenId, Address), Amount>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn balance_of(&self, token: TokenId, owner: Address) -> Amount {
        self.balances.get(&(token, owner)).copied().unwrap_or(0)
    }

    /// Sum of all internal balances of `token`.
    pub fn total(&self, token: TokenId) -> Amount {
        self.balances
            .iter()
            .filter(|((t, _), _)| *t == token)
            .map(|(_, amount)| *amount)
            .sum()
    }

    /// Non-zero entries as `(token, owner, balance)`, sorted by key.
    pub fn entries(&self) -> Vec<(TokenId, Address, Amount)> {
        let mut entries: Vec<_> = self
            .balances
            .iter()
            .filter(|(_, amount)| **amount > 0)
            .map(|(&(token, owner), &amount)| (token, owner, amount))
            .collect();
        entries.sort_unstable();
        entries
    }

    /// Add `amount` to `owner`'s balance, returning the new balance.
    pub(crate) fn credit(
        &mut self,
        journal: &mut Journal,
        token: TokenId,
        owner: Address,
        amount: Amount,
    ) -> Result<Amount, ExchangeError> {
        let previous = self.balance_of(token, owner);
        let balance = previous
            .checked_add(amount)
            .ok_or(ExchangeError::BalanceOverflow { token })?;
        self.write(journal, token, owner, previous, balance);
        Ok(balance)
    }

    /// Subtract `amount` from `owner`'s balance, returning the new balance.
    /// Fails without writing if the balance is short.
    pub(crate) fn debit(
        &mut self,
        journal: &mut Journal,
        token: TokenId,
        owner: Address,
        amount: Amount,
    ) -> Result<Amount, ExchangeError> {
        let previous = self.balance_of(token, owner);
        let balance = previous
            .checked_sub(amount)
            .ok_or(ExchangeError::InsufficientCustodyFunds {
                token,
                user: owner,
                needed: amount,
                available: previous,
            })?;
        self.write(journal, token, owner, previous, balance);
        Ok(balance)
    }

    #[inline]
    fn write(&mut self, journal: &mut Journal, token: TokenId, owner: Address, previous: Amount, balance: Amount) {
        journal.record(JournalEntry::Balance { token, owner, previous });
        self.restore(token, owner, balance);
    }

    /// Overwrite a balance without journaling. Zero removes the entry.
    pub(crate) fn restore(&mut self, token: TokenId, owner: Address, balance: Amount) {
        if balance == 0 {
            self.balances.remove(&(token, owner));
        } else {
            self.balances.insert((token, owner), balance);
        }
    }
}

impl<B: TokenBank> Exchange<B> {
    /// Move `amount` of `token` from `caller`'s wallet into custody.
    ///
    /// The caller must have approved the exchange for at least `amount`.
    /// The exchange cannot deposit to itself: the pull would net to zero
    /// while the credit still lands.
    pub fn deposit(&mut self, caller: Address, token: TokenId, amount: Amount) -> Result<Amount, ExchangeError> {
        self.atomically(|ex| {
            let custodian = ex.address();
            if caller == custodian {
                debug!(%caller, %token, amount, "deposit from the exchange itself rejected");
                return Err(ExchangeError::TransferFailed { token });
            }
            if !ex.bank.transfer_in(token, caller, custodian, amount) {
                debug!(%caller, %token, amount, "deposit rejected by token");
                return Err(ExchangeError::TransferFailed { token });
            }
            let balance = ex.ledger.credit(&mut ex.journal, token, caller, amount)?;
            ex.emit(OutputEvent::Deposited(BalanceChange { token, user: caller, amount, balance }));
            debug!(%caller, %token, amount, balance, "deposited");
            Ok(balance)
        })
    }

    /// Move `amount` of `token` from custody back to `caller`'s wallet.
    pub fn withdraw(&mut self, caller: Address, token: TokenId, amount: Amount) -> Result<Amount, ExchangeError> {
        self.atomically(|ex| {
            // Effects before interactions.
            let balance = ex.ledger.debit(&mut ex.journal, token, caller, amount)?;
            let custodian = ex.address();
            if !ex.bank.transfer_out(token, custodian, caller, amount) {
                debug!(%caller, %token, amount, "withdraw rejected by token");
                return Err(ExchangeError::TransferFailed { token });
            }
            ex.emit(OutputEvent::Withdrawn(BalanceChange { token, user: caller, amount, balance }));
            debug!(%caller, %token, amount, balance, "withdrew");
            Ok(balance)
        })
    }

    /// Custody balance of `user` in `token`.
    #[inline]
    pub fn balance_of(&self, token: TokenId, user: Address) -> Amount {
        self.ledger.balance_of(token, user)
    }

    /// Sum of every user's custody balance in `token`.
    pub fn total_balance(&self, token: TokenId) -> Amount {
        self.ledger.total(token)
    }
}

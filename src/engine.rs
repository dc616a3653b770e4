//! Engine - sequenced transaction processing with CPU pinning.
//!
//! Wraps the exchange with a transaction interface and, behind the
//! `runtime` feature, an event loop fed through rtrb ring buffers.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tracing::{debug, info};

use crate::command::{Address, Command, OutputEvent, Transaction};
use crate::config::{ConfigError, EngineConfig, ExchangeConfig};
use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::flash_loan::RepayingBorrower;
use crate::token::{Erc20Bank, TokenBank};

/// Result of one transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Receipt {
    pub caller: Address,
    /// Events emitted by the transaction, or the reason it was rejected
    pub outcome: Result<Vec<OutputEvent>, ExchangeError>,
}

impl Receipt {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Processes transactions one at a time against a single exchange.
pub struct Engine {
    /// The underlying exchange
    pub exchange: Exchange<Erc20Bank>,
}

impl Engine {
    /// Build an engine from configuration, deploying every genesis token.
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut bank = Erc20Bank::new();
        for genesis in &config.tokens {
            let supply = genesis.base_supply().ok_or_else(|| {
                ConfigError::InvalidGenesis(format!("unrepresentable supply for {}", genesis.token))
            })?;
            if !bank.deploy(genesis.token, genesis.holder, supply) {
                return Err(ConfigError::InvalidGenesis(format!(
                    "token {} could not be deployed",
                    genesis.token
                )));
            }
            info!(token = %genesis.token, holder = %genesis.holder, supply, "token deployed");
        }
        bank.commit();
        Ok(Self::with_bank(config.exchange, bank))
    }

    /// Build an engine over an existing token bank.
    pub fn with_bank(config: ExchangeConfig, bank: Erc20Bank) -> Self {
        Self {
            exchange: Exchange::new(config, bank),
        }
    }

    /// Run the engine event loop.
    ///
    /// # Arguments
    /// * `input` - Consumer end of the transaction ring buffer
    /// * `output` - Producer end of the receipt ring buffer
    /// * `pin_to_core` - Whether to pin to the last available CPU core
    ///
    /// # Note
    /// This function runs forever (until the program terminates).
    #[cfg(feature = "runtime")]
    pub fn run(
        &mut self,
        input: &mut rtrb::Consumer<Transaction>,
        output: &mut rtrb::Producer<Receipt>,
        pin_to_core: bool,
    ) {
        if pin_to_core {
            self.pin_to_core();
        }

        loop {
            while let Ok(tx) = input.pop() {
                let receipt = self.process(tx);
                // Best effort - drop if full
                let _ = output.push(receipt);
            }
            std::hint::spin_loop();
        }
    }

    /// Execute one transaction and return its receipt.
    ///
    /// This is the main entry point for synchronous usage (replay, testing,
    /// benchmarks). The block clock never moves backwards.
    pub fn process(&mut self, tx: Transaction) -> Receipt {
        let timestamp = tx.timestamp.max(self.exchange.timestamp());
        self.exchange.set_timestamp(timestamp);

        let outcome = self.execute(tx.caller, tx.command);
        // Rejected calls have already unwound their events.
        let events = self.exchange.take_events();
        if let Err(err) = &outcome {
            debug!(caller = %tx.caller, ?tx.command, %err, "transaction rejected");
        }
        Receipt {
            caller: tx.caller,
            outcome: outcome.map(|()| events),
        }
    }

    fn execute(&mut self, caller: Address, command: Command) -> Result<(), ExchangeError> {
        let ex = &mut self.exchange;
        match command {
            Command::Approve { token, spender, amount } => {
                if !ex.tokens_mut().approve(token, caller, spender, amount) {
                    return Err(ExchangeError::TransferFailed { token });
                }
                ex.tokens_mut().commit();
            }
            Command::Transfer { token, to, amount } => {
                if !ex.tokens_mut().transfer(token, caller, to, amount) {
                    return Err(ExchangeError::TransferFailed { token });
                }
                ex.tokens_mut().commit();
            }
            Command::Deposit { token, amount } => {
                ex.deposit(caller, token, amount)?;
            }
            Command::Withdraw { token, amount } => {
                ex.withdraw(caller, token, amount)?;
            }
            Command::MakeOrder(request) => {
                ex.make_order(caller, request)?;
            }
            Command::CancelOrder { id } => {
                ex.cancel_order(caller, id)?;
            }
            Command::FillOrder { id } => {
                ex.fill_order(caller, id)?;
            }
            Command::FlashLoan { token, amount, repay } => {
                let mut borrower = RepayingBorrower { address: caller, repay };
                ex.flash_loan(caller, token, amount, &[], &mut borrower)?;
            }
        }
        Ok(())
    }

    /// Pin the current thread to the last available CPU core.
    ///
    /// The last core is typically isolated from OS interrupts.
    pub fn pin_to_core(&self) {
        if let Some(core_ids) = core_affinity::get_core_ids() {
            if let Some(last_core) = core_ids.last() {
                core_affinity::set_for_current(*last_core);
            }
        }
    }

    /// Number of orders ever created.
    #[inline]
    pub fn order_count(&self) -> u64 {
        self.exchange.order_count()
    }

    /// Compute state hash for determinism testing.
    ///
    /// Covers every non-zero custody balance, every order with its status,
    /// and the exchange's holdings of each deployed token.
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        for entry in self.exchange.ledger().entries() {
            entry.hash(&mut hasher);
        }
        for order in self.exchange.book().iter() {
            order.hash(&mut hasher);
        }

        let bank = self.exchange.tokens();
        let mut tokens: Vec<_> = bank.tokens().collect();
        tokens.sort_unstable();
        for token in tokens {
            token.hash(&mut hasher);
            bank.balance_of(token, self.exchange.address()).hash(&mut hasher);
        }

        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MakeOrder;

    const CONFIG: &str = r#"
        [exchange]
        address = "0xe0"
        fee_account = "0xfee"
        fee_percent = 10

        [[tokens]]
        token = "0xa"
        holder = "0x1"
        supply = "1000"
        decimals = 0

        [[tokens]]
        token = "0xb"
        holder = "0x2"
        supply = "1000"
        decimals = 0
    "#;

    const EXCHANGE: Address = Address::from_low_u64(0xe0);
    const TOKEN_A: Address = Address::from_low_u64(0xa);
    const TOKEN_B: Address = Address::from_low_u64(0xb);
    const USER1: Address = Address::from_low_u64(1);
    const USER2: Address = Address::from_low_u64(2);

    fn engine() -> Engine {
        Engine::new(&EngineConfig::from_toml_str(CONFIG).unwrap()).unwrap()
    }

    fn tx(caller: Address, timestamp: u64, command: Command) -> Transaction {
        Transaction { caller, timestamp, command }
    }

    #[test]
    fn test_engine_creation() {
        let engine = engine();
        assert_eq!(engine.order_count(), 0);
        assert_eq!(engine.exchange.tokens().total_supply(TOKEN_A), 1000);
        assert_eq!(engine.exchange.tokens().balance_of(TOKEN_B, USER2), 1000);
    }

    #[test]
    fn test_engine_deposit_flow() {
        let mut engine = engine();

        let approve = engine.process(tx(
            USER1,
            1,
            Command::Approve { token: TOKEN_A, spender: EXCHANGE, amount: 100 },
        ));
        assert_eq!(approve.outcome, Ok(vec![]));

        let deposit = engine.process(tx(USER1, 2, Command::Deposit { token: TOKEN_A, amount: 100 }));
        let events = deposit.outcome.unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], OutputEvent::Deposited(c) if c.balance == 100));
        assert!(engine.exchange.events().is_empty(), "engine drains the log");
    }

    #[test]
    fn test_engine_rejection_receipt() {
        let mut engine = engine();
        let receipt = engine.process(tx(USER1, 1, Command::FillOrder { id: 1 }));
        assert!(!receipt.is_success());
        assert_eq!(receipt.outcome, Err(ExchangeError::OrderNotFound(1)));
        assert_eq!(receipt.caller, USER1);
    }

    #[test]
    fn test_engine_clock_is_monotonic() {
        let mut engine = engine();
        engine.process(tx(USER1, 100, Command::Approve { token: TOKEN_A, spender: EXCHANGE, amount: 10 }));
        engine.process(tx(USER1, 50, Command::Deposit { token: TOKEN_A, amount: 10 }));
        let receipt = engine.process(tx(
            USER1,
            40,
            Command::MakeOrder(MakeOrder { token_get: TOKEN_B, amount_get: 1, token_give: TOKEN_A, amount_give: 1 }),
        ));
        assert!(receipt.is_success());
        assert_eq!(engine.exchange.order(1).unwrap().timestamp, 100);
    }

    #[test]
    fn test_engine_failed_transfer() {
        let mut engine = engine();
        let receipt = engine.process(tx(USER1, 1, Command::Transfer { token: TOKEN_A, to: USER2, amount: 1001 }));
        assert_eq!(receipt.outcome, Err(ExchangeError::TransferFailed { token: TOKEN_A }));
    }

    #[test]
    fn test_engine_flash_loan() {
        let mut engine = engine();
        engine.process(tx(USER1, 1, Command::Approve { token: TOKEN_A, spender: EXCHANGE, amount: 100 }));
        engine.process(tx(USER1, 2, Command::Deposit { token: TOKEN_A, amount: 100 }));

        let ok = engine.process(tx(USER2, 3, Command::FlashLoan { token: TOKEN_A, amount: 100, repay: 100 }));
        assert!(matches!(ok.outcome.as_deref(), Ok([OutputEvent::LoanIssued(_)])));

        let short = engine.process(tx(USER2, 4, Command::FlashLoan { token: TOKEN_A, amount: 100, repay: 50 }));
        assert!(matches!(short.outcome, Err(ExchangeError::LoanNotRepaid { .. })));
        assert_eq!(engine.exchange.tokens().balance_of(TOKEN_A, EXCHANGE), 100);
    }

    #[test]
    fn test_engine_state_hash_determinism() {
        let script = [
            tx(USER1, 1, Command::Approve { token: TOKEN_A, spender: EXCHANGE, amount: 500 }),
            tx(USER1, 2, Command::Deposit { token: TOKEN_A, amount: 500 }),
            tx(
                USER1,
                3,
                Command::MakeOrder(MakeOrder { token_get: TOKEN_B, amount_get: 5, token_give: TOKEN_A, amount_give: 7 }),
            ),
            tx(USER1, 4, Command::CancelOrder { id: 1 }),
        ];

        let mut engine1 = engine();
        let mut engine2 = engine();
        for t in script {
            engine1.process(t);
            engine2.process(t);
        }
        assert_eq!(engine1.state_hash(), engine2.state_hash());

        engine2.process(tx(USER1, 5, Command::Withdraw { token: TOKEN_A, amount: 1 }));
        assert_ne!(engine1.state_hash(), engine2.state_hash());
    }
}

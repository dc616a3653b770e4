//! # Flash-DEX
//!
//! A deterministic custody exchange: users deposit tokens into custody,
//! trade them through one-shot orders, and borrow the exchange's holdings
//! through flash loans that must be repaid within the same call.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: One thread owns the exchange state exclusively (no locks)
//! - **All-or-Nothing**: Every public operation runs against a journal and
//!   unwinds completely on failure, including nested re-entrant calls
//! - **Effects Before Interactions**: Custody balances move before any token
//!   transfer that could hand control to a borrower
//! - **Arena Allocation**: Orders are 128-byte records in an append-only arena
//!
//! ## Architecture
//!
//! ```text
//! [Sequencer] --> [SPSC Ring Buffer] --> [Engine Thread (Pinned)]
//!                                                |
//!                                  [Exchange: Ledger | Book | Loans]
//!                                                |
//!                                          [TokenBank]
//! ```

pub mod arena;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod flash_loan;
pub mod journal;
pub mod ledger;
pub mod matching;
pub mod order_book;
pub mod replay;
pub mod token;

// Re-exports for convenience
pub use arena::{Order, OrderArena, OrderStatus};
pub use command::{
    Address, Amount, BalanceChange, Command, FillEvent, LoanEvent, MakeOrder, OrderEvent, OrderId, OutputEvent,
    TokenId, Transaction,
};
pub use config::{ConfigError, EngineConfig, ExchangeConfig, TokenGenesis};
pub use engine::{Engine, Receipt};
pub use error::{ExchangeError, ParseAddressError};
pub use exchange::Exchange;
pub use flash_loan::{FlashBorrower, RepayingBorrower};
pub use ledger::Ledger;
pub use matching::Settlement;
pub use order_book::OrderBook;
pub use replay::{read_transactions, ReceiptLine, ReplayError, ReplayRow};
pub use token::{Erc20Bank, TokenBank};

//! Matching - settlement of a single order against the filler's balance.
//!
//! Settlement runs entirely inside the custody ledger:
//! 1. FEE: `amount_get * fee_percent / 100`, truncated
//! 2. TAKER LEG: filler pays `amount_get + fee` of the get-token, as one debit
//! 3. MAKER LEG: maker receives `amount_get`, fee account receives `fee`
//! 4. GIVE LEG: maker pays `amount_give`, filler receives it
//!
//! No token leaves custody on a fill.

use tracing::debug;

use crate::arena::OrderStatus;
use crate::command::{Address, Amount, FillEvent, OrderId, OutputEvent, TokenId};
use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::journal::JournalEntry;
use crate::token::TokenBank;

/// Amounts moved by one fill, all derived from the order and the fee rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settlement {
    /// Fee credited to the fee account, in the get-token
    pub fee: Amount,
    /// Total debited from the filler in the get-token
    pub filler_debit: Amount,
}

impl Settlement {
    /// Compute the fee and filler debit for a fill of `amount_get`.
    ///
    /// Rounding dust from the integer division is not collected.
    pub fn compute(token_get: TokenId, amount_get: Amount, fee_percent: u32) -> Result<Self, ExchangeError> {
        let overflow = ExchangeError::BalanceOverflow { token: token_get };
        let fee = amount_get
            .checked_mul(Amount::from(fee_percent))
            .ok_or_else(|| overflow.clone())?
            / 100;
        let filler_debit = amount_get.checked_add(fee).ok_or(overflow)?;
        Ok(Self { fee, filler_debit })
    }
}

impl<B: TokenBank> Exchange<B> {
    /// Settle open order `id` against `caller`'s custody balances.
    ///
    /// Fails with the order's state error if it is unknown, cancelled or
    /// already filled, and with `InsufficientCustodyFunds` if the filler
    /// cannot cover `amount_get` plus fee or the maker no longer holds
    /// `amount_give`. Any failure leaves every balance untouched.
    pub fn fill_order(&mut self, caller: Address, id: OrderId) -> Result<Settlement, ExchangeError> {
        self.atomically(|ex| {
            let order = *ex.book.open_order(id)?;
            let settlement = Settlement::compute(order.token_get, order.amount_get, ex.fee_percent())?;
            let fee_account = ex.fee_account();

            // Taker leg: a single combined requirement.
            ex.ledger
                .debit(&mut ex.journal, order.token_get, caller, settlement.filler_debit)?;
            ex.ledger
                .credit(&mut ex.journal, order.token_get, order.maker, order.amount_get)?;
            ex.ledger
                .credit(&mut ex.journal, order.token_get, fee_account, settlement.fee)?;

            // Give leg: the maker's collateral is checked lazily here.
            ex.ledger
                .debit(&mut ex.journal, order.token_give, order.maker, order.amount_give)?;
            ex.ledger
                .credit(&mut ex.journal, order.token_give, caller, order.amount_give)?;

            let previous = ex
                .book
                .set_status(id, OrderStatus::Filled)
                .ok_or(ExchangeError::OrderNotFound(id))?;
            ex.journal.record(JournalEntry::StatusChanged { id, previous });

            let timestamp = ex.timestamp();
            ex.emit(OutputEvent::OrderFilled(FillEvent {
                id,
                maker: order.maker,
                filler: caller,
                token_get: order.token_get,
                amount_get: order.amount_get,
                token_give: order.token_give,
                amount_give: order.amount_give,
                timestamp,
            }));
            debug!(id, maker = %order.maker, filler = %caller, fee = settlement.fee, "order filled");
            Ok(settlement)
        })
    }
}

//! Flash-Loan Issuer - zero-collateral loans repaid within the same call.
//!
//! Lending → Settling, inside one atomic call:
//! 1. send the tokens to the borrower (real tokens, not ledger credit)
//! 2. hand control to the borrower's callback, which may re-enter
//! 3. require the exchange's token balance to be back to its prior level
//!
//! Repayment must come from outside custody: tokens deposited during the
//! callback are owed to the depositor, so any custody growth must be matched
//! by holdings above the prior level.
//!
//! A failed check reverts the whole call, including the send and anything
//! the callback did.

use tracing::debug;

use crate::command::{Address, Amount, LoanEvent, OutputEvent, TokenId};
use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::token::TokenBank;

/// Receiver of a flash loan.
///
/// The callback gets the exchange back mutably: it may call any exchange
/// operation (each is atomic on its own) and must push the principal back
/// through the token bank before returning. Returning an error aborts the
/// loan with that error.
pub trait FlashBorrower<B: TokenBank> {
    fn on_flash_loan(
        &mut self,
        exchange: &mut Exchange<B>,
        token: TokenId,
        amount: Amount,
        data: &[u8],
    ) -> Result<(), ExchangeError>;
}

impl<B, F> FlashBorrower<B> for F
where
    B: TokenBank,
    F: FnMut(&mut Exchange<B>, TokenId, Amount, &[u8]) -> Result<(), ExchangeError>,
{
    fn on_flash_loan(
        &mut self,
        exchange: &mut Exchange<B>,
        token: TokenId,
        amount: Amount,
        data: &[u8],
    ) -> Result<(), ExchangeError> {
        self(exchange, token, amount, data)
    }
}

/// Borrower that pushes `repay` back to the exchange from `address`.
///
/// With `repay == amount` the loan succeeds; anything less is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RepayingBorrower {
    pub address: Address,
    pub repay: Amount,
}

impl<B: TokenBank> FlashBorrower<B> for RepayingBorrower {
    fn on_flash_loan(
        &mut self,
        exchange: &mut Exchange<B>,
        token: TokenId,
        amount: Amount,
        _data: &[u8],
    ) -> Result<(), ExchangeError> {
        debug!(borrower = %self.address, %token, amount, repay = self.repay, "loan received");
        let custodian = exchange.address();
        if !exchange.tokens_mut().transfer(token, self.address, custodian, self.repay) {
            return Err(ExchangeError::TransferFailed { token });
        }
        Ok(())
    }
}

impl<B: TokenBank> Exchange<B> {
    /// Lend `amount` of `token` to `caller` for the duration of the
    /// borrower's callback.
    pub fn flash_loan(
        &mut self,
        caller: Address,
        token: TokenId,
        amount: Amount,
        data: &[u8],
        borrower: &mut dyn FlashBorrower<B>,
    ) -> Result<(), ExchangeError> {
        self.atomically(|ex| {
            let custodian = ex.address();
            let before = ex.bank.balance_of(token, custodian);
            let custody_before = ex.ledger.total(token);
            if before < amount {
                debug!(%caller, %token, amount, available = before, "loan rejected");
                return Err(ExchangeError::InsufficientLoanFunds {
                    token,
                    requested: amount,
                    available: before,
                });
            }

            // Lending
            if !ex.bank.transfer_out(token, custodian, caller, amount) {
                return Err(ExchangeError::TransferFailed { token });
            }
            borrower.on_flash_loan(ex, token, amount, data)?;

            // Settling
            let after = ex.bank.balance_of(token, custodian);
            let custody_grown = ex.ledger.total(token).saturating_sub(custody_before);
            if after < before || after - before < custody_grown {
                debug!(%caller, %token, amount, before, after, "loan not repaid");
                return Err(ExchangeError::LoanNotRepaid { token, amount, before, after });
            }

            let timestamp = ex.timestamp();
            ex.emit(OutputEvent::LoanIssued(LoanEvent { token, amount, timestamp }));
            debug!(%caller, %token, amount, "loan repaid");
            Ok(())
        })
    }
}

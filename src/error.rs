//! Error types.
//!
//! Every exchange error is terminal for the call that raised it: the call's
//! mutations are reverted before the error reaches the caller.

use thiserror::Error;

use crate::command::{Address, Amount, OrderId, TokenId};

/// Rejection reasons for exchange calls
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExchangeError {
    #[error("token {token} rejected the transfer")]
    TransferFailed { token: TokenId },

    #[error("insufficient custody funds: {user} holds {available} of {token}, needs {needed}")]
    InsufficientCustodyFunds {
        token: TokenId,
        user: Address,
        needed: Amount,
        available: Amount,
    },

    #[error("order {0} does not exist")]
    OrderNotFound(OrderId),

    #[error("{caller} is not the owner of order {id}")]
    NotOrderOwner { id: OrderId, caller: Address },

    #[error("order {0} is already cancelled")]
    OrderAlreadyCancelled(OrderId),

    #[error("order {0} is already filled")]
    OrderAlreadyFilled(OrderId),

    #[error("insufficient funds for loan: {available} of {token} held, {requested} requested")]
    InsufficientLoanFunds {
        token: TokenId,
        requested: Amount,
        available: Amount,
    },

    #[error("flash loan of {amount} {token} not repaid: held {after}, expected at least {before}")]
    LoanNotRepaid {
        token: TokenId,
        amount: Amount,
        before: Amount,
        after: Amount,
    },

    #[error("arithmetic overflow on {token} amounts")]
    BalanceOverflow { token: TokenId },
}

/// Failure to parse an [`Address`] from text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseAddressError {
    #[error("address must start with 0x")]
    MissingPrefix,

    #[error("address must have 1 to 40 hex digits, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex digit {0:?}")]
    InvalidDigit(char),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = ExchangeError::InsufficientCustodyFunds {
            token: Address::from_low_u64(1),
            user: Address::from_low_u64(2),
            needed: 11,
            available: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("holds 10"));
        assert!(msg.contains("needs 11"));

        assert_eq!(ExchangeError::OrderNotFound(9).to_string(), "order 9 does not exist");
    }
}

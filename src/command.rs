//! Command and Event types for the exchange.
//!
//! Commands are the transactions a sequencer feeds to the engine.
//! Events are the append-only notifications consumed by indexers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ParseAddressError;

/// Amount of a token in its smallest unit.
pub type Amount = u128;

/// Sequential order identifier. The first order is `1`.
pub type OrderId = u64;

/// A 20-byte account or contract identity.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Address(pub [u8; 20]);

/// Tokens are named by the address of their contract.
pub type TokenId = Address;

impl Address {
    /// The zero address. Never a valid transfer recipient.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Build an address whose low 8 bytes hold `value` (big-endian).
    pub const fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; 20];
        let be = value.to_be_bytes();
        let mut i = 0;
        while i < 8 {
            bytes[12 + i] = be[i];
            i += 1;
        }
        Address(bytes)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("0x")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = ParseAddressError;

    /// Accepts `0x`-prefixed hex of at most 40 nibbles; shorter input is
    /// left-padded with zeros so `0x2a` names the same account as
    /// `Address::from_low_u64(42)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(ParseAddressError::MissingPrefix)?;
        if hex.is_empty() || hex.len() > 40 {
            return Err(ParseAddressError::InvalidLength(hex.len()));
        }

        let mut nibbles = [0u8; 40];
        let offset = 40 - hex.len();
        for (i, c) in hex.chars().enumerate() {
            nibbles[offset + i] = c
                .to_digit(16)
                .ok_or(ParseAddressError::InvalidDigit(c))? as u8;
        }

        let mut bytes = [0u8; 20];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = (nibbles[2 * i] << 4) | nibbles[2 * i + 1];
        }
        Ok(Address(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Amounts travel as decimal strings: 18-decimal balances routinely exceed
/// `u64`, which JSON numbers and tagged-enum buffering cannot carry.
/// Plain integers are still accepted on input.
pub mod amount_str {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    use super::Amount;

    pub fn serialize<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(amount)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }

    struct AmountVisitor;

    impl<'de> Visitor<'de> for AmountVisitor {
        type Value = Amount;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative integer amount, as a string or number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
            v.parse().map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
            Ok(Amount::from(v))
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
            Amount::try_from(v).map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
        }
    }
}

// ============================================================================
// Input Commands
// ============================================================================

/// Open a new order: give `amount_give` of `token_give` for `amount_get` of
/// `token_get`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MakeOrder {
    pub token_get: TokenId,
    #[serde(with = "amount_str")]
    pub amount_get: Amount,
    pub token_give: TokenId,
    #[serde(with = "amount_str")]
    pub amount_give: Amount,
}

/// Input commands. The first two act on the token bank directly (wallet
/// side); the rest are exchange calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Let `spender` pull up to `amount` of the caller's `token`
    Approve {
        token: TokenId,
        spender: Address,
        #[serde(with = "amount_str")]
        amount: Amount,
    },
    /// Plain token transfer between wallets
    Transfer {
        token: TokenId,
        to: Address,
        #[serde(with = "amount_str")]
        amount: Amount,
    },
    /// Move tokens from the caller's wallet into custody
    Deposit {
        token: TokenId,
        #[serde(with = "amount_str")]
        amount: Amount,
    },
    /// Move tokens from custody back to the caller's wallet
    Withdraw {
        token: TokenId,
        #[serde(with = "amount_str")]
        amount: Amount,
    },
    /// Create an order collateralised by the caller's balance
    MakeOrder(MakeOrder),
    /// Cancel one of the caller's open orders
    CancelOrder { id: OrderId },
    /// Settle an open order against the caller's balance
    FillOrder { id: OrderId },
    /// Borrow `amount` and push `repay` back from inside the callback
    FlashLoan {
        token: TokenId,
        #[serde(with = "amount_str")]
        amount: Amount,
        #[serde(with = "amount_str")]
        repay: Amount,
    },
}

/// A command signed by `caller`, executed at block time `timestamp`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    pub caller: Address,
    /// Block timestamp, seconds since the Unix epoch
    pub timestamp: u64,
    pub command: Command,
}

// ============================================================================
// Output Events
// ============================================================================

/// A custody balance moved through deposit or withdraw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BalanceChange {
    pub token: TokenId,
    pub user: Address,
    #[serde(with = "amount_str")]
    pub amount: Amount,
    /// Balance after the change
    #[serde(with = "amount_str")]
    pub balance: Amount,
}

/// Order fields as recorded at creation; shared by created and cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderEvent {
    pub id: OrderId,
    pub user: Address,
    pub token_get: TokenId,
    #[serde(with = "amount_str")]
    pub amount_get: Amount,
    pub token_give: TokenId,
    #[serde(with = "amount_str")]
    pub amount_give: Amount,
    pub timestamp: u64,
}

/// An order was settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FillEvent {
    pub id: OrderId,
    pub maker: Address,
    pub filler: Address,
    pub token_get: TokenId,
    #[serde(with = "amount_str")]
    pub amount_get: Amount,
    pub token_give: TokenId,
    #[serde(with = "amount_str")]
    pub amount_give: Amount,
    pub timestamp: u64,
}

/// A flash loan was issued and repaid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoanEvent {
    pub token: TokenId,
    #[serde(with = "amount_str")]
    pub amount: Amount,
    pub timestamp: u64,
}

/// Notifications emitted by the exchange
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum OutputEvent {
    Deposited(BalanceChange),
    Withdrawn(BalanceChange),
    OrderCreated(OrderEvent),
    OrderCancelled(OrderEvent),
    OrderFilled(FillEvent),
    LoanIssued(LoanEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_roundtrip() {
        let addr = Address::from_low_u64(0xdead_beef);
        let text = addr.to_string();
        assert_eq!(text, "0x00000000000000000000000000000000deadbeef");
        assert_eq!(text.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn test_address_short_form_is_left_padded() {
        let addr: Address = "0x2a".parse().unwrap();
        assert_eq!(addr, Address::from_low_u64(42));
    }

    #[test]
    fn test_address_parse_errors() {
        assert_eq!("2a".parse::<Address>(), Err(ParseAddressError::MissingPrefix));
        assert_eq!("0x".parse::<Address>(), Err(ParseAddressError::InvalidLength(0)));
        assert_eq!("0xzz".parse::<Address>(), Err(ParseAddressError::InvalidDigit('z')));
        let too_long = format!("0x{}", "1".repeat(41));
        assert_eq!(too_long.parse::<Address>(), Err(ParseAddressError::InvalidLength(41)));
    }

    #[test]
    fn test_zero_address() {
        assert!(Address::ZERO.is_zero());
        assert!(!Address::from_low_u64(1).is_zero());
    }

    #[test]
    fn test_command_serde_tag() {
        let cmd = Command::FillOrder { id: 7 };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"op":"fill_order","id":7}"#);
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_large_amounts_roundtrip_as_strings() {
        let amount = 100_000 * 10u128.pow(18);
        let cmd = Command::Deposit { token: Address::from_low_u64(0xa1), amount };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains(r#""amount":"100000000000000000000000""#));
        assert_eq!(serde_json::from_str::<Command>(&json).unwrap(), cmd);

        let order = Command::MakeOrder(MakeOrder {
            token_get: Address::from_low_u64(1),
            amount_get: u128::MAX,
            token_give: Address::from_low_u64(2),
            amount_give: amount,
        });
        let json = serde_json::to_string(&order).unwrap();
        assert_eq!(serde_json::from_str::<Command>(&json).unwrap(), order);

        let event = OutputEvent::Deposited(BalanceChange {
            token: Address::from_low_u64(0xa1),
            user: Address::from_low_u64(1),
            amount,
            balance: amount * 2,
        });
        let value = serde_json::to_value(event).unwrap();
        assert_eq!(serde_json::from_value::<OutputEvent>(value).unwrap(), event);
    }

    #[test]
    fn test_amount_accepts_plain_numbers() {
        let cmd: Command = serde_json::from_str(
            r#"{"op":"flash_loan","token":"0xa1","amount":500,"repay":"499"}"#,
        )
        .unwrap();
        assert_eq!(cmd, Command::FlashLoan { token: Address::from_low_u64(0xa1), amount: 500, repay: 499 });
        assert!(serde_json::from_str::<Command>(r#"{"op":"withdraw","token":"0xa1","amount":"-1"}"#).is_err());
    }

    #[test]
    fn test_event_serializes_address_as_hex() {
        let event = OutputEvent::LoanIssued(LoanEvent {
            token: Address::from_low_u64(1),
            amount: 5,
            timestamp: 10,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"LoanIssued""#));
        assert!(json.contains("0x0000000000000000000000000000000000000001"));
    }
}

//! Replay input: CSV transaction rows parsed into [`Transaction`]s.
//!
//! One row per call. Columns not used by an op are left empty:
//!
//! ```text
//! timestamp,caller,op,token,amount,counterparty,token_b,amount_b,order_id,repay
//! 2024-01-01T00:00:00Z,0x01,deposit,0xa1,100,,,,,
//! 2024-01-01T00:00:05Z,0x01,make_order,0xa2,10,,0xa1,10,,
//! ```
//!
//! Amounts are whole-token decimals, scaled to smallest units with the
//! row's token decimals.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::{Address, Amount, Command, MakeOrder, OrderId, OutputEvent, TokenId, Transaction};
use crate::config::to_base_units;
use crate::engine::Receipt;

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRow {
    pub timestamp: DateTime<Utc>,
    pub caller: Address,
    pub op: String,
    pub token: Option<TokenId>,
    pub amount: Option<Decimal>,
    /// Spender for `approve`, recipient for `transfer`
    pub counterparty: Option<Address>,
    /// Give side of `make_order`
    pub token_b: Option<TokenId>,
    pub amount_b: Option<Decimal>,
    pub order_id: Option<OrderId>,
    /// Amount the borrower sends back in `flash_loan`
    pub repay: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("unknown op {0:?}")]
    UnknownOp(String),

    #[error("op {op} requires column {column}")]
    MissingColumn { op: &'static str, column: &'static str },

    #[error("column {column} is not representable in base units: {value}")]
    Unrepresentable { column: &'static str, value: Decimal },

    #[error("timestamp {0} precedes the unix epoch")]
    NegativeTimestamp(DateTime<Utc>),
}

impl ReplayRow {
    /// Convert the raw row to a transaction, scaling amounts by `decimals`.
    pub fn to_transaction(&self, decimals: u32) -> Result<Transaction, ReplayError> {
        let timestamp =
            u64::try_from(self.timestamp.timestamp()).map_err(|_| ReplayError::NegativeTimestamp(self.timestamp))?;

        let command = match self.op.as_str() {
            "approve" => Command::Approve {
                token: self.token("approve")?,
                spender: required("approve", "counterparty", self.counterparty)?,
                amount: self.amount("approve", "amount", self.amount, decimals)?,
            },
            "transfer" => Command::Transfer {
                token: self.token("transfer")?,
                to: required("transfer", "counterparty", self.counterparty)?,
                amount: self.amount("transfer", "amount", self.amount, decimals)?,
            },
            "deposit" => Command::Deposit {
                token: self.token("deposit")?,
                amount: self.amount("deposit", "amount", self.amount, decimals)?,
            },
            "withdraw" => Command::Withdraw {
                token: self.token("withdraw")?,
                amount: self.amount("withdraw", "amount", self.amount, decimals)?,
            },
            "make_order" => Command::MakeOrder(MakeOrder {
                token_get: self.token("make_order")?,
                amount_get: self.amount("make_order", "amount", self.amount, decimals)?,
                token_give: required("make_order", "token_b", self.token_b)?,
                amount_give: self.amount("make_order", "amount_b", self.amount_b, decimals)?,
            }),
            "cancel_order" => Command::CancelOrder {
                id: required("cancel_order", "order_id", self.order_id)?,
            },
            "fill_order" => Command::FillOrder {
                id: required("fill_order", "order_id", self.order_id)?,
            },
            "flash_loan" => {
                let amount = self.amount("flash_loan", "amount", self.amount, decimals)?;
                // Full repayment unless the row says otherwise.
                let repay = match self.repay {
                    Some(value) => scale("repay", value, decimals)?,
                    None => amount,
                };
                Command::FlashLoan {
                    token: self.token("flash_loan")?,
                    amount,
                    repay,
                }
            }
            other => return Err(ReplayError::UnknownOp(other.to_owned())),
        };

        Ok(Transaction {
            caller: self.caller,
            timestamp,
            command,
        })
    }

    fn token(&self, op: &'static str) -> Result<TokenId, ReplayError> {
        required(op, "token", self.token)
    }

    fn amount(
        &self,
        op: &'static str,
        column: &'static str,
        value: Option<Decimal>,
        decimals: u32,
    ) -> Result<Amount, ReplayError> {
        scale(column, required(op, column, value)?, decimals)
    }
}

fn required<T>(op: &'static str, column: &'static str, value: Option<T>) -> Result<T, ReplayError> {
    value.ok_or(ReplayError::MissingColumn { op, column })
}

fn scale(column: &'static str, value: Decimal, decimals: u32) -> Result<Amount, ReplayError> {
    to_base_units(value, decimals).ok_or(ReplayError::Unrepresentable { column, value })
}

/// Parse every row of a CSV source, stopping at the first malformed one.
pub fn read_transactions<R: std::io::Read>(source: R, decimals: u32) -> anyhow::Result<Vec<Transaction>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(source);
    let mut transactions = Vec::new();
    for (index, row) in reader.deserialize::<ReplayRow>().enumerate() {
        // Header is line 1.
        let line = index + 2;
        let row = row.map_err(|e| anyhow::anyhow!("line {line}: {e}"))?;
        let tx = row
            .to_transaction(decimals)
            .map_err(|e| anyhow::anyhow!("line {line}: {e}"))?;
        transactions.push(tx);
    }
    Ok(transactions)
}

/// One JSON output line of a replay: the transaction and what it did.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptLine {
    /// RFC 3339 block time, or raw seconds when out of chrono's range
    pub time: String,
    pub caller: Address,
    pub command: Command,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<OutputEvent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReceiptLine {
    pub fn new(tx: &Transaction, receipt: &Receipt) -> Self {
        let time = i64::try_from(tx.timestamp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| tx.timestamp.to_string());
        let (events, error) = match &receipt.outcome {
            Ok(events) => (Some(events.clone()), None),
            Err(err) => (None, Some(err.to_string())),
        };
        Self {
            time,
            caller: receipt.caller,
            command: tx.command,
            events,
            error,
        }
    }
}

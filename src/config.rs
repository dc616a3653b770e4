//! Configuration: exchange parameters and token genesis, loaded from TOML.

use std::collections::HashSet;
use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::command::{Address, Amount, TokenId};

/// Construction-time exchange parameters. Immutable once the exchange exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ExchangeConfig {
    /// Identity under which the exchange holds custodied tokens
    pub address: Address,
    /// Account credited with the fee share of every fill
    pub fee_account: Address,
    /// Fee as an integer percentage of each fill's get-amount
    pub fee_percent: u32,
}

/// A token deployed at engine start-up with its full supply minted to
/// `holder`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGenesis {
    pub token: TokenId,
    pub holder: Address,
    /// Supply in whole tokens, e.g. `"1000000"`
    pub supply: Decimal,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

fn default_decimals() -> u32 {
    18
}

impl TokenGenesis {
    /// Supply in smallest units.
    pub fn base_supply(&self) -> Option<Amount> {
        to_base_units(self.supply, self.decimals)
    }
}

/// Engine start-up configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub tokens: Vec<TokenGenesis>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid token genesis: {0}")]
    InvalidGenesis(String),
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&s)
    }

    /// Reject zero or duplicated token ids and supplies that do not fit the
    /// token's smallest unit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for genesis in &self.tokens {
            if genesis.token.is_zero() {
                return Err(ConfigError::InvalidGenesis("token id must not be zero".into()));
            }
            if !seen.insert(genesis.token) {
                return Err(ConfigError::InvalidGenesis(format!(
                    "token {} is listed twice",
                    genesis.token
                )));
            }
            if genesis.base_supply().is_none() {
                return Err(ConfigError::InvalidGenesis(format!(
                    "supply {} of {} is not representable with {} decimals",
                    genesis.supply, genesis.token, genesis.decimals
                )));
            }
        }
        Ok(())
    }
}

/// Scale a whole-token decimal to smallest units.
///
/// Returns `None` for negative values, values with more fractional digits
/// than `decimals`, and results that overflow [`Amount`].
pub fn to_base_units(value: Decimal, decimals: u32) -> Option<Amount> {
    let mantissa = u128::try_from(value.mantissa()).ok()?;
    let scale = value.scale();
    if decimals >= scale {
        mantissa.checked_mul(10u128.checked_pow(decimals - scale)?)
    } else {
        let divisor = 10u128.checked_pow(scale - decimals)?;
        (mantissa % divisor == 0).then(|| mantissa / divisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const SAMPLE: &str = r#"
        [exchange]
        address = "0xe0"
        fee_account = "0xfee"
        fee_percent = 10

        [[tokens]]
        token = "0xa1"
        holder = "0x1"
        supply = "1000000"

        [[tokens]]
        token = "0xb2"
        holder = "0x1"
        supply = "500.5"
        decimals = 6
    "#;

    #[test]
    fn test_parse_sample() {
        let config = EngineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.exchange.fee_percent, 10);
        assert_eq!(config.exchange.fee_account, Address::from_low_u64(0xfee));
        assert_eq!(config.tokens.len(), 2);
        assert_eq!(config.tokens[0].decimals, 18);
        assert_eq!(
            config.tokens[0].base_supply(),
            Some(1_000_000 * 10u128.pow(18))
        );
        assert_eq!(config.tokens[1].base_supply(), Some(500_500_000));
    }

    #[test]
    fn test_duplicate_token_rejected() {
        let toml = r#"
            [exchange]
            address = "0xe0"
            fee_account = "0xfee"
            fee_percent = 10

            [[tokens]]
            token = "0xa1"
            holder = "0x1"
            supply = "1"

            [[tokens]]
            token = "0xa1"
            holder = "0x2"
            supply = "1"
        "#;
        assert!(matches!(
            EngineConfig::from_toml_str(toml),
            Err(ConfigError::InvalidGenesis(_))
        ));
    }

    #[test]
    fn test_bad_address_is_parse_error() {
        let toml = r#"
            [exchange]
            address = "e0"
            fee_account = "0xfee"
            fee_percent = 10
        "#;
        assert!(matches!(EngineConfig::from_toml_str(toml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_to_base_units() {
        let d = |s: &str| Decimal::from_str(s).unwrap();
        assert_eq!(to_base_units(d("1"), 18), Some(10u128.pow(18)));
        assert_eq!(to_base_units(d("1.25"), 2), Some(125));
        assert_eq!(to_base_units(d("1.50"), 1), Some(15));
        assert_eq!(to_base_units(d("1.25"), 1), None);
        assert_eq!(to_base_units(d("-1"), 18), None);
        assert_eq!(to_base_units(d("1"), 60), None);
    }
}

//! Monetary units and reward schedule
//!
//! Amounts, fees, stakes, rates and stake weights are non-negative decimals
//! with exactly 8 fractional digits, stored as an integer count of base
//! units (1 coin = 100,000,000 units). All rounding is half-up at that
//! scale.
//!
//! ## Reward Schedule
//! - **Block Reward**: 50 coins, halving every 210,000 blocks
//! - **Minimum Amount**: 1 base unit (0.00000001)
use crate::error::{BlockchainError, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of fractional digits kept for every decimal value
pub const DECIMAL_SCALE: u32 = 8;

/// Number of base units in one coin
pub const UNITS_PER_COIN: u64 = 100_000_000;

/// Initial block reward (50 coins)
pub const INITIAL_BLOCK_REWARD: Decimal8 = Decimal8::from_coins(50);

/// Blocks between reward halvings
pub const HALVING_INTERVAL: u64 = 210_000;

/// Smallest transferable amount
pub const MIN_TRANSACTION_AMOUNT: Decimal8 = Decimal8::from_units(1);

/// Days used to turn an annual staking rate into a daily one
pub const DAYS_PER_YEAR: u128 = 365;

/// Fixed-point decimal with 8 fractional digits
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    bincode::Encode,
    bincode::Decode,
)]
pub struct Decimal8(u64);

/// Transferred value or fee
pub type Amount = Decimal8;

impl Decimal8 {
    pub const ZERO: Decimal8 = Decimal8(0);
    pub const ONE: Decimal8 = Decimal8(UNITS_PER_COIN);

    pub const fn from_units(units: u64) -> Decimal8 {
        Decimal8(units)
    }

    pub const fn from_coins(coins: u64) -> Decimal8 {
        Decimal8(coins * UNITS_PER_COIN)
    }

    pub const fn units(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Decimal8) -> Option<Decimal8> {
        self.0.checked_add(other.0).map(Decimal8)
    }

    pub fn checked_sub(self, other: Decimal8) -> Option<Decimal8> {
        self.0.checked_sub(other.0).map(Decimal8)
    }

    pub fn saturating_add(self, other: Decimal8) -> Decimal8 {
        Decimal8(self.0.saturating_add(other.0))
    }

    /// Divide by `2^halvings`, truncating below the last fractional digit
    pub fn halved(self, halvings: u64) -> Decimal8 {
        if halvings >= u64::BITS as u64 {
            Decimal8::ZERO
        } else {
            Decimal8(self.0 >> halvings)
        }
    }

    /// Parse a plain decimal string such as `12.5` or `0.00000001`
    pub fn parse(input: &str) -> Result<Decimal8> {
        let invalid = || BlockchainError::InvalidArgument(format!("Invalid decimal: {input:?}"));
        let trimmed = input.trim();
        let (whole, frac) = match trimmed.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (trimmed, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        if frac.len() > DECIMAL_SCALE as usize {
            return Err(BlockchainError::InvalidArgument(format!(
                "Decimal {input:?} has more than {DECIMAL_SCALE} fractional digits"
            )));
        }

        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<u64>().map_err(|_| invalid())?
        };
        let frac_units = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<width$}", width = DECIMAL_SCALE as usize);
            padded.parse::<u64>().map_err(|_| invalid())?
        };

        whole_units
            .checked_mul(UNITS_PER_COIN)
            .and_then(|u| u.checked_add(frac_units))
            .map(Decimal8)
            .ok_or_else(invalid)
    }
}

/// Plain notation without trailing fractional zeros: `50`, `12.5`, `0.00000001`
impl fmt::Display for Decimal8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / UNITS_PER_COIN;
        let frac = self.0 % UNITS_PER_COIN;
        if frac == 0 {
            write!(f, "{whole}")
        } else {
            let digits = format!("{frac:0width$}", width = DECIMAL_SCALE as usize);
            write!(f, "{whole}.{}", digits.trim_end_matches('0'))
        }
    }
}

impl FromStr for Decimal8 {
    type Err = BlockchainError;

    fn from_str(s: &str) -> Result<Self> {
        Decimal8::parse(s)
    }
}

/// Serialized as its plain decimal string so configuration and JSON output
/// read naturally; whole coins may also be given as an integer
impl Serialize for Decimal8 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct Decimal8Visitor;

impl<'de> Visitor<'de> for Decimal8Visitor {
    type Value = Decimal8;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative decimal with at most 8 fractional digits")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Decimal8, E> {
        Decimal8::parse(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Decimal8, E> {
        v.checked_mul(UNITS_PER_COIN)
            .map(Decimal8)
            .ok_or_else(|| E::custom(format!("{v} coins overflows")))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Decimal8, E> {
        let coins = u64::try_from(v).map_err(|_| E::custom(format!("negative amount {v}")))?;
        self.visit_u64(coins)
    }
}

impl<'de> Deserialize<'de> for Decimal8 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Decimal8, D::Error> {
        deserializer.deserialize_any(Decimal8Visitor)
    }
}

/// Block subsidy at `index`: `initial / 2^(index / halving_interval)`
pub fn block_reward(initial: Amount, halving_interval: u64, index: u64) -> Amount {
    if halving_interval == 0 {
        return initial;
    }
    initial.halved(index / halving_interval)
}

/// Daily staking reward: `staked × (annual_rate / 365) × weight`, rounded
/// half-up to 8 fractional digits
pub fn staking_reward(staked: Amount, annual_rate: Decimal8, weight: Decimal8) -> Amount {
    let scale = UNITS_PER_COIN as u128;
    let numerator = (staked.units() as u128)
        .checked_mul(annual_rate.units() as u128)
        .and_then(|n| n.checked_mul(weight.units() as u128));
    let denominator = scale * scale * DAYS_PER_YEAR;

    match numerator {
        Some(n) => {
            let rounded = (n + denominator / 2) / denominator;
            Decimal8(u64::try_from(rounded).unwrap_or(u64::MAX))
        }
        None => Decimal8(u64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monetary_constants() {
        assert_eq!(UNITS_PER_COIN, 100_000_000);
        assert_eq!(INITIAL_BLOCK_REWARD.units(), 50 * UNITS_PER_COIN);
        assert_eq!(MIN_TRANSACTION_AMOUNT.to_string(), "0.00000001");
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(Decimal8::parse("12.5").unwrap().units(), 1_250_000_000);
        assert_eq!(Decimal8::parse("0.00000001").unwrap().units(), 1);
        assert_eq!(Decimal8::parse("7").unwrap(), Decimal8::from_coins(7));
        assert_eq!(Decimal8::parse(".5").unwrap().to_string(), "0.5");
        assert_eq!(Decimal8::from_coins(50).to_string(), "50");
        assert_eq!(Decimal8::from_units(1_250_000_000).to_string(), "12.5");

        assert!(Decimal8::parse("-1").is_err());
        assert!(Decimal8::parse("1.000000001").is_err());
        assert!(Decimal8::parse("").is_err());
        assert!(Decimal8::parse(".").is_err());
        assert!(Decimal8::parse("1e5").is_err());
    }

    #[test]
    fn test_serde_uses_decimal_strings() {
        let json = serde_json::to_string(&Decimal8::parse("12.5").unwrap()).unwrap();
        assert_eq!(json, "\"12.5\"");
        let back: Decimal8 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Decimal8::from_units(1_250_000_000));
        let whole: Decimal8 = serde_json::from_str("10").unwrap();
        assert_eq!(whole, Decimal8::from_coins(10));
        assert!(serde_json::from_str::<Decimal8>("-1").is_err());
    }

    #[test]
    fn test_halving_schedule() {
        let reward = |index| block_reward(INITIAL_BLOCK_REWARD, HALVING_INTERVAL, index);
        assert_eq!(reward(0), Decimal8::from_coins(50));
        assert_eq!(reward(209_999), Decimal8::from_coins(50));
        assert_eq!(reward(210_000), Decimal8::from_coins(25));
        assert_eq!(reward(420_000), Decimal8::parse("12.5").unwrap());
        assert_eq!(reward(210_000 * 64), Decimal8::ZERO);
    }

    #[test]
    fn test_staking_reward_rounds_half_up() {
        // 1000 × 0.05 / 365 = 0.136986301369... -> 0.13698630
        let reward = staking_reward(
            Decimal8::from_coins(1000),
            Decimal8::parse("0.05").unwrap(),
            Decimal8::ONE,
        );
        assert_eq!(reward.to_string(), "0.1369863");

        // 365 × 0.1 / 365 × 1.5 = 0.15 exactly
        let weighted = staking_reward(
            Decimal8::from_coins(365),
            Decimal8::parse("0.1").unwrap(),
            Decimal8::parse("1.5").unwrap(),
        );
        assert_eq!(weighted, Decimal8::parse("0.15").unwrap());

        // 0.00000001 × 0.5 / 365 rounds to zero; 0.0000073 × 0.5 / 365 is exactly one unit
        assert_eq!(
            staking_reward(
                Decimal8::from_units(1),
                Decimal8::parse("0.5").unwrap(),
                Decimal8::ONE
            ),
            Decimal8::ZERO
        );
        assert_eq!(
            staking_reward(
                Decimal8::from_units(730),
                Decimal8::parse("0.5").unwrap(),
                Decimal8::ONE
            ),
            Decimal8::from_units(1)
        );
    }
}

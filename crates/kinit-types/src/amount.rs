//! Exact KIN amounts.
//!
//! A [`Balance`] is held as an integer count of quarks (the ledger's smallest
//! unit, 10^-5 KIN), so it is exact and non-negative by construction. Decimal
//! values coming from the ledger are rounded to the ledger's precision.

use crate::constants::{DECIMALS, QUARKS_PER_KIN};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount must not be negative: {0}")]
    Negative(String),

    #[error("amount out of range: {0}")]
    Overflow(String),

    #[error("invalid amount '{0}'")]
    Invalid(String),
}

/// A non-negative KIN amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance {
    quarks: u64,
}

impl Balance {
    pub const ZERO: Balance = Balance { quarks: 0 };

    pub const fn from_quarks(quarks: u64) -> Self {
        Self { quarks }
    }

    /// Whole KIN to a balance.
    pub fn from_kin(kin: u64) -> Result<Self, AmountError> {
        kin.checked_mul(QUARKS_PER_KIN)
            .map(Self::from_quarks)
            .ok_or_else(|| AmountError::Overflow(kin.to_string()))
    }

    /// Convert a decimal KIN value, rounding half away from zero to 5 places.
    pub fn from_decimal(value: Decimal) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::Negative(value.to_string()));
        }
        let rounded = value.round_dp_with_strategy(DECIMALS, RoundingStrategy::MidpointAwayFromZero);
        let quarks = rounded
            .checked_mul(Decimal::from(QUARKS_PER_KIN))
            .and_then(|q| q.to_u64())
            .ok_or_else(|| AmountError::Overflow(value.to_string()))?;
        Ok(Self::from_quarks(quarks))
    }

    /// Parse a decimal string such as `"100.00000"`.
    pub fn parse(s: &str) -> Result<Self, AmountError> {
        let value = Decimal::from_str(s.trim()).map_err(|_| AmountError::Invalid(s.to_string()))?;
        Self::from_decimal(value)
    }

    pub fn quarks(&self) -> u64 {
        self.quarks
    }

    /// Exact decimal KIN value.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::from_i128_with_scale(self.quarks as i128, DECIMALS)
    }

    /// Whole KIN, fractional part truncated.
    pub fn whole_kin(&self) -> u64 {
        self.quarks / QUARKS_PER_KIN
    }
}

impl std::fmt::Display for Balance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ledger_string() {
        let b = Balance::parse("100.00000").unwrap();
        assert_eq!(b.quarks(), 10_000_000);
        assert_eq!(b.whole_kin(), 100);
    }

    #[test]
    fn test_to_decimal_is_exact() {
        let b = Balance::from_quarks(12_345_678);
        assert_eq!(b.to_decimal().to_string(), "123.45678");
    }

    #[test]
    fn test_rounds_excess_precision() {
        assert_eq!(Balance::parse("0.000005").unwrap().quarks(), 1);
        assert_eq!(Balance::parse("0.000004").unwrap().quarks(), 0);
    }

    #[test]
    fn test_negative_rejected() {
        assert!(matches!(Balance::parse("-1"), Err(AmountError::Negative(_))));
        assert_eq!(Balance::parse("-0").unwrap(), Balance::ZERO);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(Balance::parse("lots"), Err(AmountError::Invalid(_))));
    }

    #[test]
    fn test_from_kin_overflow() {
        assert_eq!(Balance::from_kin(7).unwrap().quarks(), 700_000);
        assert!(Balance::from_kin(u64::MAX).is_err());
    }
}

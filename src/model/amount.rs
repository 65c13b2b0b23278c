//! Decimal-backed smallest-unit amounts.
//!
//! Grounded on the teacher's `util::money_amount::MoneyAmount`: avoid
//! floating point for on-chain integer amounts (satoshi, wei, lamport,
//! token base units) while keeping a human-readable `Display`/`FromStr`.
//! Unlike `MoneyAmount` (a human currency value with configurable scale),
//! `Amount` always represents an already-smallest-unit integer quantity, so
//! it is backed by `u128` with a `Decimal`-compatible string form for
//! serialization into dispatcher-facing JSON.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn as_decimal(self) -> Decimal {
        Decimal::from(self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Amount {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u128>().map(Amount)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<u128>()
            .map(Amount)
            .map_err(serde::de::Error::custom)
    }
}

impl From<u64> for Amount {
    fn from(v: u64) -> Self {
        Amount(v as u128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_roundtrips_through_display_and_from_str() {
        let a = Amount(999_995_000);
        let s = a.to_string();
        assert_eq!(s.parse::<Amount>().unwrap(), a);
    }

    #[test]
    fn checked_sub_detects_underflow() {
        assert_eq!(Amount(5).checked_sub(Amount(10)), None);
        assert_eq!(Amount(10).checked_sub(Amount(5)), Some(Amount(5)));
    }
}

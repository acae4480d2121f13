//! Two-Decimal Fixed-Point Money
//!
//! Stakes, balances, payouts and multipliers are stored as integer
//! hundredths. No floating point touches a balance.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Amount(i64)      1 unit = 0.01 currency                    │
//! │  Multiplier(u64)  1 unit = 0.01x   (100 = 1.00x)            │
//! │                                                             │
//! │  payout = round_half_up(stake * multiplier / 100)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Floats only appear at the wire boundary (`from_decimal` / `to_decimal`).

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::GameError;

/// Hundredths per whole unit.
pub const CENTS_PER_UNIT: i64 = 100;

/// Divide rounding half away from zero. `den` must be positive.
#[inline]
pub(crate) fn div_round_half_up(num: i128, den: i128) -> i128 {
    if num >= 0 {
        (num + den / 2) / den
    } else {
        (num - den / 2) / den
    }
}

/// Convert a wire decimal into hundredths, rejecting sub-cent precision.
fn decimal_to_hundredths(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    let scaled = value * CENTS_PER_UNIT as f64;
    let rounded = scaled.round();
    if (scaled - rounded).abs() > 1e-6 || rounded.abs() > i64::MAX as f64 {
        return None;
    }
    Some(rounded as i64)
}

// =============================================================================
// AMOUNT
// =============================================================================

/// Currency amount in hundredths.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    /// Zero.
    pub const ZERO: Amount = Amount(0);

    /// From raw hundredths.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// From whole units.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Self(units * CENTS_PER_UNIT)
    }

    /// Parse a wire decimal. Fails on NaN, infinity or more than two decimals.
    pub fn from_decimal(value: f64) -> Result<Self, GameError> {
        decimal_to_hundredths(value)
            .map(Self)
            .ok_or_else(|| GameError::Validation("Amount must have at most 2 decimal places".into()))
    }

    /// Raw hundredths.
    #[inline]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Decimal value for display and the wire.
    pub fn to_decimal(self) -> f64 {
        self.0 as f64 / CENTS_PER_UNIT as f64
    }

    /// Is this amount strictly positive.
    #[inline]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Is this amount negative.
    #[inline]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Subtract, returning `None` instead of going negative.
    pub fn checked_debit(self, rhs: Amount) -> Option<Amount> {
        let result = self.0.checked_sub(rhs.0)?;
        if result < 0 {
            None
        } else {
            Some(Amount(result))
        }
    }
}

impl Add for Amount {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Amount {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Amount {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_decimal())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Amount::from_decimal(value).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// MULTIPLIER
// =============================================================================

/// Payout multiplier in hundredths (`100` = 1.00x).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Multiplier(u64);

impl Default for Multiplier {
    fn default() -> Self {
        Self::ONE
    }
}

impl Multiplier {
    /// 1.00x
    pub const ONE: Multiplier = Multiplier(100);

    /// From raw hundredths.
    #[inline]
    pub const fn from_hundredths(hundredths: u64) -> Self {
        Self(hundredths)
    }

    /// From a whole multiple.
    #[inline]
    pub const fn from_whole(whole: u64) -> Self {
        Self(whole * 100)
    }

    /// Parse a wire decimal.
    pub fn from_decimal(value: f64) -> Result<Self, GameError> {
        match decimal_to_hundredths(value) {
            Some(h) if h >= 0 => Ok(Self(h as u64)),
            _ => Err(GameError::Validation("Invalid multiplier".into())),
        }
    }

    /// Raw hundredths.
    #[inline]
    pub const fn hundredths(self) -> u64 {
        self.0
    }

    /// Decimal value for display and the wire.
    pub fn to_decimal(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Payout for `stake` at this multiplier, rounded to the cent.
    pub fn apply(self, stake: Amount) -> Amount {
        let raw = div_round_half_up(stake.cents() as i128 * self.0 as i128, 100);
        Amount::from_cents(raw as i64)
    }

    /// Reduce by a house edge in basis points, rounded to the hundredth.
    pub fn less_basis_points(self, bps: u32) -> Self {
        let keep = 10_000u64.saturating_sub(bps as u64);
        let scaled = div_round_half_up(self.0 as i128 * keep as i128, 10_000);
        Self(scaled as u64)
    }

    /// Clamp into `[min, max]`.
    pub fn clamp(self, min: Multiplier, max: Multiplier) -> Self {
        Self(self.0.clamp(min.0, max.0))
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}x", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Multiplier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_decimal())
    }
}

impl<'de> Deserialize<'de> for Multiplier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Multiplier::from_decimal(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_from_decimal() {
        assert_eq!(Amount::from_decimal(100.0).unwrap(), Amount::from_units(100));
        assert_eq!(Amount::from_decimal(0.1).unwrap().cents(), 10);
        assert_eq!(Amount::from_decimal(12.34).unwrap().cents(), 1234);
        assert!(Amount::from_decimal(1.005).is_err());
        assert!(Amount::from_decimal(f64::NAN).is_err());
        assert!(Amount::from_decimal(f64::INFINITY).is_err());
    }

    #[test]
    fn test_amount_display() {
        assert_eq!(Amount::from_cents(15000).to_string(), "150.00");
        assert_eq!(Amount::from_cents(5).to_string(), "0.05");
        assert_eq!(Amount::from_cents(-250).to_string(), "-2.50");
    }

    #[test]
    fn test_checked_debit_never_negative() {
        let balance = Amount::from_units(30);
        assert_eq!(balance.checked_debit(Amount::from_units(30)), Some(Amount::ZERO));
        assert_eq!(balance.checked_debit(Amount::from_units(50)), None);
    }

    #[test]
    fn test_payout_rounding() {
        let stake = Amount::from_units(100);
        assert_eq!(Multiplier::from_hundredths(150).apply(stake), Amount::from_units(150));

        // 0.33 * 1.01 = 0.3333 -> 0.33
        assert_eq!(Multiplier::from_hundredths(101).apply(Amount::from_cents(33)).cents(), 33);
        // 0.50 * 1.01 = 0.505 -> 0.51 (half up)
        assert_eq!(Multiplier::from_hundredths(101).apply(Amount::from_cents(50)).cents(), 51);
    }

    #[test]
    fn test_house_edge() {
        assert_eq!(Multiplier::from_whole(2).less_basis_points(100), Multiplier::from_hundredths(198));
        assert_eq!(Multiplier::from_whole(10_000).less_basis_points(100), Multiplier::from_whole(9_900));
        // 1.00 * 0.99 = 0.99
        assert_eq!(Multiplier::ONE.less_basis_points(100), Multiplier::from_hundredths(99));
    }

    #[test]
    fn test_serde_as_decimal() {
        let json = serde_json::to_string(&Amount::from_cents(15050)).unwrap();
        assert_eq!(json, "150.5");
        let parsed: Multiplier = serde_json::from_str("1.98").unwrap();
        assert_eq!(parsed, Multiplier::from_hundredths(198));
        assert!(serde_json::from_str::<Amount>("1.001").is_err());
    }
}

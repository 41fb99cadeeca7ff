//! Money amounts and tax-exact price derivation.
//!
//! Stripe reports amounts in minor units (cents) while Odoo stores
//! tax-exclusive unit prices and recomputes the tax itself. The helpers here
//! convert between the two and derive the pre-tax price whose Odoo-computed
//! total lands exactly on what the customer was charged.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decimal places tried, in order, when searching for a tax-exclusive price.
const PRICE_PRECISIONS: [u32; 3] = [2, 3, 4];

/// Neighbouring candidates examined around the naive division result,
/// ordered by distance so the closest exact match wins.
const CANDIDATE_OFFSETS: [i64; 7] = [0, -1, 1, -2, 2, -3, 3];

/// Errors produced by money conversions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// Tax rates are fractions in `[0, 1)`; negative rates are rejected.
    #[error("tax rate cannot be negative: {0}")]
    NegativeTaxRate(Decimal),
    /// The amount does not fit in the target representation.
    #[error("amount out of range: {0}")]
    OutOfRange(Decimal),
    /// Currency codes are three ASCII letters.
    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),
}

/// An amount in major units with its ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in major units (e.g. euros, not cents).
    pub amount: Decimal,
    /// Upper-case ISO 4217 code.
    pub currency: String,
}

impl Money {
    /// Create an amount, upper-casing and validating the currency code.
    ///
    /// # Errors
    ///
    /// Returns `MoneyError::InvalidCurrency` unless the code is three ASCII letters.
    pub fn new(amount: Decimal, currency: &str) -> Result<Self, MoneyError> {
        let code = currency.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(MoneyError::InvalidCurrency(currency.to_string()));
        }
        Ok(Self {
            amount,
            currency: code.to_ascii_uppercase(),
        })
    }

    /// Build an amount from minor units (cents), dividing by 100.
    ///
    /// # Errors
    ///
    /// Returns `MoneyError::InvalidCurrency` for a malformed currency code.
    pub fn from_minor_units(minor: i64, currency: &str) -> Result<Self, MoneyError> {
        Self::new(Decimal::new(minor, 2), currency)
    }

    /// Convert to minor units, rounding half away from zero to the cent.
    ///
    /// # Errors
    ///
    /// Returns `MoneyError::OutOfRange` if the amount overflows `i64` cents.
    pub fn to_minor_units(&self) -> Result<i64, MoneyError> {
        to_minor_units(self.amount)
    }
}

/// Convert a major-unit amount to minor units.
///
/// # Errors
///
/// Returns `MoneyError::OutOfRange` if the amount overflows `i64` cents.
pub fn to_minor_units(amount: Decimal) -> Result<i64, MoneyError> {
    round_half_up(amount, 2)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| cents.to_i64())
        .ok_or(MoneyError::OutOfRange(amount))
}

/// Round half away from zero, which is what Odoo and Stripe both do for
/// monetary amounts.
#[must_use]
pub fn round_half_up(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// The total Odoo computes for a single line: price plus tax rounded to the cent.
#[must_use]
pub fn tax_inclusive_total(unit_price: Decimal, tax_rate: Decimal) -> Decimal {
    round_half_up(unit_price + round_half_up(unit_price * tax_rate, 2), 2)
}

/// Derive the tax-exclusive unit price for a charged tax-inclusive total.
///
/// Searches at 2, then 3, then 4 decimal places for a price `p` with
/// `round(p + round(p * rate, 2), 2) == total`. When no precision produces an
/// exact match the closest candidate is returned.
///
/// # Errors
///
/// Returns `MoneyError::NegativeTaxRate` for a negative rate and
/// `MoneyError::OutOfRange` if the division overflows.
///
/// # Example
///
/// ```
/// use booking_bridge_core::{tax_exclusive_unit_price, tax_inclusive_total};
/// use rust_decimal::Decimal;
///
/// let total = Decimal::new(10000, 2);
/// let rate = Decimal::new(22, 2);
/// let unit = tax_exclusive_unit_price(total, rate).unwrap();
/// assert_eq!(tax_inclusive_total(unit, rate), total);
/// ```
pub fn tax_exclusive_unit_price(total: Decimal, tax_rate: Decimal) -> Result<Decimal, MoneyError> {
    if tax_rate.is_sign_negative() && !tax_rate.is_zero() {
        return Err(MoneyError::NegativeTaxRate(tax_rate));
    }

    let total = round_half_up(total, 2);
    if tax_rate.is_zero() {
        return Ok(total);
    }

    let naive = total
        .checked_div(Decimal::ONE + tax_rate)
        .ok_or(MoneyError::OutOfRange(total))?;

    let mut closest: Option<(Decimal, Decimal)> = None;
    for dp in PRICE_PRECISIONS {
        let base = round_half_up(naive, dp);
        let step = Decimal::new(1, dp);

        for offset in CANDIDATE_OFFSETS {
            let candidate = base + step * Decimal::from(offset);
            if candidate.is_sign_negative() {
                continue;
            }

            let diff = (tax_inclusive_total(candidate, tax_rate) - total).abs();
            if diff.is_zero() {
                return Ok(candidate);
            }
            if closest.is_none_or(|(_, best)| diff < best) {
                closest = Some((candidate, diff));
            }
        }
    }

    Ok(closest.map_or_else(|| round_half_up(naive, 2), |(candidate, _)| candidate))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn rate_22() -> Decimal {
        Decimal::new(22, 2)
    }

    #[test]
    fn test_hundred_euros_at_22_percent() {
        let total = Decimal::new(10000, 2);
        let unit = tax_exclusive_unit_price(total, rate_22()).unwrap();
        assert_eq!(unit, Decimal::new(8197, 2));
        assert_eq!(
            round_half_up(unit + round_half_up(unit * rate_22(), 2), 2),
            total
        );
    }

    #[test]
    fn test_closest_candidate_within_one_cent() {
        for cents in 1..=30_000_i64 {
            let total = Decimal::new(cents, 2);
            let unit = tax_exclusive_unit_price(total, rate_22()).unwrap();
            let diff = (tax_inclusive_total(unit, rate_22()) - total).abs();
            assert!(
                diff <= Decimal::new(1, 2),
                "total {total} resolved to {unit} (diff {diff})"
            );
        }
    }

    #[test]
    fn test_common_booking_totals_are_exact() {
        for cents in [12_500_i64, 5_000, 7_500, 19_900, 100] {
            let total = Decimal::new(cents, 2);
            let unit = tax_exclusive_unit_price(total, rate_22()).unwrap();
            assert_eq!(tax_inclusive_total(unit, rate_22()), total);
        }
    }

    #[test]
    fn test_zero_rate_keeps_total() {
        let total = Decimal::new(4999, 2);
        assert_eq!(
            tax_exclusive_unit_price(total, Decimal::ZERO).unwrap(),
            total
        );
    }

    #[test]
    fn test_negative_rate_rejected() {
        let err = tax_exclusive_unit_price(Decimal::ONE, Decimal::new(-1, 1)).unwrap_err();
        assert!(matches!(err, MoneyError::NegativeTaxRate(_)));
    }

    #[test]
    fn test_minor_unit_conversion() {
        let money = Money::from_minor_units(12_500, "eur").unwrap();
        assert_eq!(money.amount, Decimal::new(125, 0));
        assert_eq!(money.currency, "EUR");
        assert_eq!(money.to_minor_units().unwrap(), 12_500);
    }

    #[test]
    fn test_invalid_currency() {
        assert!(Money::new(Decimal::ONE, "euro").is_err());
        assert!(Money::new(Decimal::ONE, "e1r").is_err());
    }

    #[test]
    fn test_round_half_up() {
        assert_eq!(round_half_up(Decimal::new(1805, 3), 2), Decimal::new(181, 2));
        assert_eq!(round_half_up(Decimal::new(-1805, 3), 2), Decimal::new(-181, 2));
    }
}

//! Checkout pricing for bookings.
//!
//! A quote is built from the product's price list and the party size. Line
//! amounts are computed in cents first and the total is their sum, so the
//! Stripe line items always add up to the charged total exactly.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::money::{MoneyError, to_minor_units};

/// Maximum party size accepted for a single booking.
pub const MAX_GUESTS: u32 = 50;

/// Maximum number of dogs accepted for a single booking.
pub const MAX_DOGS: u32 = 20;

/// Errors produced while pricing a booking.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PricingError {
    /// At least one guest is required.
    #[error("at least one guest is required")]
    NoGuests,
    /// The party exceeds the per-booking limit.
    #[error("party too large: {guests} guests, {dogs} dogs")]
    PartyTooLarge {
        /// Requested guests.
        guests: u32,
        /// Requested dogs.
        dogs: u32,
    },
    /// The product carries an unknown pricing type.
    #[error("unknown pricing type: {0}")]
    UnknownPricingType(String),
    /// A configured price is negative.
    #[error("negative price configured: {0}")]
    NegativePrice(Decimal),
    /// The resulting total is zero; Stripe rejects empty charges.
    #[error("booking total must be greater than zero")]
    ZeroTotal,
    /// Conversion to cents failed.
    #[error(transparent)]
    Money(#[from] MoneyError),
}

/// How a product's base prices combine with the party size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PricingType {
    /// `guests * adult + dogs * dog`.
    #[default]
    Linear,
    /// One adult base price for the whole group, plus `dogs * dog`.
    Flat,
}

impl PricingType {
    /// Returns the string stored in the catalog.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Flat => "flat",
        }
    }
}

impl std::str::FromStr for PricingType {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" | "per_person" => Ok(Self::Linear),
            "flat" | "per_group" => Ok(Self::Flat),
            other => Err(PricingError::UnknownPricingType(other.to_string())),
        }
    }
}

/// Base prices for a bookable product, in major units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceList {
    /// Price per adult (linear) or per group (flat).
    pub adult: Decimal,
    /// Price per dog.
    pub dog: Decimal,
    /// How the prices combine.
    pub pricing_type: PricingType,
}

/// A single line of a quote, ready to become a Stripe line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteLine {
    /// Human label (e.g. "Adult").
    pub label: String,
    /// Unit amount in cents.
    pub unit_amount_cents: i64,
    /// Quantity.
    pub quantity: u32,
}

impl QuoteLine {
    /// Line subtotal in cents.
    #[must_use]
    pub fn amount_cents(&self) -> i64 {
        self.unit_amount_cents * i64::from(self.quantity)
    }
}

/// Priced booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    /// Line items; their amounts sum to `total_cents`.
    pub lines: Vec<QuoteLine>,
    /// Total in cents.
    pub total_cents: i64,
}

impl Quote {
    /// Total in major units.
    #[must_use]
    pub fn total(&self) -> Decimal {
        Decimal::new(self.total_cents, 2)
    }
}

impl PriceList {
    /// Price a booking for `guests` people and `dogs` dogs.
    ///
    /// # Errors
    ///
    /// Returns `PricingError` for an empty or oversized party, negative
    /// prices, or a zero total.
    pub fn quote(&self, guests: u32, dogs: u32) -> Result<Quote, PricingError> {
        if guests == 0 {
            return Err(PricingError::NoGuests);
        }
        if guests > MAX_GUESTS || dogs > MAX_DOGS {
            return Err(PricingError::PartyTooLarge { guests, dogs });
        }
        for price in [self.adult, self.dog] {
            if price.is_sign_negative() && !price.is_zero() {
                return Err(PricingError::NegativePrice(price));
            }
        }

        let adult_cents = to_minor_units(self.adult)?;
        let dog_cents = to_minor_units(self.dog)?;

        let mut lines = Vec::with_capacity(2);
        match self.pricing_type {
            PricingType::Linear => lines.push(QuoteLine {
                label: "Adult".to_string(),
                unit_amount_cents: adult_cents,
                quantity: guests,
            }),
            PricingType::Flat => lines.push(QuoteLine {
                label: format!("Group ({})", describe_party(guests, 0)),
                unit_amount_cents: adult_cents,
                quantity: 1,
            }),
        }
        if dogs > 0 && dog_cents > 0 {
            lines.push(QuoteLine {
                label: "Dog".to_string(),
                unit_amount_cents: dog_cents,
                quantity: dogs,
            });
        }

        lines.retain(|line| line.unit_amount_cents > 0);
        let total_cents: i64 = lines.iter().map(QuoteLine::amount_cents).sum();
        if total_cents == 0 {
            return Err(PricingError::ZeroTotal);
        }

        Ok(Quote { lines, total_cents })
    }
}

/// Per-unit supplier costs for a product, in major units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CostList {
    /// Cost per adult; bookings without it carry no purchase line.
    pub adult: Option<Decimal>,
    /// Cost per dog.
    pub dog: Option<Decimal>,
}

impl CostList {
    /// Supplier cost for a party, `None` when no positive cost applies.
    #[must_use]
    pub fn total(&self, guests: u32, dogs: u32) -> Option<Decimal> {
        let adult = self.adult? * Decimal::from(guests);
        let dog = self.dog.unwrap_or_default() * Decimal::from(dogs);
        let total = adult + dog;
        (total > Decimal::ZERO).then_some(total)
    }
}

/// Human-readable party description used in order line text.
///
/// Multiplicity is carried here, never in line quantities.
#[must_use]
pub fn describe_party(guests: u32, dogs: u32) -> String {
    let people = match guests {
        0 => String::new(),
        1 => "1 adult".to_string(),
        n => format!("{n} adults"),
    };
    let pets = match dogs {
        0 => String::new(),
        1 => "1 dog".to_string(),
        n => format!("{n} dogs"),
    };
    match (people.is_empty(), pets.is_empty()) {
        (false, false) => format!("{people}, {pets}"),
        (false, true) => people,
        (true, false) => pets,
        (true, true) => String::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn linear() -> PriceList {
        PriceList {
            adult: Decimal::new(50, 0),
            dog: Decimal::new(25, 0),
            pricing_type: PricingType::Linear,
        }
    }

    #[test]
    fn test_linear_two_guests_one_dog() {
        let quote = linear().quote(2, 1).unwrap();
        assert_eq!(quote.total(), Decimal::new(12500, 2));
        assert_eq!(quote.total_cents, 12_500);
        let sum: i64 = quote.lines.iter().map(QuoteLine::amount_cents).sum();
        assert_eq!(sum, 12_500);
        assert_eq!(quote.lines.len(), 2);
        assert_eq!(quote.lines[0].quantity, 2);
        assert_eq!(quote.lines[1].unit_amount_cents, 2_500);
    }

    #[test]
    fn test_flat_pricing_charges_group_once() {
        let prices = PriceList {
            pricing_type: PricingType::Flat,
            ..linear()
        };
        let quote = prices.quote(4, 2).unwrap();
        assert_eq!(quote.total_cents, 5_000 + 2 * 2_500);
        assert_eq!(quote.lines[0].quantity, 1);
        assert_eq!(quote.lines[0].label, "Group (4 adults)");
    }

    #[test]
    fn test_free_dogs_are_omitted() {
        let prices = PriceList {
            dog: Decimal::ZERO,
            ..linear()
        };
        let quote = prices.quote(1, 3).unwrap();
        assert_eq!(quote.lines.len(), 1);
        assert_eq!(quote.total_cents, 5_000);
    }

    #[test]
    fn test_fractional_cents_round_per_unit() {
        let prices = PriceList {
            adult: Decimal::new(33_335, 3),
            dog: Decimal::ZERO,
            pricing_type: PricingType::Linear,
        };
        let quote = prices.quote(3, 0).unwrap();
        assert_eq!(quote.lines[0].unit_amount_cents, 3_334);
        assert_eq!(quote.total_cents, 3 * 3_334);
    }

    #[test]
    fn test_invalid_parties() {
        assert_eq!(linear().quote(0, 1), Err(PricingError::NoGuests));
        assert!(matches!(
            linear().quote(MAX_GUESTS + 1, 0),
            Err(PricingError::PartyTooLarge { .. })
        ));
    }

    #[test]
    fn test_zero_total_rejected() {
        let prices = PriceList {
            adult: Decimal::ZERO,
            dog: Decimal::ZERO,
            pricing_type: PricingType::Linear,
        };
        assert_eq!(prices.quote(2, 0), Err(PricingError::ZeroTotal));
    }

    #[test]
    fn test_pricing_type_parse() {
        assert_eq!("linear".parse::<PricingType>().unwrap(), PricingType::Linear);
        assert_eq!("FLAT".parse::<PricingType>().unwrap(), PricingType::Flat);
        assert!("tiered".parse::<PricingType>().is_err());
    }

    #[test]
    fn test_supplier_cost_total() {
        let costs = CostList {
            adult: Some(Decimal::new(30, 0)),
            dog: Some(Decimal::new(10, 0)),
        };
        assert_eq!(costs.total(2, 1), Some(Decimal::new(70, 0)));
        assert_eq!(CostList::default().total(2, 1), None);
        let zero = CostList {
            adult: Some(Decimal::ZERO),
            dog: None,
        };
        assert_eq!(zero.total(3, 0), None);
    }

    #[test]
    fn test_describe_party() {
        assert_eq!(describe_party(2, 1), "2 adults, 1 dog");
        assert_eq!(describe_party(1, 0), "1 adult");
        assert_eq!(describe_party(3, 2), "3 adults, 2 dogs");
    }
}

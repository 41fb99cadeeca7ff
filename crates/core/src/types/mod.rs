//! Core types for the booking bridge.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod id;
pub mod money;
pub mod pricing;
pub mod reference;
pub mod status;
pub mod tax;

pub use email::{Email, EmailError};
pub use id::*;
pub use money::{
    Money, MoneyError, round_half_up, tax_exclusive_unit_price, tax_inclusive_total, to_minor_units,
};
pub use pricing::{
    CostList, MAX_DOGS, MAX_GUESTS, PriceList, PricingError, PricingType, Quote, QuoteLine,
    describe_party,
};
pub use reference::{BOOKING_FRAGMENT_LEN, ReferenceKind, ReferenceTag};
pub use status::*;
pub use tax::{TaxIdError, VatNumber, fiscal_code_for_partner, normalize_fiscal_code};

//! Tax identifiers: EU VAT numbers and Italian fiscal codes.
//!
//! Odoo keeps the company VAT in `vat` and the individual tax id in
//! `l10n_it_codice_fiscale`. The two must never hold the same value, and the
//! VAT is always stored with its issuing-country prefix.

use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when parsing tax identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaxIdError {
    /// Nothing left after stripping separators.
    #[error("tax identifier cannot be empty")]
    Empty,
    /// Characters other than ASCII letters and digits.
    #[error("tax identifier contains invalid characters: {0}")]
    InvalidCharacters(String),
    /// The fallback country is not a two-letter code.
    #[error("invalid country code: {0}")]
    InvalidCountry(String),
}

/// A VAT number normalized to `CC` + digits/letters, upper case, no separators.
///
/// ```
/// use booking_bridge_core::VatNumber;
///
/// let vat = VatNumber::parse("12345678901", "IT").unwrap();
/// assert_eq!(vat.as_str(), "IT12345678901");
/// assert_eq!(vat.country_code(), "IT");
///
/// let de = VatNumber::parse("de 123.456.789", "IT").unwrap();
/// assert_eq!(de.as_str(), "DE123456789");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VatNumber(String);

impl VatNumber {
    /// Normalize `raw`, adding `default_country` when no prefix is present.
    ///
    /// # Errors
    ///
    /// Returns `TaxIdError` for empty input, stray characters, or a malformed
    /// fallback country.
    pub fn parse(raw: &str, default_country: &str) -> Result<Self, TaxIdError> {
        let compact = compact(raw);
        if compact.is_empty() {
            return Err(TaxIdError::Empty);
        }
        if !compact.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TaxIdError::InvalidCharacters(raw.to_string()));
        }

        if has_country_prefix(&compact) {
            return Ok(Self(compact));
        }

        let country = default_country.trim().to_ascii_uppercase();
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(TaxIdError::InvalidCountry(default_country.to_string()));
        }
        Ok(Self(format!("{country}{compact}")))
    }

    /// The full normalized value, prefix included.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The VAT prefix as written (`EL` for Greece).
    #[must_use]
    pub fn country_code(&self) -> &str {
        self.0.get(..2).unwrap_or_default()
    }

    /// ISO 3166 country of the issuing authority.
    ///
    /// Differs from the prefix only for Greece (`EL` -> `GR`).
    #[must_use]
    pub fn iso_country(&self) -> &str {
        match self.country_code() {
            "EL" => "GR",
            other => other,
        }
    }

    /// The number without its country prefix.
    #[must_use]
    pub fn number(&self) -> &str {
        self.0.get(2..).unwrap_or_default()
    }

    /// Whether `other` denotes this VAT number, with or without prefix.
    #[must_use]
    pub fn matches(&self, other: &str) -> bool {
        let other = compact(other);
        other == self.0 || other == self.number()
    }
}

impl fmt::Display for VatNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize an Italian fiscal code: upper case, separators removed.
///
/// Returns `None` for blank input.
#[must_use]
pub fn normalize_fiscal_code(raw: &str) -> Option<String> {
    let code = compact(raw);
    (!code.is_empty()).then_some(code)
}

/// Value for `l10n_it_codice_fiscale`.
///
/// Consumers always carry their fiscal code. Businesses carry it only when it
/// differs from the VAT number, since sole traders often use the same digits.
#[must_use]
pub fn fiscal_code_for_partner(
    is_b2b: bool,
    fiscal_code: Option<&str>,
    vat: Option<&VatNumber>,
) -> Option<String> {
    let code = fiscal_code.and_then(normalize_fiscal_code)?;
    if !is_b2b {
        return Some(code);
    }
    match vat {
        Some(vat) if vat.matches(&code) => None,
        _ => Some(code),
    }
}

fn compact(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '.' | '-' | '/' | '_'))
        .collect::<String>()
        .to_ascii_uppercase()
}

fn has_country_prefix(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(a), Some(b)) if a.is_ascii_alphabetic() && b.is_ascii_alphabetic()
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_vat_gets_default_prefix() {
        let vat = VatNumber::parse(" 123 456 789 01 ", "it").unwrap();
        assert_eq!(vat.as_str(), "IT12345678901");
        assert_eq!(vat.number(), "12345678901");
    }

    #[test]
    fn test_vat_keeps_foreign_prefix() {
        let vat = VatNumber::parse("FR-40303265045", "IT").unwrap();
        assert_eq!(vat.as_str(), "FR40303265045");
        assert_eq!(vat.iso_country(), "FR");
    }

    #[test]
    fn test_greek_prefix_maps_to_iso() {
        let vat = VatNumber::parse("EL094259216", "IT").unwrap();
        assert_eq!(vat.country_code(), "EL");
        assert_eq!(vat.iso_country(), "GR");
    }

    #[test]
    fn test_vat_rejects_garbage() {
        assert_eq!(VatNumber::parse("  ", "IT"), Err(TaxIdError::Empty));
        assert!(matches!(
            VatNumber::parse("IT123#45", "IT"),
            Err(TaxIdError::InvalidCharacters(_))
        ));
        assert!(matches!(
            VatNumber::parse("12345", "ITA"),
            Err(TaxIdError::InvalidCountry(_))
        ));
    }

    #[test]
    fn test_consumer_keeps_fiscal_code() {
        assert_eq!(
            fiscal_code_for_partner(false, Some("rssmra80a01h501u"), None).as_deref(),
            Some("RSSMRA80A01H501U")
        );
        assert_eq!(fiscal_code_for_partner(false, Some("  "), None), None);
    }

    #[test]
    fn test_business_drops_fiscal_code_equal_to_vat() {
        let vat = VatNumber::parse("12345678901", "IT").unwrap();
        assert_eq!(
            fiscal_code_for_partner(true, Some("12345678901"), Some(&vat)),
            None
        );
        assert_eq!(
            fiscal_code_for_partner(true, Some("IT12345678901"), Some(&vat)),
            None
        );
        assert_eq!(
            fiscal_code_for_partner(true, Some("RSSMRA80A01H501U"), Some(&vat)).as_deref(),
            Some("RSSMRA80A01H501U")
        );
    }
}

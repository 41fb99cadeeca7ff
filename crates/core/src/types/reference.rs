//! Reference tags embedded in free-text order line descriptions.
//!
//! When an Odoo database lacks a queryable field linking a purchase line back
//! to the sale that caused it, the link lives in the line description as a
//! delimited tag:
//!
//! ```text
//! Kayak tour - 2026-07-01 - 2 adults [ref:SO=S00042] [ref:BK=5f1c9a2e]
//! ```
//!
//! Tags are matched by parsing, never by substring search, so `S00042` does
//! not match a line tagged `S000421`.

use std::fmt;

use serde::{Deserialize, Serialize};

const TAG_OPEN: &str = "[ref:";
const TAG_CLOSE: char = ']';

/// Length of the booking id fragment used as the secondary key.
pub const BOOKING_FRAGMENT_LEN: usize = 8;

/// What a reference tag points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// Odoo sale order name (e.g. `S00042`); primary dedup key.
    SaleOrder,
    /// Leading fragment of the booking id; secondary dedup key.
    Booking,
}

impl ReferenceKind {
    const fn code(self) -> &'static str {
        match self {
            Self::SaleOrder => "SO",
            Self::Booking => "BK",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "SO" => Some(Self::SaleOrder),
            "BK" => Some(Self::Booking),
            _ => None,
        }
    }
}

/// A parsed `[ref:KIND=value]` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceTag {
    /// Tag kind.
    pub kind: ReferenceKind,
    /// Tag value, free of whitespace and delimiters.
    pub value: String,
}

impl ReferenceTag {
    /// Tag for a sale order name. Returns `None` if nothing usable remains
    /// after stripping whitespace and delimiter characters.
    #[must_use]
    pub fn sale_order(name: &str) -> Option<Self> {
        Self::new(ReferenceKind::SaleOrder, name)
    }

    /// Tag for a booking id, truncated to [`BOOKING_FRAGMENT_LEN`] characters.
    #[must_use]
    pub fn booking(booking_id: &str) -> Option<Self> {
        let fragment: String = sanitize(booking_id)
            .chars()
            .take(BOOKING_FRAGMENT_LEN)
            .collect();
        Self::new(ReferenceKind::Booking, &fragment)
    }

    fn new(kind: ReferenceKind, value: &str) -> Option<Self> {
        let value = sanitize(value);
        (!value.is_empty()).then_some(Self { kind, value })
    }

    /// Parse every well-formed tag in `text`, ignoring malformed ones.
    #[must_use]
    pub fn parse_all(text: &str) -> Vec<Self> {
        let mut tags = Vec::new();
        let mut rest = text;
        while let Some(start) = rest.find(TAG_OPEN) {
            let after = &rest[start + TAG_OPEN.len()..];
            let Some(end) = after.find(TAG_CLOSE) else {
                break;
            };
            let body = &after[..end];
            if let Some((code, value)) = body.split_once('=')
                && let Some(kind) = ReferenceKind::from_code(code)
                && !value.is_empty()
                && sanitize(value) == value
            {
                tags.push(Self {
                    kind,
                    value: value.to_string(),
                });
            }
            rest = &after[end + 1..];
        }
        tags
    }

    /// Whether `text` carries exactly this tag.
    #[must_use]
    pub fn is_in(&self, text: &str) -> bool {
        Self::parse_all(text).iter().any(|tag| tag == self)
    }

    /// Append the tags to a description, separated by spaces.
    #[must_use]
    pub fn annotate(description: &str, tags: &[Self]) -> String {
        let mut out = description.trim_end().to_string();
        for tag in tags {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&tag.to_string());
        }
        out
    }
}

impl fmt::Display for ReferenceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TAG_OPEN}{}={}{TAG_CLOSE}", self.kind.code(), self.value)
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '[' | ']' | '='))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_render_and_parse() {
        let so = ReferenceTag::sale_order("S00042").unwrap();
        let bk = ReferenceTag::booking("5f1c9a2e-7b1d-4c1e-9a6b-0c8e2f3d4a5b").unwrap();
        assert_eq!(so.to_string(), "[ref:SO=S00042]");
        assert_eq!(bk.to_string(), "[ref:BK=5f1c9a2e]");

        let text = ReferenceTag::annotate("Kayak tour - 2 adults", &[so.clone(), bk.clone()]);
        assert_eq!(
            text,
            "Kayak tour - 2 adults [ref:SO=S00042] [ref:BK=5f1c9a2e]"
        );
        assert_eq!(ReferenceTag::parse_all(&text), vec![so, bk]);
    }

    #[test]
    fn test_no_substring_false_positive() {
        let tag = ReferenceTag::sale_order("S00042").unwrap();
        assert!(!tag.is_in("Tour [ref:SO=S000421]"));
        assert!(!tag.is_in("Tour for order S00042"));
        assert!(tag.is_in("Tour [ref:SO=S00042]"));
    }

    #[test]
    fn test_malformed_tags_ignored() {
        let tags = ReferenceTag::parse_all("[ref:XX=1] [ref:SO=] [ref:SO=a b] [ref:SO=ok");
        assert!(tags.is_empty());
    }

    #[test]
    fn test_sanitize_strips_delimiters() {
        let tag = ReferenceTag::sale_order(" S0[00]42 ").unwrap();
        assert_eq!(tag.value, "S00042");
        assert!(ReferenceTag::sale_order("  ").is_none());
    }
}

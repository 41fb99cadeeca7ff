//! Status enums for bookings, checkout sessions and Odoo documents.

use serde::{Deserialize, Serialize};

/// Lifecycle of a booking row in the booking store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "booking_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Checkout started, payment not yet received.
    #[default]
    Pending,
    /// Paid and reconciled.
    Confirmed,
    /// Cancelled or refunded.
    Cancelled,
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Gateway-agnostic checkout session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    Paid,
    Pending,
    Expired,
    Failed,
    Unknown,
}

impl CheckoutStatus {
    /// Map a Stripe `payment_status`/`status` pair.
    ///
    /// `payment_status` wins when it is decisive; the session `status` only
    /// distinguishes open from expired sessions.
    #[must_use]
    pub fn from_stripe(payment_status: Option<&str>, status: Option<&str>) -> Self {
        match (payment_status, status) {
            (Some("paid" | "no_payment_required"), _) => Self::Paid,
            (_, Some("expired")) => Self::Expired,
            (Some("unpaid"), Some("open" | "complete")) | (None, Some("open")) => Self::Pending,
            (Some("failed"), _) => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Whether the customer has been charged.
    #[must_use]
    pub const fn is_paid(self) -> bool {
        matches!(self, Self::Paid)
    }
}

impl std::str::FromStr for CheckoutStatus {
    type Err = std::convert::Infallible;

    /// Unknown values map to [`CheckoutStatus::Unknown`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "paid" | "succeeded" | "complete" => Self::Paid,
            "pending" | "open" | "processing" => Self::Pending,
            "expired" => Self::Expired,
            "failed" | "canceled" | "cancelled" => Self::Failed,
            _ => Self::Unknown,
        })
    }
}

/// Kind of bookable product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "product_type", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    #[default]
    Experience,
    Class,
    Trip,
}

impl ProductType {
    /// Value written to `x_product_type` and to checkout metadata.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Experience => "experience",
            Self::Class => "class",
            Self::Trip => "trip",
        }
    }
}

impl std::fmt::Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProductType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "experience" => Ok(Self::Experience),
            "class" => Ok(Self::Class),
            "trip" => Ok(Self::Trip),
            other => Err(format!("invalid product type: {other}")),
        }
    }
}

/// State of an Odoo `sale.order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleOrderState {
    Draft,
    Sent,
    Sale,
    Done,
    Cancel,
}

impl SaleOrderState {
    /// Parse the raw `state` selection value; `None` for anything unexpected.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "sale" => Some(Self::Sale),
            "done" => Some(Self::Done),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }

    /// `sale` and `done` both count as confirmed.
    #[must_use]
    pub const fn is_confirmed(self) -> bool {
        matches!(self, Self::Sale | Self::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_status_from_stripe() {
        assert_eq!(
            CheckoutStatus::from_stripe(Some("paid"), Some("complete")),
            CheckoutStatus::Paid
        );
        assert_eq!(
            CheckoutStatus::from_stripe(Some("unpaid"), Some("open")),
            CheckoutStatus::Pending
        );
        assert_eq!(
            CheckoutStatus::from_stripe(Some("unpaid"), Some("expired")),
            CheckoutStatus::Expired
        );
        assert_eq!(
            CheckoutStatus::from_stripe(Some("weird"), None),
            CheckoutStatus::Unknown
        );
    }

    #[test]
    fn test_checkout_status_parse_is_total() {
        assert_eq!("PAID".parse(), Ok(CheckoutStatus::Paid));
        assert_eq!("zzz".parse(), Ok(CheckoutStatus::Unknown));
    }

    #[test]
    fn test_product_type_roundtrip() {
        for ty in [ProductType::Experience, ProductType::Class, ProductType::Trip] {
            assert_eq!(ty.as_str().parse::<ProductType>(), Ok(ty));
        }
        assert!("tour".parse::<ProductType>().is_err());
    }

    #[test]
    fn test_sale_order_state() {
        assert!(SaleOrderState::parse("sale").is_some_and(SaleOrderState::is_confirmed));
        assert!(SaleOrderState::parse("draft").is_some_and(|s| !s.is_confirmed()));
        assert_eq!(SaleOrderState::parse("bogus"), None);
    }
}

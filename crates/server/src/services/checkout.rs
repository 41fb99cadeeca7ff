//! Hosted checkout creation.
//!
//! Validates the request without touching the gateway, checks the product
//! and slot in the booking store, prices the party, and opens a checkout
//! session whose line items sum to the quoted total. Booking metadata goes on
//! both the session and its payment intent so the webhook can reconcile from
//! either. Seats are only taken when the payment succeeds.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use booking_bridge_core::{Email, PricingError, ProductType, QuoteLine, VatNumber};

use super::metadata::BookingMetadata;
use crate::db::{BookingStore, RepositoryError};
use crate::payments::{CheckoutRequest, GatewayError, GatewayKind, Gateways};

/// Characters used in order number suffixes. No `0/O` or `1/I`.
const ORDER_SUFFIX_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const ORDER_SUFFIX_LEN: usize = 6;

/// Errors that can occur when creating a checkout.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The request is malformed.
    #[error("{0}")]
    Validation(String),

    /// Product or slot does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Not enough seats left.
    #[error("only {remaining} places left for this date")]
    SlotUnavailable { remaining: u32 },

    /// The party cannot be priced.
    #[error(transparent)]
    Pricing(#[from] PricingError),

    /// The gateway rejected the session.
    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Catalog lookup failed.
    #[error("booking store error: {0}")]
    Store(#[from] RepositoryError),
}

/// Billing address supplied at checkout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressPayload {
    pub street: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub province: Option<String>,
    pub country: Option<String>,
}

/// Customer supplied at checkout.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerPayload {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub company_name: Option<String>,
    pub vat_number: Option<String>,
    pub fiscal_code: Option<String>,
    pub sdi_code: Option<String>,
    pub pec_email: Option<String>,
    #[serde(default)]
    pub address: AddressPayload,
}

/// Body of `POST /api/checkout`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutPayload {
    pub product_id: Uuid,
    pub product_type: Option<ProductType>,
    pub availability_slot_id: Uuid,
    /// Booking date, `YYYY-MM-DD`.
    pub date: String,
    pub time_slot: Option<String>,
    pub guests: u32,
    #[serde(default)]
    pub dogs: u32,
    pub success_url: String,
    pub cancel_url: String,
    pub customer: CustomerPayload,
    #[serde(rename = "isB2B", default)]
    pub is_b2b: bool,
    /// Explicit gateway; the configured default otherwise.
    pub gateway: Option<GatewayKind>,
}

/// A created checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: String,
    pub order_number: String,
    pub total: Decimal,
}

/// Request fields after validation.
#[derive(Debug)]
struct ValidCheckout {
    date: NaiveDate,
    email: Email,
    vat: Option<VatNumber>,
}

/// Creates hosted checkouts.
#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn BookingStore>,
    gateways: Gateways,
    default_country: String,
}

impl CheckoutService {
    #[must_use]
    pub fn new(store: Arc<dyn BookingStore>, gateways: Gateways, default_country: String) -> Self {
        Self {
            store,
            gateways,
            default_country,
        }
    }

    /// Validate, price and open a checkout session.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError` for invalid input, unknown or unavailable
    /// product and slot, unpriceable parties, and gateway failures.
    #[instrument(skip(self, payload), fields(product_id = %payload.product_id, guests = payload.guests))]
    pub async fn create(&self, payload: &CheckoutPayload) -> Result<CheckoutResponse, CheckoutError> {
        let valid = self.validate(payload)?;

        let product = self
            .store
            .find_product(payload.product_id)
            .await?
            .filter(|p| p.active)
            .ok_or(CheckoutError::NotFound("product"))?;
        if let Some(requested) = payload.product_type
            && requested != product.product_type
        {
            return Err(CheckoutError::Validation(format!(
                "product is a {}, not a {requested}",
                product.product_type
            )));
        }

        let slot = self
            .store
            .find_slot(payload.availability_slot_id)
            .await?
            .ok_or(CheckoutError::NotFound("availability slot"))?;
        if slot.product_id != product.id {
            return Err(CheckoutError::Validation(
                "availability slot does not belong to this product".to_string(),
            ));
        }
        if slot.date != valid.date {
            return Err(CheckoutError::Validation(
                "availability slot is for a different date".to_string(),
            ));
        }
        if !slot.fits(payload.guests) {
            return Err(CheckoutError::SlotUnavailable {
                remaining: slot.remaining(),
            });
        }

        let quote = product.prices.quote(payload.guests, payload.dogs)?;
        let order_number = generate_order_number(Utc::now().date_naive());
        let time_slot = payload.time_slot.clone().or_else(|| slot.time_slot.clone());

        let customer = &payload.customer;
        let metadata = BookingMetadata {
            order_number: Some(order_number.clone()),
            product_id: Some(product.id.to_string()),
            product_type: Some(product.product_type.to_string()),
            product_name: Some(product.name.clone()),
            availability_slot_id: Some(slot.id.to_string()),
            booking_date: Some(valid.date.format("%Y-%m-%d").to_string()),
            time_slot,
            guests: Some(payload.guests.to_string()),
            dogs: Some(payload.dogs.to_string()),
            customer_email: Some(valid.email.as_str().to_string()),
            customer_name: Some(customer.name.trim().to_string()),
            customer_phone: non_blank(customer.phone.as_deref()),
            is_b2b: Some(payload.is_b2b.to_string()),
            company_name: non_blank(customer.company_name.as_deref()).filter(|_| payload.is_b2b),
            vat_number: valid.vat.as_ref().map(|vat| vat.as_str().to_string()),
            fiscal_code: non_blank(customer.fiscal_code.as_deref()),
            sdi_code: non_blank(customer.sdi_code.as_deref()).filter(|_| payload.is_b2b),
            pec_email: non_blank(customer.pec_email.as_deref()).filter(|_| payload.is_b2b),
            street: non_blank(customer.address.street.as_deref()),
            city: non_blank(customer.address.city.as_deref()),
            zip: non_blank(customer.address.zip.as_deref()),
            province: non_blank(customer.address.province.as_deref()),
            country: non_blank(customer.address.country.as_deref()),
        };

        let line_items = quote
            .lines
            .iter()
            .map(|line| QuoteLine {
                label: format!("{} - {}", product.name, line.label),
                unit_amount_cents: line.unit_amount_cents,
                quantity: line.quantity,
            })
            .collect();
        let request = CheckoutRequest {
            order_number: order_number.clone(),
            currency: "eur".to_string(),
            line_items,
            customer_email: valid.email.as_str().to_string(),
            success_url: payload.success_url.clone(),
            cancel_url: payload.cancel_url.clone(),
            metadata: metadata.to_map(),
        };

        let gateway = self.gateways.select(payload.gateway, None)?;
        let created = gateway.create_checkout_session(&request).await?;
        tracing::info!(
            order_number = %order_number,
            session_id = %created.session_id,
            gateway = %gateway.kind(),
            total_cents = quote.total_cents,
            "Checkout session created"
        );

        Ok(CheckoutResponse {
            session_id: created.session_id,
            url: created.url,
            order_number,
            total: quote.total(),
        })
    }

    fn validate(&self, payload: &CheckoutPayload) -> Result<ValidCheckout, CheckoutError> {
        if payload.guests == 0 {
            return Err(CheckoutError::Validation("at least one guest is required".to_string()));
        }
        for (name, value) in [
            ("successUrl", &payload.success_url),
            ("cancelUrl", &payload.cancel_url),
        ] {
            let valid = url::Url::parse(value)
                .is_ok_and(|url| matches!(url.scheme(), "http" | "https"));
            if !valid {
                return Err(CheckoutError::Validation(format!(
                    "{name} must be an http(s) URL"
                )));
            }
        }

        let email = Email::parse(&payload.customer.email)
            .map_err(|e| CheckoutError::Validation(e.to_string()))?;
        if payload.customer.name.trim().is_empty() {
            return Err(CheckoutError::Validation("customer name is required".to_string()));
        }
        let date = NaiveDate::parse_from_str(payload.date.trim(), "%Y-%m-%d")
            .map_err(|_| CheckoutError::Validation("date must be YYYY-MM-DD".to_string()))?;

        let vat = if payload.is_b2b {
            if non_blank(payload.customer.company_name.as_deref()).is_none() {
                return Err(CheckoutError::Validation(
                    "company name is required for business bookings".to_string(),
                ));
            }
            let raw = non_blank(payload.customer.vat_number.as_deref()).ok_or_else(|| {
                CheckoutError::Validation("VAT number is required for business bookings".to_string())
            })?;
            Some(
                VatNumber::parse(&raw, &self.default_country)
                    .map_err(|e| CheckoutError::Validation(e.to_string()))?,
            )
        } else {
            None
        };

        Ok(ValidCheckout { date, email, vat })
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `BK-YYYYMMDD-XXXXXX` with a random suffix.
#[must_use]
pub fn generate_order_number(date: NaiveDate) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..ORDER_SUFFIX_LEN)
        .filter_map(|_| {
            ORDER_SUFFIX_CHARSET
                .get(rng.random_range(0..ORDER_SUFFIX_CHARSET.len()))
                .map(|&c| char::from(c))
        })
        .collect();
    format!("BK-{}-{suffix}", date.format("%Y%m%d"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use booking_bridge_core::CheckoutStatus;

    use super::*;
    use crate::payments::{PaymentGateway, SandboxGateway};
    use crate::testing::MemoryBookingStore;
    use crate::testing::fixtures::{self, Catalog, SLOT_DATE};

    struct Harness {
        store: Arc<MemoryBookingStore>,
        sandbox: Arc<SandboxGateway>,
        catalog: Catalog,
        service: CheckoutService,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryBookingStore::new());
        let catalog = fixtures::seed_catalog(&store);
        let sandbox = Arc::new(SandboxGateway::new());
        let gateways = Gateways::new(GatewayKind::Sandbox).with(sandbox.clone());
        let service = CheckoutService::new(store.clone(), gateways, "IT".to_string());
        Harness {
            store,
            sandbox,
            catalog,
            service,
        }
    }

    fn payload(catalog: &Catalog) -> CheckoutPayload {
        serde_json::from_value(serde_json::json!({
            "productId": catalog.product.id,
            "productType": "experience",
            "availabilitySlotId": catalog.slot.id,
            "date": SLOT_DATE,
            "guests": 2,
            "dogs": 1,
            "successUrl": "https://example.com/booking/success",
            "cancelUrl": "https://example.com/booking/cancel",
            "customer": {
                "email": "mario.rossi@example.com",
                "name": "Mario Rossi",
                "address": { "city": "Roma", "province": "RM", "country": "IT" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_order_number_format() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let number = generate_order_number(date);
        assert_eq!(number.len(), "BK-20260701-".len() + ORDER_SUFFIX_LEN);
        assert!(number.starts_with("BK-20260701-"));
        assert!(
            number["BK-20260701-".len()..]
                .bytes()
                .all(|c| ORDER_SUFFIX_CHARSET.contains(&c))
        );
    }

    #[tokio::test]
    async fn test_checkout_prices_and_tags_session() {
        let h = harness();
        let response = h.service.create(&payload(&h.catalog)).await.unwrap();
        assert_eq!(response.total, Decimal::new(125, 0));

        let raw = h.sandbox.get_checkout_session(&response.session_id).await.unwrap();
        assert_eq!(raw["amount_total"], serde_json::json!(12500));

        let session = h
            .sandbox
            .fetch_checkout_session(&response.session_id)
            .await
            .unwrap();
        assert_eq!(session.status, CheckoutStatus::Pending);
        let metadata = BookingMetadata::from_map(&session.metadata);
        assert!(metadata.missing_required().is_empty());
        assert_eq!(metadata.order_number.as_deref(), Some(response.order_number.as_str()));
        assert_eq!(metadata.time_slot.as_deref(), Some("09:30"));
        assert_eq!(metadata.province.as_deref(), Some("RM"));
        assert!(!metadata.is_b2b());
        // Seats are taken by the webhook, not at checkout
        assert_eq!(h.store.slot(h.catalog.slot.id).unwrap().booked, 0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_requests() {
        let h = harness();
        let cases: [(&str, fn(&mut CheckoutPayload)); 5] = [
            ("no guests", |p| p.guests = 0),
            ("bad url", |p| p.success_url = "javascript:alert(1)".to_string()),
            ("bad email", |p| p.customer.email = "nope".to_string()),
            ("bad date", |p| p.date = "01/07/2026".to_string()),
            ("b2b without company", |p| p.is_b2b = true),
        ];
        for (name, mutate) in cases {
            let mut request = payload(&h.catalog);
            mutate(&mut request);
            assert!(
                matches!(h.service.create(&request).await, Err(CheckoutError::Validation(_))),
                "{name}"
            );
        }
    }

    #[tokio::test]
    async fn test_b2b_requires_valid_vat() {
        let h = harness();
        let mut request = payload(&h.catalog);
        request.is_b2b = true;
        request.customer.company_name = Some("Acme SRL".to_string());
        request.customer.vat_number = Some("12345678903".to_string());
        let response = h.service.create(&request).await.unwrap();

        let session = h
            .sandbox
            .fetch_checkout_session(&response.session_id)
            .await
            .unwrap();
        let metadata = BookingMetadata::from_map(&session.metadata);
        assert_eq!(metadata.company_name.as_deref(), Some("Acme SRL"));
        assert_eq!(metadata.vat_number.as_deref(), Some("IT12345678903"));
    }

    #[tokio::test]
    async fn test_slot_checks() {
        let h = harness();

        let mut request = payload(&h.catalog);
        request.guests = 11;
        assert!(matches!(
            h.service.create(&request).await,
            Err(CheckoutError::SlotUnavailable { remaining: 10 })
        ));

        let mut request = payload(&h.catalog);
        request.date = "2026-07-02".to_string();
        assert!(matches!(
            h.service.create(&request).await,
            Err(CheckoutError::Validation(_))
        ));

        let other = fixtures::slot(Uuid::new_v4(), 10);
        h.store.add_slot(other.clone());
        let mut request = payload(&h.catalog);
        request.availability_slot_id = other.id;
        assert!(matches!(
            h.service.create(&request).await,
            Err(CheckoutError::Validation(_))
        ));

        let mut request = payload(&h.catalog);
        request.product_id = Uuid::new_v4();
        assert!(matches!(
            h.service.create(&request).await,
            Err(CheckoutError::NotFound("product"))
        ));
    }
}

//! Catalog and webhook fixtures.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use uuid::Uuid;

use booking_bridge_core::{CostList, PriceList, PricingType, ProductType};

use super::MemoryBookingStore;
use crate::models::{AvailabilitySlot, CatalogProduct, Provider};
use crate::payments::sign_payload;

/// Webhook secret used by test configurations.
pub const WEBHOOK_SECRET: &str = "whsec_test_Zq8vN3kLm2Px7RtY4wB9";

/// Date of the seeded slot.
pub const SLOT_DATE: &str = "2026-07-01";

/// A seeded provider, product and slot.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub provider: Provider,
    pub product: CatalogProduct,
    pub slot: AvailabilitySlot,
}

#[must_use]
pub fn provider() -> Provider {
    Provider {
        id: Uuid::new_v4(),
        name: "Lago Kayak SRL".to_string(),
        email: Some("ops@lagokayak.example".to_string()),
    }
}

/// Linear product at 50 per adult and 25 per dog, costing 30 per adult.
#[must_use]
pub fn product(provider_id: Option<Uuid>) -> CatalogProduct {
    CatalogProduct {
        id: Uuid::new_v4(),
        provider_id,
        name: "Kayak Tour".to_string(),
        description: Some("Two hours on the lake".to_string()),
        product_type: ProductType::Experience,
        prices: PriceList {
            adult: Decimal::new(50, 0),
            dog: Decimal::new(25, 0),
            pricing_type: PricingType::Linear,
        },
        costs: CostList {
            adult: Some(Decimal::new(30, 0)),
            dog: None,
        },
        odoo_product_id: None,
        active: true,
    }
}

#[must_use]
pub fn slot(product_id: Uuid, capacity: i32) -> AvailabilitySlot {
    AvailabilitySlot {
        id: Uuid::new_v4(),
        product_id,
        date: NaiveDate::parse_from_str(SLOT_DATE, "%Y-%m-%d").unwrap_or_default(),
        time_slot: Some("09:30".to_string()),
        capacity,
        booked: 0,
        created_at: Utc::now(),
    }
}

/// Seed `store` with one provider, product and slot of capacity 10.
#[must_use]
pub fn seed_catalog(store: &MemoryBookingStore) -> Catalog {
    let provider = provider();
    let product = product(Some(provider.id));
    let slot = slot(product.id, 10);
    store.add_provider(provider.clone());
    store.add_product(product.clone());
    store.add_slot(slot.clone());
    Catalog {
        provider,
        product,
        slot,
    }
}

/// Intent metadata for 2 adults and 1 dog on the seeded slot.
#[must_use]
pub fn intent_metadata(catalog: &Catalog) -> Value {
    json!({
        "order_number": "BK-20260701-AB12CD",
        "product_id": catalog.product.id.to_string(),
        "product_type": "experience",
        "product_name": catalog.product.name,
        "availability_slot_id": catalog.slot.id.to_string(),
        "booking_date": SLOT_DATE,
        "time_slot": "09:30",
        "guests": "2",
        "dogs": "1",
        "customer_email": "mario.rossi@example.com",
        "customer_name": "Mario Rossi",
        "is_b2b": "false",
        "country": "IT"
    })
}

/// A `payment_intent.succeeded` event body charging 125.00 EUR.
#[must_use]
pub fn payment_succeeded_event(payment_intent_id: &str, metadata: &Value) -> Value {
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "object": "event",
        "type": "payment_intent.succeeded",
        "data": {
            "object": {
                "id": payment_intent_id,
                "object": "payment_intent",
                "amount": 12500,
                "amount_received": 12500,
                "currency": "eur",
                "metadata": metadata,
                "status": "succeeded"
            }
        }
    })
}

/// `Stripe-Signature` header for `payload` signed now with [`WEBHOOK_SECRET`].
#[must_use]
pub fn signature_header(payload: &[u8]) -> String {
    let timestamp = Utc::now().timestamp();
    format!(
        "t={timestamp},v1={}",
        sign_payload(WEBHOOK_SECRET, timestamp, payload)
    )
}

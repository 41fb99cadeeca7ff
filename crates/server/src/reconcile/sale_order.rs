//! One confirmed sale order per payment intent.
//!
//! # Lifecycle
//!
//! ```text
//! absent --create--> draft --action_confirm--> sale
//! ```
//!
//! The payment-intent id is the idempotency key. It is stored in the
//! standard `client_order_ref` field and, when the database has it, in
//! `x_stripe_payment_id`. A replay finds the existing order, refreshes its
//! metadata and never adds lines.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::instrument;

use booking_bridge_core::{
    ErpProductId, PartnerId, ProductType, SaleOrderId, SaleOrderLineId, SaleOrderState,
    describe_party, tax_exclusive_unit_price,
};

use super::{ReconcileError, ReconcileSettings, amount_value, insert_some, tax_command};
use crate::odoo::{
    OdooRpc, Reattach, Record, Values, create_with_fallback, record_id, record_str,
    write_with_fallback,
};

const MODEL: &str = "sale.order";
const PAYMENT_FIELD: &str = "x_stripe_payment_id";

/// Custom metadata fields on `sale.order`.
const CUSTOM_FIELDS: &[&str] = &[
    "x_product_id",
    "x_product_type",
    "x_customer_email",
    PAYMENT_FIELD,
    "x_fiscal_code",
    "x_address",
    "x_booking_date",
    "x_booking_time",
    "x_order_number",
];

/// Everything needed to create or refresh the sale order of one booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleOrderInput {
    pub payment_intent_id: String,
    /// Booking order number, stored as `origin`.
    pub order_number: String,
    pub partner_id: PartnerId,
    pub product_id: ErpProductId,
    /// Booking store product UUID.
    pub product_external_id: String,
    pub product_type: ProductType,
    pub product_name: String,
    pub customer_email: String,
    pub fiscal_code: Option<String>,
    pub address: Option<String>,
    pub booking_date: Option<String>,
    pub booking_time: Option<String>,
    pub guests: u32,
    pub dogs: u32,
    /// Charged amount, tax included, major units.
    pub total: Decimal,
}

/// `Product - date time - party`, skipping blank parts.
#[must_use]
pub fn booking_line_description(
    product_name: &str,
    date: Option<&str>,
    time: Option<&str>,
    guests: u32,
    dogs: u32,
) -> String {
    let when = [date, time]
        .into_iter()
        .flatten()
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let party = describe_party(guests, dogs);
    [product_name.trim(), when.as_str(), party.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" - ")
}

impl SaleOrderInput {
    /// Order line description; multiplicity lives here, never in the quantity.
    #[must_use]
    pub fn line_description(&self) -> String {
        booking_line_description(
            &self.product_name,
            self.booking_date.as_deref(),
            self.booking_time.as_deref(),
            self.guests,
            self.dogs,
        )
    }

    fn metadata(&self) -> Values {
        let mut values = Values::new();
        values.insert("client_order_ref".into(), json!(self.payment_intent_id));
        values.insert("origin".into(), json!(self.order_number));
        values.insert(PAYMENT_FIELD.into(), json!(self.payment_intent_id));
        values.insert("x_order_number".into(), json!(self.order_number));
        values.insert("x_product_type".into(), json!(self.product_type.as_str()));
        insert_some(&mut values, "x_product_id", Some(&self.product_external_id));
        insert_some(&mut values, "x_customer_email", Some(&self.customer_email));
        insert_some(&mut values, "x_fiscal_code", self.fiscal_code.as_deref());
        insert_some(&mut values, "x_address", self.address.as_deref());
        insert_some(&mut values, "x_booking_date", self.booking_date.as_deref());
        insert_some(&mut values, "x_booking_time", self.booking_time.as_deref());
        values
    }
}

/// Result of [`reconcile_sale_order`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleOrderOutcome {
    pub id: SaleOrderId,
    /// Odoo order name (e.g. `S00042`).
    pub name: String,
    /// Whether this call created the order.
    pub created: bool,
    /// Whether the order ended in a confirmed state.
    pub confirmed: bool,
    /// First order line, used to link purchase lines.
    pub line_id: Option<SaleOrderLineId>,
    /// Custom fields the database rejected.
    pub skipped_fields: Vec<String>,
}

/// Create or refresh the sale order for a payment and confirm it.
///
/// # Errors
///
/// Returns `ReconcileError::Validation` for a missing payment-intent id,
/// `ReconcileError::Pricing` if no unit price can be derived, and
/// `ReconcileError::Odoo` when the order cannot be found or created.
/// Confirmation problems are logged, never returned.
#[instrument(skip(rpc, input, settings), fields(payment_intent = %input.payment_intent_id))]
pub async fn reconcile_sale_order(
    rpc: &dyn OdooRpc,
    input: &SaleOrderInput,
    settings: &ReconcileSettings,
) -> Result<SaleOrderOutcome, ReconcileError> {
    let payment_intent_id = input.payment_intent_id.trim();
    if payment_intent_id.is_empty() {
        return Err(ReconcileError::Validation(
            "payment intent id is required".to_string(),
        ));
    }

    let (id, name, created, skipped_fields) = match find_by_payment(rpc, payment_intent_id).await? {
        Some(existing) => {
            let id = record_id(&existing).ok_or_else(|| {
                ReconcileError::Validation("sale order without id".to_string())
            })?;
            let outcome =
                write_with_fallback(rpc, MODEL, &[id], &input.metadata(), CUSTOM_FIELDS).await?;
            tracing::info!(sale_order_id = id, "Sale order already exists, refreshed metadata");
            let name = record_str(&existing, "name").unwrap_or_default().to_string();
            (id, name, false, outcome.skipped)
        }
        None => {
            let unit_price = tax_exclusive_unit_price(input.total, settings.sale_tax_rate)?;
            let mut line = Values::new();
            line.insert("product_id".into(), input.product_id.into());
            line.insert("name".into(), json!(input.line_description()));
            line.insert("product_uom_qty".into(), json!(1));
            line.insert("price_unit".into(), amount_value(unit_price));
            if let Some(taxes) = tax_command(settings.sale_tax_id) {
                line.insert("tax_id".into(), taxes);
            }

            let mut values = input.metadata();
            values.insert("partner_id".into(), input.partner_id.into());
            values.insert("order_line".into(), json!([[0, 0, line]]));

            let outcome =
                create_with_fallback(rpc, MODEL, &values, CUSTOM_FIELDS, Reattach::Together)
                    .await?;
            let id = outcome.id;
            tracing::info!(
                sale_order_id = id,
                %unit_price,
                degraded = outcome.degraded,
                "Created sale order"
            );
            let skipped = if outcome.skipped.is_empty() {
                outcome.skipped
            } else {
                // The combined write was rejected; keep every field the model accepts
                match write_with_fallback(rpc, MODEL, &[id], &input.metadata(), CUSTOM_FIELDS).await
                {
                    Ok(write) => write.skipped,
                    Err(e) => {
                        tracing::warn!(sale_order_id = id, error = %e, "Custom fields not attached");
                        outcome.skipped
                    }
                }
            };
            let name = read_name(rpc, id).await;
            (id, name, true, skipped)
        }
    };

    let confirmed = confirm(rpc, id).await;
    let line_id = first_line(rpc, id).await;

    Ok(SaleOrderOutcome {
        id: SaleOrderId::new(id),
        name,
        created,
        confirmed,
        line_id,
        skipped_fields,
    })
}

/// Existing order for the payment, by custom field or `client_order_ref`.
async fn find_by_payment(
    rpc: &dyn OdooRpc,
    payment_intent_id: &str,
) -> Result<Option<Record>, ReconcileError> {
    let fields = ["id", "name", "state"];
    let domain = json!([
        "|",
        [PAYMENT_FIELD, "=", payment_intent_id],
        ["client_order_ref", "=", payment_intent_id]
    ]);
    let rows = match rpc.search_read(MODEL, domain, &fields, Some(1)).await {
        Ok(rows) => rows,
        Err(e) if e.is_schema_drift() => {
            tracing::debug!("Payment field unavailable, searching client_order_ref");
            rpc.search_read(
                MODEL,
                json!([["client_order_ref", "=", payment_intent_id]]),
                &fields,
                Some(1),
            )
            .await?
        }
        Err(e) => return Err(e.into()),
    };
    Ok(rows.into_iter().next())
}

async fn read_state(rpc: &dyn OdooRpc, id: i64) -> Option<SaleOrderState> {
    match rpc.read(MODEL, &[id], &["state"]).await {
        Ok(rows) => rows
            .first()
            .and_then(|row| record_str(row, "state"))
            .and_then(SaleOrderState::parse),
        Err(e) => {
            tracing::warn!(sale_order_id = id, error = %e, "Could not read sale order state");
            None
        }
    }
}

async fn read_name(rpc: &dyn OdooRpc, id: i64) -> String {
    match rpc.read(MODEL, &[id], &["name"]).await {
        Ok(rows) => rows
            .first()
            .and_then(|row| record_str(row, "name"))
            .unwrap_or_default()
            .to_string(),
        Err(e) => {
            tracing::warn!(sale_order_id = id, error = %e, "Could not read sale order name");
            String::new()
        }
    }
}

/// Confirm the order; an already-confirmed order counts as success.
///
/// When `action_confirm` leaves the order unconfirmed, `state` is written
/// directly.
async fn confirm(rpc: &dyn OdooRpc, id: i64) -> bool {
    if read_state(rpc, id).await.is_some_and(SaleOrderState::is_confirmed) {
        return true;
    }

    match rpc.call(MODEL, "action_confirm", &[id]).await {
        Ok(_) => {}
        Err(e) if e.is_state_error() => {
            tracing::debug!(sale_order_id = id, "Sale order already confirmed");
        }
        Err(e) => tracing::warn!(sale_order_id = id, error = %e, "action_confirm failed"),
    }

    if read_state(rpc, id).await.is_some_and(SaleOrderState::is_confirmed) {
        return true;
    }

    let mut values = Values::new();
    values.insert("state".into(), Value::from("sale"));
    match rpc.write(MODEL, &[id], &values).await {
        Ok(_) => {
            tracing::warn!(sale_order_id = id, "Forced sale order state to sale");
            true
        }
        Err(e) => {
            tracing::error!(sale_order_id = id, error = %e, "Sale order left unconfirmed");
            false
        }
    }
}

async fn first_line(rpc: &dyn OdooRpc, order_id: i64) -> Option<SaleOrderLineId> {
    match rpc
        .search("sale.order.line", json!([["order_id", "=", order_id]]), Some(1))
        .await
    {
        Ok(ids) => ids.first().copied().map(SaleOrderLineId::new),
        Err(e) => {
            tracing::debug!(sale_order_id = order_id, error = %e, "Could not read order lines");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use booking_bridge_core::tax_inclusive_total;

    use super::*;
    use crate::testing::FakeOdoo;

    fn input() -> SaleOrderInput {
        SaleOrderInput {
            payment_intent_id: "pi_3Nq8ZqH2c4Lr9TbV".to_string(),
            order_number: "BK-20260701-AB12CD".to_string(),
            partner_id: PartnerId::new(100),
            product_id: ErpProductId::new(200),
            product_external_id: "5f1c9a2e-1111-4c3b-9d7e-0a1b2c3d4e5f".to_string(),
            product_type: ProductType::Experience,
            product_name: "Kayak Tour".to_string(),
            customer_email: "mario@example.com".to_string(),
            fiscal_code: Some("RSSMRA80A01H501U".to_string()),
            address: Some("Via Roma 1, 00100 Roma".to_string()),
            booking_date: Some("2026-07-01".to_string()),
            booking_time: Some("09:30".to_string()),
            guests: 2,
            dogs: 1,
            total: Decimal::new(10000, 2),
        }
    }

    fn lines(odoo: &FakeOdoo, order: SaleOrderId) -> Vec<Record> {
        odoo.records("sale.order.line")
            .into_iter()
            .filter(|line| line["order_id"] == json!(order.as_i64()))
            .collect()
    }

    #[tokio::test]
    async fn test_creates_and_confirms_order() {
        let odoo = FakeOdoo::new();
        let outcome = reconcile_sale_order(&odoo, &input(), &ReconcileSettings::default())
            .await
            .unwrap();
        assert!(outcome.created);
        assert!(outcome.confirmed);
        assert!(outcome.line_id.is_some());
        assert_eq!(outcome.name, format!("S{:05}", outcome.id.as_i64()));

        let order = odoo.record("sale.order", outcome.id.as_i64()).unwrap();
        assert_eq!(order["state"], json!("sale"));
        assert_eq!(order["client_order_ref"], json!("pi_3Nq8ZqH2c4Lr9TbV"));
        assert_eq!(order["origin"], json!("BK-20260701-AB12CD"));
        assert_eq!(order["x_stripe_payment_id"], json!("pi_3Nq8ZqH2c4Lr9TbV"));
        assert_eq!(order["partner_id"], json!(100));

        let lines = lines(&odoo, outcome.id);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["product_uom_qty"], json!(1));
        assert_eq!(
            lines[0]["name"],
            json!("Kayak Tour - 2026-07-01 09:30 - 2 adults, 1 dog")
        );
    }

    #[tokio::test]
    async fn test_unit_price_reproduces_charged_total() {
        let odoo = FakeOdoo::new();
        let outcome = reconcile_sale_order(&odoo, &input(), &ReconcileSettings::default())
            .await
            .unwrap();
        let line = lines(&odoo, outcome.id).remove(0);
        let price = line["price_unit"].as_f64().unwrap();
        let price = Decimal::try_from(price).unwrap().round_dp(4);
        assert_eq!(
            tax_inclusive_total(price, Decimal::new(22, 2)),
            Decimal::new(10000, 2)
        );
    }

    #[tokio::test]
    async fn test_replay_returns_same_order_without_new_lines() {
        let odoo = FakeOdoo::new();
        let settings = ReconcileSettings::default();
        let first = reconcile_sale_order(&odoo, &input(), &settings).await.unwrap();
        let second = reconcile_sale_order(&odoo, &input(), &settings).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(!second.created);
        assert!(second.confirmed);
        assert_eq!(odoo.count("sale.order"), 1);
        assert_eq!(odoo.count("sale.order.line"), 1);
        // Second confirmation is skipped once the state reads as confirmed
        assert_eq!(odoo.call_count("sale.order", "action_confirm"), 1);
    }

    #[tokio::test]
    async fn test_without_custom_fields_uses_client_order_ref() {
        let odoo = FakeOdoo::new().without_custom_fields();
        let settings = ReconcileSettings::default();
        let first = reconcile_sale_order(&odoo, &input(), &settings).await.unwrap();
        assert!(first.skipped_fields.contains(&PAYMENT_FIELD.to_string()));

        let second = reconcile_sale_order(&odoo, &input(), &settings).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(odoo.count("sale.order"), 1);
        assert_eq!(odoo.count("sale.order.line"), 1);
    }

    #[tokio::test]
    async fn test_single_unknown_field_keeps_the_rest() {
        let odoo = FakeOdoo::new().with_unknown_field("sale.order", "x_address");
        let outcome = reconcile_sale_order(&odoo, &input(), &ReconcileSettings::default())
            .await
            .unwrap();
        let order = odoo.record("sale.order", outcome.id.as_i64()).unwrap();
        assert_eq!(order["client_order_ref"], json!("pi_3Nq8ZqH2c4Lr9TbV"));
        assert_eq!(order["x_stripe_payment_id"], json!("pi_3Nq8ZqH2c4Lr9TbV"));
        assert_eq!(order["x_order_number"], json!(input().order_number));
        assert_eq!(order["x_customer_email"], json!(input().customer_email));
        assert_eq!(order["x_booking_date"], json!(input().booking_date));
        assert!(order.get("x_address").is_none());
        assert_eq!(outcome.skipped_fields, vec!["x_address".to_string()]);
        assert_eq!(odoo.count("sale.order"), 1);
    }

    #[tokio::test]
    async fn test_ignored_confirm_forces_state() {
        let odoo = FakeOdoo::new().ignoring("sale.order", "action_confirm");
        let outcome = reconcile_sale_order(&odoo, &input(), &ReconcileSettings::default())
            .await
            .unwrap();
        assert!(outcome.confirmed);
        let order = odoo.record("sale.order", outcome.id.as_i64()).unwrap();
        assert_eq!(order["state"], json!("sale"));
    }

    #[tokio::test]
    async fn test_failed_confirm_is_not_fatal() {
        let odoo = FakeOdoo::new()
            .failing("sale.order", "action_confirm")
            .failing("sale.order", "write");
        let outcome = reconcile_sale_order(&odoo, &input(), &ReconcileSettings::default())
            .await
            .unwrap();
        assert!(outcome.created);
        assert!(!outcome.confirmed);
    }

    #[tokio::test]
    async fn test_create_failure_is_fatal() {
        let odoo = FakeOdoo::new().failing("sale.order", "create");
        let err = reconcile_sale_order(&odoo, &input(), &ReconcileSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Odoo(_)));
    }

    #[tokio::test]
    async fn test_tax_is_attached_when_configured() {
        let odoo = FakeOdoo::new();
        let settings = ReconcileSettings {
            sale_tax_id: Some(booking_bridge_core::TaxId::new(7)),
            ..ReconcileSettings::default()
        };
        let outcome = reconcile_sale_order(&odoo, &input(), &settings).await.unwrap();
        let line = lines(&odoo, outcome.id).remove(0);
        assert_eq!(line["tax_id"], json!([[6, 0, [7]]]));
    }

    #[test]
    fn test_line_description_without_dogs_or_time() {
        let input = SaleOrderInput {
            booking_time: None,
            dogs: 0,
            guests: 1,
            ..input()
        };
        assert_eq!(input.line_description(), "Kayak Tour - 2026-07-01 - 1 adult");
    }
}

//! Purchase order grouping.
//!
//! Each (product, supplier) pair has at most one draft purchase order. Every
//! booking with a supplier cost contributes one line to it. A line is
//! recognised as belonging to a sale order through the `x_sale_order_id`
//! field when the database has it, and through the reference tags embedded
//! in its description otherwise:
//!
//! ```text
//! Kayak Tour - 2026-07-01 - 2 adults [ref:SO=S00042] [ref:BK=5f1c9a2e]
//! ```

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::instrument;

use booking_bridge_core::{
    ErpProductId, PartnerId, PurchaseOrderId, PurchaseOrderLineId, ReferenceTag, SaleOrderId,
    SaleOrderLineId,
};

use super::{
    ProductInput, PurchaseError, ReconcileSettings, amount_value, resolve_product,
    resolve_supplier, tax_command,
};
use crate::odoo::{
    OdooRpc, Reattach, Record, Values, create_with_fallback, many2one_id, record_id, record_str,
    write_with_fallback,
};

const ORDER_MODEL: &str = "purchase.order";
const LINE_MODEL: &str = "purchase.order.line";
const ORDER_PRODUCT_FIELD: &str = "x_booking_product_id";
const ORDER_SALES_FIELD: &str = "x_sale_order_ids";
const LINE_SALE_FIELD: &str = "x_sale_order_id";
const LINE_OPTIONAL_FIELDS: &[&str] = &[LINE_SALE_FIELD, "sale_line_id"];

/// Draft orders scanned per supplier when the product field is unavailable.
const DRAFT_SCAN_LIMIT: u32 = 50;

/// A booking's contribution to a supplier purchase order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseInput {
    pub sale_order_id: SaleOrderId,
    /// Odoo sale order name, used in tags and `origin`.
    pub sale_order_name: String,
    pub sale_line_id: Option<SaleOrderLineId>,
    /// Booking store id; its leading fragment is the secondary tag.
    pub booking_id: String,
    pub supplier_name: String,
    pub supplier_email: Option<String>,
    pub product: ProductInput,
    /// Already-resolved Odoo product, skipping product resolution.
    pub product_id: Option<ErpProductId>,
    /// Total supplier cost of the booking, major units.
    pub supplier_cost: Option<Decimal>,
    /// Line description before tags are appended.
    pub description: String,
}

/// What the engine did for a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseAction {
    /// New draft purchase order with the booking's line.
    Created,
    /// Line added to the existing draft purchase order.
    Appended,
    /// The booking already has a line; nothing written.
    Skipped,
}

/// Result of [`reconcile_purchase_order`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseReport {
    pub action: PurchaseAction,
    pub purchase_order_id: PurchaseOrderId,
    pub purchase_order_name: String,
    pub line_id: Option<PurchaseOrderLineId>,
    pub supplier_id: PartnerId,
    pub product_id: ErpProductId,
    /// Cross-link fields the database rejected.
    pub skipped_fields: Vec<String>,
}

struct DraftOrder {
    id: i64,
    name: String,
    origin: Option<String>,
}

impl DraftOrder {
    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            id: record_id(record)?,
            name: record_str(record, "name").unwrap_or_default().to_string(),
            origin: record_str(record, "origin").map(String::from),
        })
    }
}

/// Add the booking to its supplier's draft purchase order.
///
/// # Errors
///
/// Returns `PurchaseError::Validation` before any write when the supplier
/// cost, supplier name or product is missing. Resolution and write failures
/// are returned as `Resolve`/`Odoo` errors.
#[instrument(
    skip(rpc, input, settings),
    fields(sale_order = %input.sale_order_name, supplier = %input.supplier_name)
)]
pub async fn reconcile_purchase_order(
    rpc: &dyn OdooRpc,
    input: &PurchaseInput,
    settings: &ReconcileSettings,
) -> Result<PurchaseReport, PurchaseError> {
    let cost = validate(input)?;

    let supplier = resolve_supplier(rpc, &input.supplier_name, input.supplier_email.as_deref()).await?;
    let product = match input.product_id {
        Some(id) => id,
        None => resolve_product(rpc, &input.product).await?.id,
    };

    let tags: Vec<ReferenceTag> = [
        ReferenceTag::sale_order(&input.sale_order_name),
        ReferenceTag::booking(&input.booking_id),
    ]
    .into_iter()
    .flatten()
    .collect();
    let description = ReferenceTag::annotate(&input.description, &tags);

    let mut line = Values::new();
    line.insert("product_id".into(), product.into());
    line.insert("name".into(), json!(description));
    line.insert("product_qty".into(), json!(1));
    line.insert("price_unit".into(), amount_value(cost));
    if let Some(taxes) = tax_command(settings.purchase_tax_id) {
        line.insert("taxes_id".into(), taxes);
    }
    let mut links = Values::new();
    links.insert(LINE_SALE_FIELD.into(), input.sale_order_id.into());
    if let Some(sale_line) = input.sale_line_id {
        links.insert("sale_line_id".into(), sale_line.into());
    }

    let draft = find_draft(rpc, supplier, product, &input.product.external_id).await?;

    let mut report = match draft {
        Some(order) => {
            if is_duplicate(rpc, order.id, input.sale_order_id, &tags).await? {
                tracing::info!(purchase_order_id = order.id, "Booking already on purchase order");
                return Ok(PurchaseReport {
                    action: PurchaseAction::Skipped,
                    purchase_order_id: PurchaseOrderId::new(order.id),
                    purchase_order_name: order.name,
                    line_id: None,
                    supplier_id: supplier,
                    product_id: product,
                    skipped_fields: Vec::new(),
                });
            }

            let mut values = line;
            values.insert("order_id".into(), json!(order.id));
            values.extend(links);
            let created = create_with_fallback(
                rpc,
                LINE_MODEL,
                &values,
                LINE_OPTIONAL_FIELDS,
                Reattach::Individually,
            )
            .await?;
            append_origin(rpc, &order, &input.sale_order_name).await;
            tracing::info!(purchase_order_id = order.id, line_id = created.id, "Appended purchase line");

            PurchaseReport {
                action: PurchaseAction::Appended,
                purchase_order_id: PurchaseOrderId::new(order.id),
                purchase_order_name: order.name,
                line_id: Some(PurchaseOrderLineId::new(created.id)),
                supplier_id: supplier,
                product_id: product,
                skipped_fields: created.skipped,
            }
        }
        None => {
            let mut values = Values::new();
            values.insert("partner_id".into(), supplier.into());
            values.insert("origin".into(), json!(input.sale_order_name));
            values.insert("order_line".into(), json!([[0, 0, line]]));
            if !input.product.external_id.trim().is_empty() {
                values.insert(ORDER_PRODUCT_FIELD.into(), json!(input.product.external_id.trim()));
            }
            let created = create_with_fallback(
                rpc,
                ORDER_MODEL,
                &values,
                &[ORDER_PRODUCT_FIELD],
                Reattach::Individually,
            )
            .await?;

            let line_id = rpc
                .search(LINE_MODEL, json!([["order_id", "=", created.id]]), Some(1))
                .await?
                .first()
                .copied();
            let mut skipped = created.skipped;
            if let Some(line_id) = line_id {
                match write_with_fallback(rpc, LINE_MODEL, &[line_id], &links, LINE_OPTIONAL_FIELDS)
                    .await
                {
                    Ok(outcome) => skipped.extend(outcome.skipped),
                    Err(e) => {
                        tracing::warn!(line_id, error = %e, "Purchase line link failed");
                    }
                }
            }
            let name = rpc
                .read(ORDER_MODEL, &[created.id], &["name"])
                .await?
                .first()
                .and_then(|row| record_str(row, "name"))
                .unwrap_or_default()
                .to_string();
            tracing::info!(purchase_order_id = created.id, "Created purchase order");

            PurchaseReport {
                action: PurchaseAction::Created,
                purchase_order_id: PurchaseOrderId::new(created.id),
                purchase_order_name: name,
                line_id: line_id.map(PurchaseOrderLineId::new),
                supplier_id: supplier,
                product_id: product,
                skipped_fields: skipped,
            }
        }
    };

    let mut collection = Values::new();
    collection.insert(
        ORDER_SALES_FIELD.into(),
        json!([[4, input.sale_order_id.as_i64(), 0]]),
    );
    match write_with_fallback(
        rpc,
        ORDER_MODEL,
        &[report.purchase_order_id.as_i64()],
        &collection,
        &[ORDER_SALES_FIELD],
    )
    .await
    {
        Ok(outcome) => report.skipped_fields.extend(outcome.skipped),
        Err(e) => tracing::warn!(error = %e, "Purchase order link to sale order failed"),
    }

    Ok(report)
}

fn validate(input: &PurchaseInput) -> Result<Decimal, PurchaseError> {
    let cost = input
        .supplier_cost
        .filter(|cost| *cost > Decimal::ZERO)
        .ok_or_else(|| PurchaseError::Validation("supplier cost must be positive".to_string()))?;
    if input.supplier_name.trim().is_empty() {
        return Err(PurchaseError::Validation("supplier name is required".to_string()));
    }
    if input.product_id.is_none() && input.product.name.trim().is_empty() {
        return Err(PurchaseError::Validation("product is required".to_string()));
    }
    if input.sale_order_name.trim().is_empty() {
        return Err(PurchaseError::Validation("sale order name is required".to_string()));
    }
    Ok(cost)
}

/// The supplier's draft purchase order for `product`.
async fn find_draft(
    rpc: &dyn OdooRpc,
    supplier: PartnerId,
    product: ErpProductId,
    external_id: &str,
) -> Result<Option<DraftOrder>, PurchaseError> {
    let fields = ["id", "name", "origin"];
    let base = json!([["partner_id", "=", supplier.as_i64()], ["state", "=", "draft"]]);

    let external_id = external_id.trim();
    if !external_id.is_empty() {
        let mut domain = base.as_array().cloned().unwrap_or_default();
        domain.push(json!([ORDER_PRODUCT_FIELD, "=", external_id]));
        match rpc
            .search_read(ORDER_MODEL, Value::Array(domain), &fields, Some(1))
            .await
        {
            Ok(rows) => return Ok(rows.first().and_then(DraftOrder::from_record)),
            Err(e) if e.is_schema_drift() => {
                tracing::debug!("Purchase product field unavailable, scanning draft lines");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let drafts = rpc
        .search_read(ORDER_MODEL, base, &fields, Some(DRAFT_SCAN_LIMIT))
        .await?;
    if drafts.is_empty() {
        return Ok(None);
    }
    let ids: Vec<i64> = drafts.iter().filter_map(record_id).collect();
    let lines = rpc
        .search_read(
            LINE_MODEL,
            json!([["order_id", "in", ids], ["product_id", "=", product.as_i64()]]),
            &["order_id"],
            Some(1),
        )
        .await?;
    let Some(order_id) = lines.first().and_then(|line| many2one_id(line.get("order_id"))) else {
        return Ok(None);
    };
    Ok(drafts
        .iter()
        .find(|draft| record_id(draft) == Some(order_id))
        .and_then(DraftOrder::from_record))
}

/// Whether the order already has a line for this sale order.
async fn is_duplicate(
    rpc: &dyn OdooRpc,
    order_id: i64,
    sale_order: SaleOrderId,
    tags: &[ReferenceTag],
) -> Result<bool, PurchaseError> {
    let domain = json!([["order_id", "=", order_id]]);
    let lines = match rpc
        .search_read(LINE_MODEL, domain.clone(), &["id", "name", LINE_SALE_FIELD], None)
        .await
    {
        Ok(lines) => lines,
        Err(e) if e.is_schema_drift() => {
            rpc.search_read(LINE_MODEL, domain, &["id", "name"], None)
                .await?
        }
        Err(e) => return Err(e.into()),
    };

    Ok(lines.iter().any(|line| {
        let linked = many2one_id(line.get(LINE_SALE_FIELD)) == Some(sale_order.as_i64());
        let tagged = record_str(line, "name")
            .is_some_and(|name| tags.iter().any(|tag| tag.is_in(name)));
        linked || tagged
    }))
}

/// Append the sale order name to the purchase order origin, best-effort.
async fn append_origin(rpc: &dyn OdooRpc, order: &DraftOrder, sale_order_name: &str) {
    let origin = order.origin.as_deref().unwrap_or_default();
    if origin.split(',').any(|part| part.trim() == sale_order_name) {
        return;
    }
    let updated = if origin.trim().is_empty() {
        sale_order_name.to_string()
    } else {
        format!("{origin}, {sale_order_name}")
    };
    let mut values = Values::new();
    values.insert("origin".into(), json!(updated));
    if let Err(e) = rpc.write(ORDER_MODEL, &[order.id], &values).await {
        tracing::debug!(purchase_order_id = order.id, error = %e, "Origin update failed");
    }
}

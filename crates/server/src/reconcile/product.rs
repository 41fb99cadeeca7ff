//! Booking product to `product.product` mapping.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use booking_bridge_core::{ErpProductId, ProductType};

use super::{ResolveError, amount_value, insert_some};
use crate::odoo::{OdooRpc, Reattach, Values, create_with_fallback, write_with_fallback};

const MODEL: &str = "product.product";
const EXTERNAL_ID_FIELD: &str = "x_booking_product_id";
const CUSTOM_FIELDS: &[&str] = &[EXTERNAL_ID_FIELD, "x_product_type"];

/// Catalog data used to find or create the Odoo product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInput {
    /// Booking store product UUID.
    pub external_id: String,
    pub name: String,
    pub description: Option<String>,
    pub product_type: ProductType,
    /// Public price per adult, major units.
    pub list_price: Decimal,
}

/// How the product was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductMatch {
    /// By `x_booking_product_id`.
    ExternalId,
    /// By case-insensitive exact name.
    Name,
    /// Not found; created.
    Created,
}

/// A resolved Odoo product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedProduct {
    pub id: ErpProductId,
    pub matched: ProductMatch,
}

/// Find or create the Odoo product for a booking product.
///
/// Lookup order is the external UUID, then the exact name (ignoring case).
/// A product found by name gets the UUID written back when the database has
/// the field. New products are service products that can be sold and bought.
///
/// # Errors
///
/// Returns `ResolveError::Validation` when neither UUID nor name is usable,
/// and `ResolveError::Odoo` on search or create failures.
#[instrument(skip(rpc, input), fields(product = %input.external_id))]
pub async fn resolve_product(
    rpc: &dyn OdooRpc,
    input: &ProductInput,
) -> Result<ResolvedProduct, ResolveError> {
    let external_id = input.external_id.trim();
    let name = input.name.trim();
    if name.is_empty() {
        return Err(ResolveError::Validation("product name is required".to_string()));
    }

    let mut field_supported = true;
    if !external_id.is_empty() {
        match rpc
            .search(MODEL, json!([[EXTERNAL_ID_FIELD, "=", external_id]]), Some(1))
            .await
        {
            Ok(ids) => {
                if let Some(&id) = ids.first() {
                    return Ok(ResolvedProduct {
                        id: ErpProductId::new(id),
                        matched: ProductMatch::ExternalId,
                    });
                }
            }
            Err(e) if e.is_schema_drift() => {
                tracing::debug!("Product UUID field unavailable, matching by name");
                field_supported = false;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let by_name = rpc
        .search(MODEL, json!([["name", "=ilike", name]]), Some(1))
        .await?;
    if let Some(&id) = by_name.first() {
        if field_supported && !external_id.is_empty() {
            let mut backfill = Values::new();
            backfill.insert(EXTERNAL_ID_FIELD.into(), json!(external_id));
            if let Err(e) = write_with_fallback(rpc, MODEL, &[id], &backfill, CUSTOM_FIELDS).await {
                tracing::debug!(product_id = id, error = %e, "UUID backfill failed");
            }
        }
        return Ok(ResolvedProduct {
            id: ErpProductId::new(id),
            matched: ProductMatch::Name,
        });
    }

    let mut values = Values::new();
    values.insert("name".into(), json!(name));
    values.insert("type".into(), json!("service"));
    values.insert("list_price".into(), amount_value(input.list_price));
    values.insert("sale_ok".into(), json!(true));
    values.insert("purchase_ok".into(), json!(true));
    insert_some(&mut values, "description_sale", input.description.as_deref());
    if field_supported {
        insert_some(&mut values, EXTERNAL_ID_FIELD, Some(external_id));
        values.insert("x_product_type".into(), json!(input.product_type.as_str()));
    }

    let outcome = create_with_fallback(rpc, MODEL, &values, CUSTOM_FIELDS, Reattach::Together).await?;
    tracing::info!(
        product_id = outcome.id,
        degraded = outcome.degraded,
        "Created Odoo product"
    );
    Ok(ResolvedProduct {
        id: ErpProductId::new(outcome.id),
        matched: ProductMatch::Created,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::FakeOdoo;

    fn kayak() -> ProductInput {
        ProductInput {
            external_id: "5f1c9a2e-1111-4c3b-9d7e-0a1b2c3d4e5f".to_string(),
            name: "Kayak Tour".to_string(),
            description: Some("Two hours on the lake".to_string()),
            product_type: ProductType::Experience,
            list_price: Decimal::new(50, 0),
        }
    }

    #[tokio::test]
    async fn test_created_then_found_by_uuid() {
        let odoo = FakeOdoo::new();
        let first = resolve_product(&odoo, &kayak()).await.unwrap();
        assert_eq!(first.matched, ProductMatch::Created);

        let record = odoo.record("product.product", first.id.as_i64()).unwrap();
        assert_eq!(record["type"], json!("service"));
        assert_eq!(record["x_product_type"], json!("experience"));
        assert_eq!(record["list_price"], json!(50.0));

        let second = resolve_product(&odoo, &kayak()).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.matched, ProductMatch::ExternalId);
        assert_eq!(odoo.count("product.product"), 1);
    }

    #[tokio::test]
    async fn test_name_match_backfills_uuid() {
        let odoo = FakeOdoo::new();
        let existing = odoo.insert("product.product", json!({"name": "KAYAK TOUR"}));
        let resolved = resolve_product(&odoo, &kayak()).await.unwrap();
        assert_eq!(resolved.id.as_i64(), existing);
        assert_eq!(resolved.matched, ProductMatch::Name);

        let record = odoo.record("product.product", existing).unwrap();
        assert_eq!(record["x_booking_product_id"], json!(kayak().external_id));
    }

    #[tokio::test]
    async fn test_without_custom_fields_matches_by_name() {
        let odoo = FakeOdoo::new().without_custom_fields();
        let first = resolve_product(&odoo, &kayak()).await.unwrap();
        assert_eq!(first.matched, ProductMatch::Created);
        let second = resolve_product(&odoo, &kayak()).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.matched, ProductMatch::Name);
        assert_eq!(odoo.count("product.product"), 1);
    }

    #[tokio::test]
    async fn test_partial_custom_fields_degrade_to_standard_create() {
        let odoo = FakeOdoo::new().with_unknown_field("product.product", "x_product_type");
        let resolved = resolve_product(&odoo, &kayak()).await.unwrap();
        let record = odoo.record("product.product", resolved.id.as_i64()).unwrap();
        assert_eq!(record["name"], json!("Kayak Tour"));
        assert_eq!(record["description_sale"], json!("Two hours on the lake"));
        assert!(record.get("x_product_type").is_none());
    }
}

//! Schema capability negotiation for writes.
//!
//! The bridge writes custom `x_*` fields and localization fields that not
//! every Odoo database has. Writes go out with the full field set first; when
//! Odoo rejects one as unknown the write is retried without the optional
//! fields and those are re-attached afterwards, best-effort. The outcome
//! reports which fields landed so callers can log or surface the degradation.

use serde_json::Value;
use tracing::instrument;

use super::{OdooError, OdooRpc, Values};

/// How optional fields are re-attached after a minimal create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reattach {
    /// One write per field; a failing field does not block the others.
    Individually,
    /// A single write carrying every optional field.
    Together,
}

/// Result of [`create_with_fallback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    /// Id of the created record.
    pub id: i64,
    /// Whether the first, full create was rejected for schema drift.
    pub degraded: bool,
    /// Optional fields written after the minimal create.
    pub reattached: Vec<String>,
    /// Optional fields that could not be written.
    pub skipped: Vec<String>,
}

/// Result of [`write_with_fallback`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Fields dropped because the model rejected them.
    pub skipped: Vec<String>,
}

/// Create a record, degrading to the non-optional fields on schema drift.
///
/// # Errors
///
/// Returns the original error when it is not schema drift, or the error of
/// the minimal create when that also fails.
#[instrument(skip(rpc, values, optional), fields(model = %model))]
pub async fn create_with_fallback(
    rpc: &dyn OdooRpc,
    model: &str,
    values: &Values,
    optional: &[&str],
    reattach: Reattach,
) -> Result<CreateOutcome, OdooError> {
    let err = match rpc.create(model, values).await {
        Ok(id) => {
            return Ok(CreateOutcome {
                id,
                degraded: false,
                reattached: Vec::new(),
                skipped: Vec::new(),
            });
        }
        Err(e) if e.is_schema_drift() => e,
        Err(e) => return Err(e),
    };

    let (minimal, extras) = split_optional(values, optional);
    tracing::warn!(
        error = %err,
        stripped = ?extras.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
        "Create rejected for unknown field, retrying with minimal fields"
    );

    let id = rpc.create(model, &minimal).await?;
    let mut outcome = CreateOutcome {
        id,
        degraded: true,
        reattached: Vec::new(),
        skipped: Vec::new(),
    };

    match reattach {
        Reattach::Individually => {
            for (field, value) in extras {
                let mut single = Values::new();
                single.insert(field.clone(), value);
                match rpc.write(model, &[id], &single).await {
                    Ok(_) => outcome.reattached.push(field),
                    Err(e) => {
                        tracing::debug!(field = %field, error = %e, "Optional field not attached");
                        outcome.skipped.push(field);
                    }
                }
            }
        }
        Reattach::Together => {
            if !extras.is_empty() {
                let fields: Vec<String> = extras.iter().map(|(k, _)| k.clone()).collect();
                let bag: Values = extras.into_iter().collect();
                match rpc.write(model, &[id], &bag).await {
                    Ok(_) => outcome.reattached = fields,
                    Err(e) => {
                        tracing::debug!(error = %e, "Optional fields not attached");
                        outcome.skipped = fields;
                    }
                }
            }
        }
    }

    Ok(outcome)
}

/// Write `values`, dropping fields the model rejects.
///
/// Each schema-drift rejection naming a field removes that field and retries.
/// When the message names no field (or names one not in `values`), all
/// `optional` fields are dropped at once. Non-optional fields are never
/// dropped.
///
/// # Errors
///
/// Returns the error when it is not schema drift, or when nothing optional is
/// left to drop.
#[instrument(skip(rpc, values, optional), fields(model = %model, ids = ?ids))]
pub async fn write_with_fallback(
    rpc: &dyn OdooRpc,
    model: &str,
    ids: &[i64],
    values: &Values,
    optional: &[&str],
) -> Result<WriteOutcome, OdooError> {
    let mut remaining = values.clone();
    let mut outcome = WriteOutcome::default();

    loop {
        if remaining.is_empty() {
            return Ok(outcome);
        }
        let err = match rpc.write(model, ids, &remaining).await {
            Ok(_) => return Ok(outcome),
            Err(e) if e.is_schema_drift() => e,
            Err(e) => return Err(e),
        };

        let named = err
            .unknown_field()
            .filter(|field| optional.contains(&field.as_str()) && remaining.contains_key(field));

        if let Some(field) = named {
            remaining.remove(&field);
            outcome.skipped.push(field);
            continue;
        }

        let droppable: Vec<String> = remaining
            .keys()
            .filter(|key| optional.contains(&key.as_str()))
            .cloned()
            .collect();
        if droppable.is_empty() {
            return Err(err);
        }
        for field in droppable {
            remaining.remove(&field);
            outcome.skipped.push(field);
        }
    }
}

fn split_optional(values: &Values, optional: &[&str]) -> (Values, Vec<(String, Value)>) {
    let mut minimal = Values::new();
    let mut extras = Vec::new();
    for (key, value) in values {
        if optional.contains(&key.as_str()) {
            extras.push((key.clone(), value.clone()));
        } else {
            minimal.insert(key.clone(), value.clone());
        }
    }
    (minimal, extras)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::FakeOdoo;

    fn values(value: Value) -> Values {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_full_create_when_schema_supports_fields() {
        let odoo = FakeOdoo::new();
        let outcome = create_with_fallback(
            &odoo,
            "res.partner",
            &values(json!({"name": "Mario", "x_fiscal_code": "RSS"})),
            &["x_fiscal_code"],
            Reattach::Individually,
        )
        .await
        .unwrap();
        assert!(!outcome.degraded);
        assert_eq!(
            odoo.record("res.partner", outcome.id).unwrap()["x_fiscal_code"],
            json!("RSS")
        );
    }

    #[tokio::test]
    async fn test_create_retries_minimal_and_reattaches_individually() {
        let odoo = FakeOdoo::new().with_unknown_field("res.partner", "x_fiscal_code");
        let outcome = create_with_fallback(
            &odoo,
            "res.partner",
            &values(json!({"name": "Mario", "x_fiscal_code": "RSS", "l10n_it_pec_email": "m@pec.it"})),
            &["x_fiscal_code", "l10n_it_pec_email"],
            Reattach::Individually,
        )
        .await
        .unwrap();

        assert!(outcome.degraded);
        assert_eq!(outcome.reattached, vec!["l10n_it_pec_email".to_string()]);
        assert_eq!(outcome.skipped, vec!["x_fiscal_code".to_string()]);
        let record = odoo.record("res.partner", outcome.id).unwrap();
        assert_eq!(record["name"], json!("Mario"));
        assert_eq!(record["l10n_it_pec_email"], json!("m@pec.it"));
        assert_eq!(odoo.count("res.partner"), 1);
    }

    #[tokio::test]
    async fn test_create_reattach_together_is_all_or_nothing() {
        let odoo = FakeOdoo::new().with_unknown_field("product.product", "x_product_type");
        let outcome = create_with_fallback(
            &odoo,
            "product.product",
            &values(json!({"name": "Kayak", "x_booking_product_id": "u-1", "x_product_type": "trip"})),
            &["x_booking_product_id", "x_product_type"],
            Reattach::Together,
        )
        .await
        .unwrap();
        assert!(outcome.reattached.is_empty());
        assert_eq!(outcome.skipped.len(), 2);
    }

    #[tokio::test]
    async fn test_create_propagates_non_drift_errors() {
        let odoo = FakeOdoo::new().failing("res.partner", "create");
        let err = create_with_fallback(
            &odoo,
            "res.partner",
            &values(json!({"name": "Mario"})),
            &[],
            Reattach::Individually,
        )
        .await
        .unwrap_err();
        assert!(!err.is_schema_drift());
    }

    #[tokio::test]
    async fn test_write_drops_only_rejected_field() {
        let odoo = FakeOdoo::new().with_unknown_field("sale.order", "x_address");
        let id = odoo.insert("sale.order", json!({"name": "S00001"}));
        let outcome = write_with_fallback(
            &odoo,
            "sale.order",
            &[id],
            &values(json!({"origin": "BK-1", "x_address": "Via Roma", "x_order_number": "BK-1"})),
            &["x_address", "x_order_number"],
        )
        .await
        .unwrap();
        assert_eq!(outcome.skipped, vec!["x_address".to_string()]);
        let record = odoo.record("sale.order", id).unwrap();
        assert_eq!(record["x_order_number"], json!("BK-1"));
        assert_eq!(record["origin"], json!("BK-1"));
    }

    #[tokio::test]
    async fn test_write_fails_when_required_field_is_unknown() {
        let odoo = FakeOdoo::new().with_unknown_field("sale.order", "origin");
        let id = odoo.insert("sale.order", json!({"name": "S00001"}));
        let result = write_with_fallback(
            &odoo,
            "sale.order",
            &[id],
            &values(json!({"origin": "BK-1"})),
            &[],
        )
        .await;
        assert!(result.is_err());
    }
}

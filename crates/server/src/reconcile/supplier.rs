//! Supplier partner resolution by exact company name.

use serde_json::{Value, json};
use tracing::instrument;

use booking_bridge_core::PartnerId;

use super::{ResolveError, insert_some};
use crate::odoo::{
    OdooRpc, Reattach, Values, create_with_fallback, record_id, record_str, write_with_fallback,
};

/// Find or create the supplier company named `name`.
///
/// The contact email is written only when it differs from the stored one.
/// `supplier_rank` is raised to 1 best-effort; databases without the
/// purchase module reject it and the supplier is still returned. Tax fields
/// are never touched.
///
/// # Errors
///
/// Returns `ResolveError::Validation` for a blank name and
/// `ResolveError::Odoo` when the search or create fails.
#[instrument(skip(rpc))]
pub async fn resolve_supplier(
    rpc: &dyn OdooRpc,
    name: &str,
    email: Option<&str>,
) -> Result<PartnerId, ResolveError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ResolveError::Validation("supplier name is required".to_string()));
    }
    let email = email.map(str::trim).filter(|e| !e.is_empty());

    let domain = json!([["name", "=", name], ["is_company", "=", true]]);
    let found = match rpc
        .search_read("res.partner", domain.clone(), &["id", "email", "supplier_rank"], Some(1))
        .await
    {
        Ok(rows) => rows,
        Err(e) if e.is_schema_drift() => {
            rpc.search_read("res.partner", domain, &["id", "email"], Some(1))
                .await?
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(row) = found.first()
        && let Some(id) = record_id(row)
    {
        let mut updates = Values::new();
        if let Some(email) = email
            && !record_str(row, "email").is_some_and(|stored| stored.eq_ignore_ascii_case(email))
        {
            updates.insert("email".into(), json!(email));
        }
        let rank = row.get("supplier_rank").and_then(Value::as_i64);
        if rank.is_some_and(|rank| rank < 1) {
            updates.insert("supplier_rank".into(), json!(1));
        }
        if !updates.is_empty()
            && let Err(e) =
                write_with_fallback(rpc, "res.partner", &[id], &updates, &["supplier_rank"]).await
        {
            tracing::warn!(supplier_id = id, error = %e, "Supplier update failed");
        }
        return Ok(PartnerId::new(id));
    }

    let mut values = Values::new();
    values.insert("name".into(), json!(name));
    values.insert("is_company".into(), json!(true));
    values.insert("supplier_rank".into(), json!(1));
    insert_some(&mut values, "email", email);

    let outcome = create_with_fallback(
        rpc,
        "res.partner",
        &values,
        &["supplier_rank"],
        Reattach::Individually,
    )
    .await?;
    tracing::info!(supplier_id = outcome.id, "Created supplier");
    Ok(PartnerId::new(outcome.id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::FakeOdoo;

    #[tokio::test]
    async fn test_creates_supplier_company() {
        let odoo = FakeOdoo::new();
        let id = resolve_supplier(&odoo, " Lago Kayak ", Some("ops@lagokayak.it"))
            .await
            .unwrap();
        let record = odoo.record("res.partner", id.as_i64()).unwrap();
        assert_eq!(record["name"], json!("Lago Kayak"));
        assert_eq!(record["is_company"], json!(true));
        assert_eq!(record["supplier_rank"], json!(1));
        assert!(record.get("vat").is_none());
    }

    #[tokio::test]
    async fn test_reuses_supplier_and_skips_unchanged_email() {
        let odoo = FakeOdoo::new();
        let existing = odoo.insert(
            "res.partner",
            json!({"name": "Lago Kayak", "is_company": true, "email": "ops@lagokayak.it", "supplier_rank": 1}),
        );
        let id = resolve_supplier(&odoo, "Lago Kayak", Some("OPS@lagokayak.it"))
            .await
            .unwrap();
        assert_eq!(id.as_i64(), existing);
        assert_eq!(odoo.call_count("res.partner", "write"), 0);
    }

    #[tokio::test]
    async fn test_updates_changed_email() {
        let odoo = FakeOdoo::new();
        let existing = odoo.insert(
            "res.partner",
            json!({"name": "Lago Kayak", "is_company": true, "email": "old@lagokayak.it", "supplier_rank": 0}),
        );
        resolve_supplier(&odoo, "Lago Kayak", Some("new@lagokayak.it"))
            .await
            .unwrap();
        let record = odoo.record("res.partner", existing).unwrap();
        assert_eq!(record["email"], json!("new@lagokayak.it"));
        assert_eq!(record["supplier_rank"], json!(1));
    }

    #[tokio::test]
    async fn test_person_with_same_name_is_not_a_supplier_match() {
        let odoo = FakeOdoo::new();
        odoo.insert("res.partner", json!({"name": "Lago Kayak", "is_company": false}));
        resolve_supplier(&odoo, "Lago Kayak", None).await.unwrap();
        assert_eq!(odoo.count("res.partner"), 2);
    }

    #[tokio::test]
    async fn test_supplier_rank_unsupported() {
        let odoo = FakeOdoo::new().with_unknown_field("res.partner", "supplier_rank");
        let id = resolve_supplier(&odoo, "Lago Kayak", None).await.unwrap();
        let again = resolve_supplier(&odoo, "Lago Kayak", None).await.unwrap();
        assert_eq!(id, again);
        assert_eq!(odoo.count("res.partner"), 1);
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let odoo = FakeOdoo::new();
        assert!(matches!(
            resolve_supplier(&odoo, "  ", None).await,
            Err(ResolveError::Validation(_))
        ));
    }
}

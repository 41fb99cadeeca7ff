//! The `OdooRpc` seam and its typed helpers.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::OdooError;

/// A record as returned by `read`/`search_read`.
pub type Record = Map<String, Value>;

/// Field values for `create`/`write`.
pub type Values = Map<String, Value>;

/// Access to Odoo's `object.execute_kw`.
///
/// Implementors provide `execute_kw`; every other method is a typed wrapper
/// around it. Nothing at this layer retries: `create` and `action_*` calls
/// are not idempotent.
#[async_trait]
pub trait OdooRpc: Send + Sync {
    /// Call `method` on `model` with positional `args` and keyword `kwargs`.
    async fn execute_kw(
        &self,
        model: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, OdooError>;

    /// Ids of records matching `domain`.
    async fn search(
        &self,
        model: &str,
        domain: Value,
        limit: Option<u32>,
    ) -> Result<Vec<i64>, OdooError> {
        let mut kwargs = Map::new();
        if let Some(limit) = limit {
            kwargs.insert("limit".into(), json!(limit));
        }
        let value = self.execute_kw(model, "search", vec![domain], kwargs).await?;
        parse_ids(&value)
    }

    /// Records matching `domain`, restricted to `fields`, oldest first.
    async fn search_read(
        &self,
        model: &str,
        domain: Value,
        fields: &[&str],
        limit: Option<u32>,
    ) -> Result<Vec<Record>, OdooError> {
        let mut kwargs = Map::new();
        kwargs.insert("fields".into(), json!(fields));
        kwargs.insert("order".into(), json!("id asc"));
        if let Some(limit) = limit {
            kwargs.insert("limit".into(), json!(limit));
        }
        let value = self
            .execute_kw(model, "search_read", vec![domain], kwargs)
            .await?;
        parse_records(value)
    }

    /// Read `fields` of `ids`.
    async fn read(
        &self,
        model: &str,
        ids: &[i64],
        fields: &[&str],
    ) -> Result<Vec<Record>, OdooError> {
        let mut kwargs = Map::new();
        kwargs.insert("fields".into(), json!(fields));
        let value = self
            .execute_kw(model, "read", vec![json!(ids)], kwargs)
            .await?;
        parse_records(value)
    }

    /// Create one record and return its id.
    async fn create(&self, model: &str, values: &Values) -> Result<i64, OdooError> {
        let value = self
            .execute_kw(model, "create", vec![Value::Object(values.clone())], Map::new())
            .await?;
        match value {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| OdooError::UnexpectedResponse(format!("create returned {n}"))),
            // Odoo 17+ may answer a single create with a one-element list
            Value::Array(ids) => ids
                .first()
                .and_then(Value::as_i64)
                .ok_or_else(|| OdooError::UnexpectedResponse("create returned no id".into())),
            other => Err(OdooError::UnexpectedResponse(format!(
                "create returned {other}"
            ))),
        }
    }

    /// Write `values` to `ids`.
    async fn write(&self, model: &str, ids: &[i64], values: &Values) -> Result<bool, OdooError> {
        let value = self
            .execute_kw(
                model,
                "write",
                vec![json!(ids), Value::Object(values.clone())],
                Map::new(),
            )
            .await?;
        Ok(value.as_bool().unwrap_or(true))
    }

    /// Delete `ids`.
    async fn unlink(&self, model: &str, ids: &[i64]) -> Result<bool, OdooError> {
        let value = self
            .execute_kw(model, "unlink", vec![json!(ids)], Map::new())
            .await?;
        Ok(value.as_bool().unwrap_or(true))
    }

    /// Call a model action such as `action_confirm` on `ids`.
    async fn call(&self, model: &str, method: &str, ids: &[i64]) -> Result<Value, OdooError> {
        self.execute_kw(model, method, vec![json!(ids)], Map::new())
            .await
    }
}

fn parse_ids(value: &Value) -> Result<Vec<i64>, OdooError> {
    value
        .as_array()
        .ok_or_else(|| OdooError::UnexpectedResponse(format!("expected id list, got {value}")))?
        .iter()
        .map(|id| {
            id.as_i64()
                .ok_or_else(|| OdooError::UnexpectedResponse(format!("invalid id {id}")))
        })
        .collect()
}

fn parse_records(value: Value) -> Result<Vec<Record>, OdooError> {
    let Value::Array(items) = value else {
        return Err(OdooError::UnexpectedResponse(format!(
            "expected record list, got {value}"
        )));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(record) => Ok(record),
            other => Err(OdooError::UnexpectedResponse(format!(
                "expected record, got {other}"
            ))),
        })
        .collect()
}

/// The record's `id`.
#[must_use]
pub fn record_id(record: &Record) -> Option<i64> {
    record.get("id").and_then(Value::as_i64)
}

/// A char/text field; Odoo sends `false` for empty values.
#[must_use]
pub fn record_str<'a>(record: &'a Record, field: &str) -> Option<&'a str> {
    record
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Id of a many2one value, which arrives as `[id, "display name"]`, a bare
/// id, or `false`.
#[must_use]
pub fn many2one_id(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::Array(pair) => pair.first().and_then(Value::as_i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_many2one_shapes() {
        assert_eq!(many2one_id(Some(&json!([7, "Acme SRL"]))), Some(7));
        assert_eq!(many2one_id(Some(&json!(7))), Some(7));
        assert_eq!(many2one_id(Some(&json!(false))), None);
        assert_eq!(many2one_id(None), None);
    }

    #[test]
    fn test_record_str_treats_false_as_empty() {
        let record: Record = serde_json::from_value(json!({"id": 1, "email": false, "name": "A"}))
            .unwrap_or_default();
        assert_eq!(record_id(&record), Some(1));
        assert_eq!(record_str(&record, "email"), None);
        assert_eq!(record_str(&record, "name"), Some("A"));
    }

    #[test]
    fn test_parse_ids_rejects_non_lists() {
        assert!(parse_ids(&json!(false)).is_err());
        assert_eq!(parse_ids(&json!([1, 2])).ok(), Some(vec![1, 2]));
    }
}

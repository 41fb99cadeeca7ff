//! In-memory Odoo backend.
//!
//! Stores records per model and evaluates the subset of the domain language
//! the bridge uses (`=`, `!=`, `in`, `ilike`, `=ilike` with `|`/`&`/`!`
//! prefixes). Fields can be declared unknown per model to reproduce schema
//! drift, and methods can be scripted to fail.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::odoo::{OdooError, OdooRpc, Record};

/// Message Odoo raises when confirming an already confirmed order.
const ALREADY_CONFIRMED: &str =
    "It is not allowed to confirm an order in the following states: Sales Order";

#[derive(Default)]
struct FakeState {
    tables: HashMap<String, BTreeMap<i64, Record>>,
    next_id: i64,
    unknown: HashSet<(String, String)>,
    failing: HashSet<(String, String)>,
    ignored: HashSet<(String, String)>,
    calls: Vec<(String, String)>,
}

/// Scripted Odoo used by unit and router tests.
#[derive(Default)]
pub struct FakeOdoo {
    state: Mutex<FakeState>,
}

impl FakeOdoo {
    /// An empty database where every field exists.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `field` missing from `model`.
    #[must_use]
    pub fn with_unknown_field(mut self, model: &str, field: &str) -> Self {
        self.state_mut()
            .unknown
            .insert((model.to_string(), field.to_string()));
        self
    }

    /// Declare every listed `x_*` field missing from its model.
    #[must_use]
    pub fn without_custom_fields(self) -> Self {
        [
            ("sale.order", "x_stripe_payment_id"),
            ("sale.order", "x_product_id"),
            ("sale.order", "x_product_type"),
            ("sale.order", "x_customer_email"),
            ("sale.order", "x_fiscal_code"),
            ("sale.order", "x_address"),
            ("sale.order", "x_booking_date"),
            ("sale.order", "x_booking_time"),
            ("sale.order", "x_order_number"),
            ("product.product", "x_booking_product_id"),
            ("product.product", "x_product_type"),
            ("purchase.order", "x_booking_product_id"),
            ("purchase.order", "x_sale_order_ids"),
            ("purchase.order.line", "x_sale_order_id"),
        ]
        .into_iter()
        .fold(self, |odoo, (model, field)| odoo.with_unknown_field(model, field))
    }

    /// Make `method` on `model` fail with a non-drift error.
    #[must_use]
    pub fn failing(mut self, model: &str, method: &str) -> Self {
        self.state_mut()
            .failing
            .insert((model.to_string(), method.to_string()));
        self
    }

    /// Make `method` on `model` succeed without side effects.
    #[must_use]
    pub fn ignoring(mut self, model: &str, method: &str) -> Self {
        self.state_mut()
            .ignored
            .insert((model.to_string(), method.to_string()));
        self
    }

    /// Start failing `method` on `model` after construction.
    pub fn fail(&self, model: &str, method: &str) {
        self.state()
            .failing
            .insert((model.to_string(), method.to_string()));
    }

    /// Stop failing `method` on `model`.
    pub fn recover(&self, model: &str, method: &str) {
        self.state()
            .failing
            .remove(&(model.to_string(), method.to_string()));
    }

    /// Seed a record directly, bypassing schema checks.
    pub fn insert(&self, model: &str, values: Value) -> i64 {
        let values = match values {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut state = self.state();
        insert_record(&mut state, model, values)
    }

    /// Raw stored record.
    #[must_use]
    pub fn record(&self, model: &str, id: i64) -> Option<Record> {
        let state = self.state();
        state
            .tables
            .get(model)
            .and_then(|table| table.get(&id))
            .map(|record| with_computed(&state, model, record))
    }

    /// All stored records of `model`, oldest first.
    #[must_use]
    pub fn records(&self, model: &str) -> Vec<Record> {
        let state = self.state();
        state
            .tables
            .get(model)
            .map(|table| {
                table
                    .values()
                    .map(|record| with_computed(&state, model, record))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of stored records of `model`.
    #[must_use]
    pub fn count(&self, model: &str) -> usize {
        self.state().tables.get(model).map_or(0, BTreeMap::len)
    }

    /// How many times `method` was called on `model`.
    #[must_use]
    pub fn call_count(&self, model: &str, method: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|(m, f)| m == model && f == method)
            .count()
    }

    /// Every `(model, method)` pair called so far.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.state().calls.clone()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&mut self) -> &mut FakeState {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OdooRpc for FakeOdoo {
    async fn execute_kw(
        &self,
        model: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, OdooError> {
        let mut state = self.state();
        state.calls.push((model.to_string(), method.to_string()));

        let key = (model.to_string(), method.to_string());
        if state.failing.contains(&key) {
            return Err(OdooError::rpc(
                200,
                format!("Simulated failure of {model}.{method}"),
                Some("odoo.exceptions.UserError"),
            ));
        }
        if state.ignored.contains(&key) {
            return Ok(Value::Bool(true));
        }

        let first = args.first().cloned().unwrap_or(Value::Null);
        match method {
            "search" | "search_count" | "search_read" => {
                let domain = first.as_array().cloned().unwrap_or_default();
                check_domain(&state, model, &domain)?;
                let fields = field_list(&kwargs);
                check_fields(&state, model, fields.iter().map(String::as_str))?;
                let limit = kwargs
                    .get("limit")
                    .and_then(Value::as_u64)
                    .and_then(|l| usize::try_from(l).ok())
                    .unwrap_or(usize::MAX);

                let matched: Vec<Record> = state
                    .tables
                    .get(model)
                    .map(|table| {
                        table
                            .values()
                            .map(|r| with_computed(&state, model, r))
                            .filter(|r| matches_domain(r, &domain))
                            .take(limit)
                            .collect()
                    })
                    .unwrap_or_default();

                Ok(match method {
                    "search" => json!(matched.iter().filter_map(|r| r.get("id")).collect::<Vec<_>>()),
                    "search_count" => json!(matched.len()),
                    _ => Value::Array(
                        matched
                            .iter()
                            .map(|r| Value::Object(project(r, &fields)))
                            .collect(),
                    ),
                })
            }
            "read" => {
                let fields = field_list(&kwargs);
                check_fields(&state, model, fields.iter().map(String::as_str))?;
                let ids = id_list(&first);
                let records = ids
                    .iter()
                    .filter_map(|id| state.tables.get(model).and_then(|t| t.get(id)))
                    .map(|r| Value::Object(project(&with_computed(&state, model, r), &fields)))
                    .collect();
                Ok(Value::Array(records))
            }
            "create" => {
                let values = first.as_object().cloned().unwrap_or_default();
                check_values(&state, model, &values)?;
                let id = insert_record(&mut state, model, values);
                Ok(json!(id))
            }
            "write" => {
                let ids = id_list(&first);
                let values = args
                    .get(1)
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                check_values(&state, model, &values)?;
                for id in ids {
                    apply_write(&mut state, model, id, &values)?;
                }
                Ok(Value::Bool(true))
            }
            "unlink" => {
                let ids = id_list(&first);
                if let Some(table) = state.tables.get_mut(model) {
                    for id in ids {
                        table.remove(&id);
                    }
                }
                Ok(Value::Bool(true))
            }
            "action_confirm" => {
                for id in id_list(&first) {
                    let record = state
                        .tables
                        .get_mut(model)
                        .and_then(|t| t.get_mut(&id))
                        .ok_or_else(|| missing_record(model, id))?;
                    let confirmed = matches!(
                        record.get("state").and_then(Value::as_str),
                        Some("sale" | "done" | "purchase")
                    );
                    if confirmed {
                        return Err(OdooError::rpc(
                            200,
                            ALREADY_CONFIRMED,
                            Some("odoo.exceptions.UserError"),
                        ));
                    }
                    record.insert("state".into(), json!("sale"));
                }
                Ok(Value::Bool(true))
            }
            other => Err(OdooError::rpc(
                200,
                format!("The method '{other}' does not exist on the model '{model}'"),
                Some("builtins.AttributeError"),
            )),
        }
    }
}

fn unknown_field_error(model: &str, field: &str) -> OdooError {
    OdooError::rpc(
        200,
        format!("Invalid field '{field}' on model '{model}'"),
        Some("builtins.ValueError"),
    )
}

fn missing_record(model: &str, id: i64) -> OdooError {
    OdooError::rpc(
        200,
        format!("Record {model}({id}) is missing or has been deleted"),
        Some("odoo.exceptions.MissingError"),
    )
}

fn check_fields<'a>(
    state: &FakeState,
    model: &str,
    fields: impl IntoIterator<Item = &'a str>,
) -> Result<(), OdooError> {
    for field in fields {
        let root = field.split('.').next().unwrap_or(field);
        if state.unknown.contains(&(model.to_string(), root.to_string())) {
            return Err(unknown_field_error(model, root));
        }
    }
    Ok(())
}

fn check_domain(state: &FakeState, model: &str, domain: &[Value]) -> Result<(), OdooError> {
    let fields = domain
        .iter()
        .filter_map(|term| term.as_array()?.first()?.as_str());
    check_fields(state, model, fields)
}

fn check_values(state: &FakeState, model: &str, values: &Record) -> Result<(), OdooError> {
    check_fields(state, model, values.keys().map(String::as_str))?;
    if let Some(child) = child_model(model)
        && let Some(commands) = values.get("order_line").and_then(Value::as_array)
    {
        for command in commands {
            if let Some(line) = command.get(2).and_then(Value::as_object) {
                check_fields(state, &child, line.keys().map(String::as_str))?;
            }
        }
    }
    Ok(())
}

fn child_model(model: &str) -> Option<String> {
    matches!(model, "sale.order" | "purchase.order").then(|| format!("{model}.line"))
}

fn insert_record(state: &mut FakeState, model: &str, mut values: Record) -> i64 {
    state.next_id += 1;
    let id = state.next_id;

    let lines = values.remove("order_line");
    values.insert("id".into(), json!(id));
    match model {
        "sale.order" => {
            values
                .entry("name")
                .or_insert_with(|| json!(format!("S{id:05}")));
            values.entry("state").or_insert_with(|| json!("draft"));
        }
        "purchase.order" => {
            values
                .entry("name")
                .or_insert_with(|| json!(format!("P{id:05}")));
            values.entry("state").or_insert_with(|| json!("draft"));
        }
        _ => {}
    }
    state
        .tables
        .entry(model.to_string())
        .or_default()
        .insert(id, values);

    if let (Some(child), Some(Value::Array(commands))) = (child_model(model), lines) {
        create_lines(state, &child, id, &commands);
    }
    id
}

fn create_lines(state: &mut FakeState, child: &str, parent: i64, commands: &[Value]) {
    for command in commands {
        let is_create = command.get(0).and_then(Value::as_i64) == Some(0);
        if let (true, Some(line)) = (is_create, command.get(2).and_then(Value::as_object)) {
            let mut line = line.clone();
            line.insert("order_id".into(), json!(parent));
            insert_record(state, child, line);
        }
    }
}

fn apply_write(
    state: &mut FakeState,
    model: &str,
    id: i64,
    values: &Record,
) -> Result<(), OdooError> {
    let mut line_commands = None;
    {
        let record = state
            .tables
            .get_mut(model)
            .and_then(|t| t.get_mut(&id))
            .ok_or_else(|| missing_record(model, id))?;
        for (field, value) in values {
            if field == "order_line" {
                line_commands = value.as_array().cloned();
                continue;
            }
            match value {
                // x2many commands: (4, id) link, (6, 0, ids) replace
                Value::Array(commands) if commands.iter().all(Value::is_array) => {
                    let mut linked = id_list(record.get(field).unwrap_or(&Value::Null));
                    for command in commands {
                        match command.get(0).and_then(Value::as_i64) {
                            Some(4) => {
                                if let Some(target) = command.get(1).and_then(Value::as_i64)
                                    && !linked.contains(&target)
                                {
                                    linked.push(target);
                                }
                            }
                            Some(6) => linked = id_list(command.get(2).unwrap_or(&Value::Null)),
                            _ => {}
                        }
                    }
                    record.insert(field.clone(), json!(linked));
                }
                _ => {
                    record.insert(field.clone(), value.clone());
                }
            }
        }
    }
    if let (Some(child), Some(commands)) = (child_model(model), line_commands) {
        create_lines(state, &child, id, &commands);
    }
    Ok(())
}

/// Record with `order_line` computed from the child table.
fn with_computed(state: &FakeState, model: &str, record: &Record) -> Record {
    let mut record = record.clone();
    if let (Some(child), Some(id)) = (child_model(model), record.get("id").and_then(Value::as_i64))
    {
        let lines: Vec<i64> = state
            .tables
            .get(&child)
            .map(|table| {
                table
                    .values()
                    .filter(|line| line.get("order_id").and_then(Value::as_i64) == Some(id))
                    .filter_map(|line| line.get("id").and_then(Value::as_i64))
                    .collect()
            })
            .unwrap_or_default();
        record.insert("order_line".into(), json!(lines));
    }
    record
}

/// Project `fields` the way Odoo serializes them: missing values become
/// `false` and standard many2one fields become `[id, name]`.
fn project(record: &Record, fields: &[String]) -> Record {
    let mut out = Map::new();
    out.insert("id".into(), record.get("id").cloned().unwrap_or(Value::Null));
    let wanted: Vec<&String> = if fields.is_empty() {
        record.keys().collect()
    } else {
        fields.iter().collect()
    };
    for field in wanted {
        let value = record.get(field).cloned().unwrap_or(Value::Bool(false));
        let value = match value {
            Value::Number(n) if field.ends_with("_id") && !field.starts_with("x_") => {
                json!([n, format!("{field},{n}")])
            }
            other => other,
        };
        out.insert(field.clone(), value);
    }
    out
}

fn field_list(kwargs: &Map<String, Value>) -> Vec<String> {
    kwargs
        .get("fields")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn id_list(value: &Value) -> Vec<i64> {
    match value {
        Value::Array(ids) => ids.iter().filter_map(Value::as_i64).collect(),
        Value::Number(n) => n.as_i64().into_iter().collect(),
        _ => Vec::new(),
    }
}

fn matches_domain(record: &Record, domain: &[Value]) -> bool {
    let mut pos = 0;
    let mut all = true;
    while pos < domain.len() {
        all &= eval_term(record, domain, &mut pos);
    }
    all
}

fn eval_term(record: &Record, domain: &[Value], pos: &mut usize) -> bool {
    let Some(term) = domain.get(*pos) else {
        return true;
    };
    *pos += 1;
    match term {
        Value::String(op) if op == "|" => {
            let a = eval_term(record, domain, pos);
            let b = eval_term(record, domain, pos);
            a || b
        }
        Value::String(op) if op == "&" => {
            let a = eval_term(record, domain, pos);
            let b = eval_term(record, domain, pos);
            a && b
        }
        Value::String(op) if op == "!" => !eval_term(record, domain, pos),
        Value::Array(leaf) => leaf_matches(record, leaf),
        _ => true,
    }
}

fn leaf_matches(record: &Record, leaf: &[Value]) -> bool {
    let (Some(field), Some(op), Some(expected)) = (
        leaf.first().and_then(Value::as_str),
        leaf.get(1).and_then(Value::as_str),
        leaf.get(2),
    ) else {
        return false;
    };
    let actual = record.get(field).unwrap_or(&Value::Bool(false));

    match op {
        "=" => values_equal(actual, expected),
        "!=" => !values_equal(actual, expected),
        "in" => expected
            .as_array()
            .is_some_and(|options| options.iter().any(|o| values_equal(actual, o))),
        "=ilike" => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(e)) => a.to_lowercase() == e.to_lowercase(),
            _ => false,
        },
        "ilike" => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(e)) => a.to_lowercase().contains(&e.to_lowercase()),
            _ => false,
        },
        _ => false,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        // many2one as [id, name] and x2many id lists
        (Value::Array(items), Value::Number(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        (Value::Null, Value::Bool(false)) | (Value::Bool(false), Value::Null) => true,
        (a, b) => a == b,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_with_lines_and_search() {
        let odoo = FakeOdoo::new();
        let values: Record = serde_json::from_value(json!({
            "partner_id": 3,
            "order_line": [[0, 0, {"product_id": 9, "name": "Tour", "product_uom_qty": 1}]]
        }))
        .unwrap();
        let id = odoo.create("sale.order", &values).await.unwrap();

        let record = odoo.record("sale.order", id).unwrap();
        assert_eq!(record["name"], json!(format!("S{id:05}")));
        assert_eq!(record["order_line"].as_array().unwrap().len(), 1);

        let found = odoo
            .search("sale.order", json!([["partner_id", "=", 3]]), Some(1))
            .await
            .unwrap();
        assert_eq!(found, vec![id]);
    }

    #[tokio::test]
    async fn test_or_domain_and_ilike() {
        let odoo = FakeOdoo::new();
        let a = odoo.insert("res.partner", json!({"vat": "IT123", "email": "A@X.IT"}));
        let b = odoo.insert("res.partner", json!({"vat": "123"}));
        let ids = odoo
            .search(
                "res.partner",
                json!(["|", ["vat", "=", "IT123"], ["vat", "=", "123"]]),
                None,
            )
            .await
            .unwrap();
        assert_eq!(ids, vec![a, b]);

        let ids = odoo
            .search("res.partner", json!([["email", "=ilike", "a@x.it"]]), None)
            .await
            .unwrap();
        assert_eq!(ids, vec![a]);
    }

    #[tokio::test]
    async fn test_unknown_field_in_domain_is_drift() {
        let odoo = FakeOdoo::new().with_unknown_field("sale.order", "x_stripe_payment_id");
        let err = odoo
            .search("sale.order", json!([["x_stripe_payment_id", "=", "pi_1"]]), None)
            .await
            .unwrap_err();
        assert!(err.is_schema_drift());
        assert_eq!(err.unknown_field().as_deref(), Some("x_stripe_payment_id"));
    }

    #[tokio::test]
    async fn test_search_read_serializes_many2one() {
        let odoo = FakeOdoo::new();
        odoo.insert("purchase.order.line", json!({"order_id": 4, "product_id": 9}));
        let rows = odoo
            .search_read("purchase.order.line", json!([["order_id", "=", 4]]), &["product_id"], None)
            .await
            .unwrap();
        assert_eq!(rows[0]["product_id"][0], json!(9));
    }

    #[tokio::test]
    async fn test_confirm_twice_is_state_error() {
        let odoo = FakeOdoo::new();
        let id = odoo.insert("sale.order", json!({}));
        odoo.call("sale.order", "action_confirm", &[id]).await.unwrap();
        let err = odoo
            .call("sale.order", "action_confirm", &[id])
            .await
            .unwrap_err();
        assert!(err.is_state_error());
    }
}

//! Idempotent reconciliation of bookings into Odoo.
//!
//! # Architecture
//!
//! Every step is a search-before-write on a stable external key, so running
//! the pipeline twice for the same payment converges on the same records:
//!
//! - [`partner`] - customer partner by VAT (B2B) or email
//! - [`supplier`] - supplier partner by company name
//! - [`product`] - `product.product` by booking product UUID, then by name
//! - [`sale_order`] - one sale order per payment intent, confirmed
//! - [`purchase_order`] - one draft purchase order per (product, supplier),
//!   one line per sale order
//!
//! Fields outside the stock Odoo schema go through [`crate::odoo::fallback`]
//! and are reported back as skipped when the database lacks them.

pub mod partner;
pub mod product;
pub mod purchase_order;
pub mod sale_order;
pub mod supplier;

pub use partner::{Address, PartnerInput, ResolvedPartner, fallback_partner, resolve_partner};
pub use product::{ProductInput, ProductMatch, ResolvedProduct, resolve_product};
pub use purchase_order::{PurchaseAction, PurchaseInput, PurchaseReport, reconcile_purchase_order};
pub use sale_order::{
    SaleOrderInput, SaleOrderOutcome, booking_line_description, reconcile_sale_order,
};
pub use supplier::resolve_supplier;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Value, json};
use thiserror::Error;

use booking_bridge_core::{MoneyError, TaxId};

use crate::odoo::{OdooError, Values};

/// Country, tax and pricing settings shared by the reconcilers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Two-letter country used when a partner's country cannot be resolved.
    pub default_country: String,
    /// Rate used to derive tax-exclusive sale prices from charged totals.
    pub sale_tax_rate: Decimal,
    /// `account.tax` attached to sale order lines.
    pub sale_tax_id: Option<TaxId>,
    /// `account.tax` attached to purchase order lines.
    pub purchase_tax_id: Option<TaxId>,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            default_country: "IT".to_string(),
            sale_tax_rate: Decimal::new(22, 2),
            sale_tax_id: None,
            purchase_tax_id: None,
        }
    }
}

/// Errors from the partner, supplier and product resolvers.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Input rejected before any Odoo call.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Odoo error: {0}")]
    Odoo(#[from] OdooError),
}

/// Errors from the sale order reconciler.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Input rejected before any Odoo call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The charged total cannot be turned into a unit price.
    #[error("Pricing error: {0}")]
    Pricing(#[from] MoneyError),

    #[error("Odoo error: {0}")]
    Odoo(#[from] OdooError),
}

/// Errors from the purchase order engine.
#[derive(Debug, Error)]
pub enum PurchaseError {
    /// Missing supplier cost, supplier name or product; nothing was written.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Odoo error: {0}")]
    Odoo(#[from] OdooError),
}

/// Monetary amount as the JSON number Odoo expects.
pub(crate) fn amount_value(amount: Decimal) -> Value {
    amount.to_f64().map_or(Value::Null, |f| json!(f))
}

/// Insert `key` only when a non-blank value is present.
pub(crate) fn insert_some(values: &mut Values, key: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        values.insert(key.to_string(), json!(value));
    }
}

/// `(6, 0, ids)` replace command for a many2many tax field.
pub(crate) fn tax_command(tax: Option<TaxId>) -> Option<Value> {
    tax.map(|tax| json!([[6, 0, [tax.as_i64()]]]))
}

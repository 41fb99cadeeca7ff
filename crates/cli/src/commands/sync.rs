//! Odoo sync jobs, the same ones behind `/api/odoo/*`.
//!
//! # Usage
//!
//! ```bash
//! bb-cli sync products [--product-id <uuid>]
//! bb-cli sync purchase-orders [--product-id <uuid>]
//! ```
//!
//! The summary is printed as JSON on stdout. The command exits non-zero when
//! any item failed.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use booking_bridge_server::config::JobConfig;
use booking_bridge_server::db::{PgBookingStore, create_pool};
use booking_bridge_server::odoo::OdooClient;
use booking_bridge_server::services::{SyncFilter, SyncService, SyncSummary};

use super::CommandError;

async fn service() -> Result<SyncService, CommandError> {
    let config = JobConfig::from_env()?;
    let pool = create_pool(&config.database_url).await?;
    let odoo = OdooClient::new(&config.odoo)?;
    Ok(SyncService::new(
        Arc::new(odoo),
        Arc::new(PgBookingStore::new(pool)),
        config.reconcile,
    ))
}

fn filter(product_id: Option<Uuid>) -> SyncFilter {
    SyncFilter {
        product_id,
        ..SyncFilter::default()
    }
}

fn report<T: Serialize>(summary: &SyncSummary<T>) -> Result<(), CommandError> {
    #[allow(clippy::print_stdout)]
    {
        println!("{}", serde_json::to_string_pretty(summary)?);
    }
    if summary.failed > 0 {
        return Err(CommandError::PartialFailure {
            failed: summary.failed,
            total: summary.total,
        });
    }
    Ok(())
}

/// Resolve catalog products in Odoo and store the mapping.
///
/// # Errors
///
/// Returns `CommandError` on configuration or connection failure, and
/// `CommandError::PartialFailure` when any product failed.
pub async fn products(product_id: Option<Uuid>) -> Result<(), CommandError> {
    let summary = service().await?.sync_products(&filter(product_id)).await?;
    tracing::info!(total = summary.total, succeeded = summary.succeeded, "Products synced");
    report(&summary)
}

/// Reconcile supplier purchase orders for bookings that have none.
///
/// # Errors
///
/// Returns `CommandError` on configuration or connection failure, and
/// `CommandError::PartialFailure` when any booking failed.
pub async fn purchase_orders(product_id: Option<Uuid>) -> Result<(), CommandError> {
    let summary = service()
        .await?
        .sync_purchase_orders(&filter(product_id))
        .await?;
    tracing::info!(total = summary.total, succeeded = summary.succeeded, "Purchase orders synced");
    report(&summary)
}

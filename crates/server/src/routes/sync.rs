//! Bearer-protected sync endpoints.
//!
//! The body is an optional `{productId, productType}` filter; an empty body
//! syncs everything.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, header::AUTHORIZATION},
};

use crate::error::{AppError, Result};
use crate::services::SyncFilter;
use crate::services::sync::{ProductSyncItem, PurchaseSyncItem, SyncSummary};
use crate::state::AppState;

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .unwrap_or_default();
    match state.check_sync_token(token) {
        None => Err(AppError::Unavailable("Sync API is not configured".to_string())),
        Some(false) => Err(AppError::Unauthorized("Invalid sync token".to_string())),
        Some(true) => Ok(()),
    }
}

fn parse_filter(body: &[u8]) -> Result<SyncFilter> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(SyncFilter::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid filter: {e}")))
}

/// POST /api/odoo/sync-products
pub async fn products(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SyncSummary<ProductSyncItem>>> {
    authorize(&state, &headers)?;
    let filter = parse_filter(&body)?;
    Ok(Json(state.sync().sync_products(&filter).await?))
}

/// POST /api/odoo/sync-purchase-orders
pub async fn purchase_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SyncSummary<PurchaseSyncItem>>> {
    authorize(&state, &headers)?;
    let filter = parse_filter(&body)?;
    Ok(Json(state.sync().sync_purchase_orders(&filter).await?))
}

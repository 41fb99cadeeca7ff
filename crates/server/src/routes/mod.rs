//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                         - Liveness
//! GET  /health/ready                   - Booking store reachable
//!
//! POST /api/checkout                   - Open a hosted checkout (rate limited)
//!
//! GET  /api/webhooks/stripe            - Webhook readiness
//! POST /api/webhooks/stripe            - Stripe events (signature verified)
//!
//! POST /api/odoo/sync-products         - Push catalog products to Odoo (bearer)
//! POST /api/odoo/sync-purchase-orders  - Catch up supplier orders (bearer)
//! ```

pub mod checkout;
pub mod health;
pub mod sync;
pub mod webhooks;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// All application routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/api/checkout", post(checkout::create))
        .route(
            "/api/webhooks/stripe",
            get(webhooks::status).post(webhooks::receive),
        )
        .route("/api/odoo/sync-products", post(sync::products))
        .route("/api/odoo/sync-purchase-orders", post(sync::purchase_orders))
}

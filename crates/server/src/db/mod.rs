//! Booking store.
//!
//! # Tables
//!
//! - `providers` - suppliers, mirrored to Odoo as companies with a supplier rank
//! - `products` - bookable catalog with customer prices, supplier costs and
//!   the Odoo `product.product` mapping
//! - `availability_slots` - seats per product and date
//! - `bookings` - one row per payment intent with the Odoo documents it produced
//!
//! # Idempotency
//!
//! Every write the webhook performs can be replayed: booking inserts are
//! `ON CONFLICT (payment_intent_id) DO NOTHING`, slot reservation is a
//! conditional update, and the confirmation email is claimed by setting
//! `confirmation_sent_at` only while it is still null.
//!
//! # Migrations
//!
//! Migrations live in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p booking-bridge-cli -- migrate
//! ```

pub mod postgres;

pub use postgres::PgBookingStore;

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use uuid::Uuid;

use booking_bridge_core::ErpProductId;

use crate::models::{AvailabilitySlot, Booking, CatalogProduct, NewBooking, OdooRefs, Provider};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., a full slot).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Persistence used by checkout, the webhook and the sync jobs.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Round-trip to the store.
    async fn ping(&self) -> Result<(), RepositoryError>;

    async fn find_product(&self, id: Uuid) -> Result<Option<CatalogProduct>, RepositoryError>;

    /// Active products, oldest first.
    async fn list_active_products(&self) -> Result<Vec<CatalogProduct>, RepositoryError>;

    async fn find_provider(&self, id: Uuid) -> Result<Option<Provider>, RepositoryError>;

    /// Remember the Odoo product a catalog product maps to.
    async fn set_odoo_product_id(
        &self,
        product_id: Uuid,
        odoo_product_id: ErpProductId,
    ) -> Result<(), RepositoryError>;

    async fn find_slot(&self, id: Uuid) -> Result<Option<AvailabilitySlot>, RepositoryError>;

    /// Take `seats` from a slot if they fit. Returns `false` when they don't.
    async fn reserve_slot(&self, slot_id: Uuid, seats: u32) -> Result<bool, RepositoryError>;

    async fn find_booking_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Booking>, RepositoryError>;

    /// Insert unless a booking for the payment intent exists. Returns `true`
    /// when a row was written.
    async fn insert_booking(&self, booking: &NewBooking) -> Result<bool, RepositoryError>;

    /// Fill in Odoo references on the booking for a payment intent. `None`
    /// fields keep their stored value. Returns the stored booking id, or
    /// `NotFound` when no booking exists for the intent.
    async fn update_odoo_refs(
        &self,
        payment_intent_id: &str,
        refs: &OdooRefs,
    ) -> Result<Uuid, RepositoryError>;

    /// Claim the confirmation email. Only the first caller gets `true`.
    async fn claim_confirmation(&self, booking_id: Uuid) -> Result<bool, RepositoryError>;

    /// Undo a claim after a failed send.
    async fn release_confirmation(&self, booking_id: Uuid) -> Result<(), RepositoryError>;

    /// Confirmed bookings with a supplier cost and a sale order but no
    /// purchase order yet, optionally for one product.
    async fn bookings_missing_purchase_order(
        &self,
        product_id: Option<Uuid>,
    ) -> Result<Vec<Booking>, RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

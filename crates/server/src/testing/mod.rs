//! In-memory fakes for unit and router tests.
//!
//! - [`FakeOdoo`] - scripted Odoo with per-model tables and schema drift
//! - [`MemoryBookingStore`] - booking store with the same idempotency rules
//!   as the Postgres one
//! - [`RecordingNotifier`] - keeps every confirmation it is asked to send
//! - [`fixtures`] - a priced catalog product and signed webhook helpers

pub mod fixtures;
pub mod odoo;

pub use odoo::FakeOdoo;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use booking_bridge_core::{BookingStatus, ErpProductId};

use crate::db::{BookingStore, RepositoryError};
use crate::models::{AvailabilitySlot, Booking, CatalogProduct, NewBooking, OdooRefs, Provider};
use crate::services::notifier::{BookingConfirmation, Notifier, NotifyError};

#[derive(Default)]
struct StoreState {
    providers: HashMap<Uuid, Provider>,
    products: Vec<CatalogProduct>,
    slots: HashMap<Uuid, AvailabilitySlot>,
    bookings: Vec<Booking>,
    failing_inserts: usize,
    rejecting_full_inserts: bool,
    failing_lookups: usize,
    missed_lookups: usize,
}

/// Booking store held in memory.
#[derive(Default)]
pub struct MemoryBookingStore {
    state: Mutex<StoreState>,
}

impl MemoryBookingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_provider(&self, provider: Provider) {
        self.state().providers.insert(provider.id, provider);
    }

    pub fn add_product(&self, product: CatalogProduct) {
        self.state().products.push(product);
    }

    pub fn add_slot(&self, slot: AvailabilitySlot) {
        self.state().slots.insert(slot.id, slot);
    }

    /// Fail the next `count` booking inserts with a database error.
    pub fn fail_inserts(&self, count: usize) {
        self.state().failing_inserts = count;
    }

    /// Fail the next `count` payment-intent lookups with a database error.
    pub fn fail_lookups(&self, count: usize) {
        self.state().failing_lookups = count;
    }

    /// Answer the next `count` payment-intent lookups with no booking, as if
    /// a concurrent delivery inserted the row right after the lookup.
    pub fn miss_lookups(&self, count: usize) {
        self.state().missed_lookups = count;
    }

    /// Reject inserts that carry Odoo references, as an older schema would.
    pub fn reject_full_inserts(&self) {
        self.state().rejecting_full_inserts = true;
    }

    #[must_use]
    pub fn bookings(&self) -> Vec<Booking> {
        self.state().bookings.clone()
    }

    #[must_use]
    pub fn product(&self, id: Uuid) -> Option<CatalogProduct> {
        self.state().products.iter().find(|p| p.id == id).cloned()
    }

    #[must_use]
    pub fn slot(&self, id: Uuid) -> Option<AvailabilitySlot> {
        self.state().slots.get(&id).cloned()
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<CatalogProduct>, RepositoryError> {
        Ok(self.product(id))
    }

    async fn list_active_products(&self) -> Result<Vec<CatalogProduct>, RepositoryError> {
        Ok(self
            .state()
            .products
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect())
    }

    async fn find_provider(&self, id: Uuid) -> Result<Option<Provider>, RepositoryError> {
        Ok(self.state().providers.get(&id).cloned())
    }

    async fn set_odoo_product_id(
        &self,
        product_id: Uuid,
        odoo_product_id: ErpProductId,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state();
        let product = state
            .products
            .iter_mut()
            .find(|p| p.id == product_id)
            .ok_or(RepositoryError::NotFound)?;
        product.odoo_product_id = Some(odoo_product_id);
        Ok(())
    }

    async fn find_slot(&self, id: Uuid) -> Result<Option<AvailabilitySlot>, RepositoryError> {
        Ok(self.slot(id))
    }

    async fn reserve_slot(&self, slot_id: Uuid, seats: u32) -> Result<bool, RepositoryError> {
        let mut state = self.state();
        let Some(slot) = state.slots.get_mut(&slot_id) else {
            return Ok(false);
        };
        if !slot.fits(seats) {
            return Ok(false);
        }
        slot.booked += i32::try_from(seats)
            .map_err(|_| RepositoryError::Conflict(format!("seats out of range: {seats}")))?;
        Ok(true)
    }

    async fn find_booking_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Booking>, RepositoryError> {
        let mut state = self.state();
        if state.failing_lookups > 0 {
            state.failing_lookups -= 1;
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        if state.missed_lookups > 0 {
            state.missed_lookups -= 1;
            return Ok(None);
        }
        Ok(state
            .bookings
            .iter()
            .find(|b| b.payment_intent_id == payment_intent_id)
            .cloned())
    }

    async fn insert_booking(&self, booking: &NewBooking) -> Result<bool, RepositoryError> {
        let mut state = self.state();
        if state.failing_inserts > 0 {
            state.failing_inserts -= 1;
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        if state.rejecting_full_inserts && booking.odoo != OdooRefs::default() {
            return Err(RepositoryError::Database(sqlx::Error::ColumnNotFound(
                "odoo_sale_order_line_id".to_string(),
            )));
        }
        if state
            .bookings
            .iter()
            .any(|b| b.payment_intent_id == booking.payment_intent_id)
        {
            return Ok(false);
        }
        state.bookings.push(booking.clone().into_booking(Utc::now()));
        Ok(true)
    }

    async fn update_odoo_refs(
        &self,
        payment_intent_id: &str,
        refs: &OdooRefs,
    ) -> Result<Uuid, RepositoryError> {
        let mut state = self.state();
        let booking = state
            .bookings
            .iter_mut()
            .find(|b| b.payment_intent_id == payment_intent_id)
            .ok_or(RepositoryError::NotFound)?;
        let stored = &mut booking.odoo;
        stored.partner_id = refs.partner_id.or(stored.partner_id);
        stored.sale_order_id = refs.sale_order_id.or(stored.sale_order_id);
        if refs.sale_order_name.is_some() {
            stored.sale_order_name.clone_from(&refs.sale_order_name);
        }
        stored.sale_order_line_id = refs.sale_order_line_id.or(stored.sale_order_line_id);
        stored.purchase_order_id = refs.purchase_order_id.or(stored.purchase_order_id);
        Ok(booking.id)
    }

    async fn claim_confirmation(&self, booking_id: Uuid) -> Result<bool, RepositoryError> {
        let mut state = self.state();
        let Some(booking) = state.bookings.iter_mut().find(|b| b.id == booking_id) else {
            return Ok(false);
        };
        if booking.confirmation_sent_at.is_some() {
            return Ok(false);
        }
        booking.confirmation_sent_at = Some(Utc::now());
        Ok(true)
    }

    async fn release_confirmation(&self, booking_id: Uuid) -> Result<(), RepositoryError> {
        if let Some(booking) = self.state().bookings.iter_mut().find(|b| b.id == booking_id) {
            booking.confirmation_sent_at = None;
        }
        Ok(())
    }

    async fn bookings_missing_purchase_order(
        &self,
        product_id: Option<Uuid>,
    ) -> Result<Vec<Booking>, RepositoryError> {
        Ok(self
            .state()
            .bookings
            .iter()
            .filter(|b| {
                b.status == BookingStatus::Confirmed
                    && b.supplier_cost.is_some()
                    && b.odoo.sale_order_id.is_some()
                    && b.odoo.purchase_order_id.is_none()
                    && product_id.is_none_or(|id| b.product_id == Some(id))
            })
            .cloned()
            .collect())
    }
}

/// Notifier that records instead of sending.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<BookingConfirmation>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send fail.
    pub fn fail(&self) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// Let sends succeed again.
    pub fn recover(&self) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    #[must_use]
    pub fn sent(&self) -> Vec<BookingConfirmation> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_booking_confirmation(
        &self,
        confirmation: &BookingConfirmation,
    ) -> Result<(), NotifyError> {
        if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(NotifyError::InvalidAddress(confirmation.customer_email.clone()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(confirmation.clone());
        Ok(())
    }
}

//! Paid bookings.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use booking_bridge_core::{
    BookingStatus, PartnerId, PurchaseOrderId, SaleOrderId, SaleOrderLineId,
};

/// Odoo documents a booking was reconciled into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OdooRefs {
    pub partner_id: Option<PartnerId>,
    pub sale_order_id: Option<SaleOrderId>,
    pub sale_order_name: Option<String>,
    pub sale_order_line_id: Option<SaleOrderLineId>,
    pub purchase_order_id: Option<PurchaseOrderId>,
}

/// A booking row, one per payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub payment_intent_id: String,
    pub order_number: String,
    pub product_id: Option<Uuid>,
    pub slot_id: Option<Uuid>,
    pub booking_date: Option<NaiveDate>,
    pub time_slot: Option<String>,
    pub guests: u32,
    pub dogs: u32,
    pub customer_email: String,
    pub customer_name: Option<String>,
    /// Amount charged, major units.
    pub total: Decimal,
    /// Upper-case ISO currency.
    pub currency: String,
    pub supplier_cost: Option<Decimal>,
    pub status: BookingStatus,
    pub odoo: OdooRefs,
    /// Set once the confirmation email has been claimed for sending.
    pub confirmation_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A booking to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub id: Uuid,
    pub payment_intent_id: String,
    pub order_number: String,
    pub product_id: Option<Uuid>,
    pub slot_id: Option<Uuid>,
    pub booking_date: Option<NaiveDate>,
    pub time_slot: Option<String>,
    pub guests: u32,
    pub dogs: u32,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub total: Decimal,
    pub currency: String,
    pub supplier_cost: Option<Decimal>,
    pub status: BookingStatus,
    pub odoo: OdooRefs,
}

impl NewBooking {
    /// The same booking with only the columns every schema version has.
    ///
    /// Used as a second attempt when the full insert is rejected.
    #[must_use]
    pub fn reduced(&self) -> Self {
        Self {
            id: self.id,
            payment_intent_id: self.payment_intent_id.clone(),
            order_number: self.order_number.clone(),
            product_id: None,
            slot_id: None,
            booking_date: None,
            time_slot: None,
            guests: self.guests,
            dogs: self.dogs,
            customer_email: self.customer_email.clone(),
            customer_name: None,
            total: self.total,
            currency: self.currency.clone(),
            supplier_cost: None,
            status: self.status,
            odoo: OdooRefs::default(),
        }
    }

    /// The row as the store would return it.
    #[must_use]
    pub fn into_booking(self, created_at: DateTime<Utc>) -> Booking {
        Booking {
            id: self.id,
            payment_intent_id: self.payment_intent_id,
            order_number: self.order_number,
            product_id: self.product_id,
            slot_id: self.slot_id,
            booking_date: self.booking_date,
            time_slot: self.time_slot,
            guests: self.guests,
            dogs: self.dogs,
            customer_email: self.customer_email,
            customer_name: self.customer_name,
            total: self.total,
            currency: self.currency,
            supplier_cost: self.supplier_cost,
            status: self.status,
            odoo: self.odoo,
            confirmation_sent_at: None,
            created_at,
        }
    }
}

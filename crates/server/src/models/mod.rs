//! Booking store domain models.
//!
//! - [`catalog`] - providers, bookable products and availability slots
//! - [`booking`] - paid bookings and their Odoo references

pub mod booking;
pub mod catalog;

pub use booking::{Booking, NewBooking, OdooRefs};
pub use catalog::{AvailabilitySlot, CatalogProduct, Provider};

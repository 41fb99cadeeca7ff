//! Booking Bridge Core - Shared types library.
//!
//! This crate provides the types shared by the booking bridge components:
//! - `server` - Webhook, checkout and sync HTTP service
//! - `cli` - Command-line tools for migrations and batch syncs
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. Everything here can be unit tested without a
//! running Odoo, Stripe or Postgres.
//!
//! # Modules
//!
//! - [`types`] - Odoo record ids, emails, money and tax-exact rounding,
//!   checkout pricing, tax identifiers, statuses and reference tags

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;

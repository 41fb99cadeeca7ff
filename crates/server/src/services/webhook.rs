//! Payment webhook orchestration.
//!
//! # Flow
//!
//! ```text
//! payment_intent.succeeded
//!   -> metadata (intent, then checkout session when required keys or tax ids are missing)
//!   -> product mapping -> partner -> sale order (fatal on failure)
//!   -> purchase order (non-fatal)
//!   -> booking row (non-fatal, retried with a reduced field set)
//!   -> confirmation email (non-fatal, at most once)
//! ```
//!
//! Every step is safe to replay: Odoo writes search before they create and
//! booking-store writes are conditional, so a redelivered event converges on
//! the same documents.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use booking_bridge_core::{BookingStatus, ErpProductId, PartnerId, describe_party};

use super::metadata::BookingMetadata;
use super::notifier::{BookingConfirmation, Notifier};
use crate::db::{BookingStore, RepositoryError};
use crate::models::{CatalogProduct, NewBooking, OdooRefs};
use crate::odoo::OdooRpc;
use crate::payments::sandbox::SESSION_METADATA_KEY;
use crate::payments::{Gateways, PaymentIntent};
use crate::reconcile::{
    PurchaseInput, PurchaseReport, ReconcileError, ReconcileSettings, ResolveError,
    SaleOrderInput, SaleOrderOutcome, fallback_partner, reconcile_purchase_order,
    reconcile_sale_order, resolve_partner, resolve_product,
};

/// Errors that stop a webhook from being reconciled.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Required booking metadata is missing or malformed.
    #[error("invalid booking metadata: {0}")]
    Metadata(String),

    /// The booked product is not in the catalog.
    #[error("unknown product: {0}")]
    UnknownProduct(Uuid),

    /// Catalog lookup failed.
    #[error("booking store error: {0}")]
    Store(#[from] RepositoryError),

    /// The Odoo product could not be found or created.
    #[error("product resolution failed: {0}")]
    Product(#[source] ResolveError),

    /// Neither the full nor the fallback partner could be resolved.
    #[error("partner resolution failed: {0}")]
    Partner(#[source] ResolveError),

    /// The sale order could not be found or created.
    #[error("sale order reconciliation failed: {0}")]
    SaleOrder(#[from] ReconcileError),
}

impl WebhookError {
    /// Whether redelivering the same event can never succeed.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Metadata(_) | Self::UnknownProduct(_))
    }
}

/// Purchase order step result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PurchaseStep {
    Reconciled { report: PurchaseReport },
    NotApplicable { reason: String },
    Failed { error: String },
}

impl PurchaseStep {
    fn purchase_order_id(&self) -> Option<booking_bridge_core::PurchaseOrderId> {
        match self {
            Self::Reconciled { report } => Some(report.purchase_order_id),
            Self::NotApplicable { .. } | Self::Failed { .. } => None,
        }
    }
}

/// Booking store step result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistStep {
    /// New row with every field.
    Inserted,
    /// New row with the reduced field set after the full insert failed.
    InsertedReduced,
    /// Row already existed; Odoo references refreshed.
    Existing,
    Failed { error: String },
}

/// Confirmation step result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotifyStep {
    Sent,
    AlreadySent,
    Skipped { reason: String },
    Failed { error: String },
}

/// What a reconciled payment produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookReport {
    pub payment_intent_id: String,
    pub order_number: String,
    pub booking_id: Uuid,
    /// Metadata was completed from the checkout session.
    pub enriched_from_session: bool,
    pub partner_id: PartnerId,
    /// The minimal email-and-name partner was used.
    pub partner_fallback: bool,
    pub product_id: ErpProductId,
    pub sale_order: SaleOrderOutcome,
    pub purchase: PurchaseStep,
    pub booking: PersistStep,
    pub notification: NotifyStep,
}

/// Validated booking details pulled from metadata.
struct BookingDetails {
    order_number: String,
    customer_email: String,
    product_uuid: Uuid,
    guests: u32,
    dogs: u32,
}

impl BookingDetails {
    fn from_metadata(metadata: &BookingMetadata) -> Result<Self, WebhookError> {
        let order_number = metadata
            .order_number
            .clone()
            .ok_or_else(|| WebhookError::Metadata("missing order_number".to_string()))?;
        let customer_email = metadata
            .customer_email
            .clone()
            .ok_or_else(|| WebhookError::Metadata("missing customer_email".to_string()))?;
        let product_uuid = metadata
            .product_uuid()
            .ok_or_else(|| WebhookError::Metadata("missing or invalid product_id".to_string()))?;
        let guests = metadata
            .guests()
            .filter(|g| *g > 0)
            .ok_or_else(|| WebhookError::Metadata("missing or invalid guests".to_string()))?;

        Ok(Self {
            order_number,
            customer_email,
            product_uuid,
            guests,
            dogs: metadata.dogs(),
        })
    }
}

/// Drives a paid intent through Odoo and the booking store.
#[derive(Clone)]
pub struct WebhookOrchestrator {
    odoo: Arc<dyn OdooRpc>,
    store: Arc<dyn BookingStore>,
    gateways: Gateways,
    notifier: Arc<dyn Notifier>,
    settings: ReconcileSettings,
}

impl WebhookOrchestrator {
    #[must_use]
    pub fn new(
        odoo: Arc<dyn OdooRpc>,
        store: Arc<dyn BookingStore>,
        gateways: Gateways,
        notifier: Arc<dyn Notifier>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            odoo,
            store,
            gateways,
            notifier,
            settings,
        }
    }

    /// Reconcile a succeeded payment intent.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError` when metadata is unusable, the catalog lookup
    /// fails, or no sale order can be produced. Purchase order, persistence
    /// and notification failures are reported in the [`WebhookReport`].
    #[instrument(skip(self, intent), fields(payment_intent_id = %intent.id))]
    pub async fn handle_payment_succeeded(
        &self,
        intent: &PaymentIntent,
    ) -> Result<WebhookReport, WebhookError> {
        let mut metadata = BookingMetadata::from_map(&intent.metadata);
        // Tax identifiers alone only justify a fetch when the session id is at hand
        let wants_session = !metadata.missing_required().is_empty()
            || (metadata.missing_tax_identity()
                && intent.metadata.contains_key(SESSION_METADATA_KEY));
        let enriched_from_session = wants_session && self.enrich(intent, &mut metadata).await;
        if metadata.customer_email.is_none() {
            metadata.customer_email = intent
                .receipt_email
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string);
        }
        let details = BookingDetails::from_metadata(&metadata)?;

        let product = self
            .store
            .find_product(details.product_uuid)
            .await?
            .ok_or(WebhookError::UnknownProduct(details.product_uuid))?;

        let existing = match self.store.find_booking_by_payment_intent(&intent.id).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(error = %e, "Booking lookup failed, continuing as new booking");
                None
            }
        };
        let booking_id = existing.as_ref().map_or_else(Uuid::new_v4, |b| b.id);

        let product_id = self.product_mapping(&product).await?;

        let partner_input = metadata.partner_input(&details.customer_email);
        let (partner_id, partner_fallback) =
            match resolve_partner(self.odoo.as_ref(), &partner_input, &self.settings).await {
                Ok(resolved) => (resolved.id, false),
                Err(e) => {
                    tracing::warn!(error = %e, "Partner resolution failed, using fallback partner");
                    let id = fallback_partner(
                        self.odoo.as_ref(),
                        &details.customer_email,
                        partner_input.display_name(),
                    )
                    .await
                    .map_err(WebhookError::Partner)?;
                    (id, true)
                }
            };

        let sale_input = SaleOrderInput {
            payment_intent_id: intent.id.clone(),
            order_number: details.order_number.clone(),
            partner_id,
            product_id,
            product_external_id: product.id.to_string(),
            product_type: product.product_type,
            product_name: product.name.clone(),
            customer_email: details.customer_email.clone(),
            fiscal_code: metadata.fiscal_code.clone(),
            address: metadata.address().one_line(),
            booking_date: metadata.booking_date.clone(),
            booking_time: metadata.time_slot.clone(),
            guests: details.guests,
            dogs: details.dogs,
            total: intent.charged(),
        };
        let sale_order = reconcile_sale_order(self.odoo.as_ref(), &sale_input, &self.settings).await?;

        let supplier_cost = product.supplier_cost(details.guests, details.dogs);
        let purchase = self
            .purchase_order(&product, product_id, booking_id, &sale_order, &sale_input, supplier_cost)
            .await;

        let new_booking = NewBooking {
            id: booking_id,
            payment_intent_id: intent.id.clone(),
            order_number: details.order_number.clone(),
            product_id: Some(product.id),
            slot_id: metadata.slot_uuid(),
            booking_date: metadata.booking_date(),
            time_slot: metadata.time_slot.clone(),
            guests: details.guests,
            dogs: details.dogs,
            customer_email: details.customer_email.clone(),
            customer_name: metadata.customer_name.clone(),
            total: intent.charged(),
            currency: intent.currency.to_uppercase(),
            supplier_cost,
            status: BookingStatus::Confirmed,
            odoo: OdooRefs {
                partner_id: Some(partner_id),
                sale_order_id: Some(sale_order.id),
                sale_order_name: Some(sale_order.name.clone()),
                sale_order_line_id: sale_order.line_id,
                purchase_order_id: purchase.purchase_order_id(),
            },
        };
        let (booking, stored_id) = self.persist(existing.is_some(), &new_booking).await;
        let booking_id = stored_id.unwrap_or(booking_id);

        let notification = if let Some(stored_id) = stored_id {
            let confirmation = BookingConfirmation {
                order_number: details.order_number.clone(),
                customer_email: details.customer_email.clone(),
                customer_name: metadata
                    .customer_name
                    .clone()
                    .unwrap_or_else(|| partner_input.display_name().to_string()),
                product_name: product.name.clone(),
                booking_date: metadata.booking_date.clone(),
                time_slot: metadata.time_slot.clone(),
                party: describe_party(details.guests, details.dogs),
                total: intent.charged(),
                currency: intent.currency.to_uppercase(),
                sale_order_name: Some(sale_order.name.clone()),
            };
            self.notify(stored_id, &confirmation).await
        } else {
            NotifyStep::Skipped {
                reason: "booking not persisted".to_string(),
            }
        };

        tracing::info!(
            sale_order_id = %sale_order.id,
            sale_order = %sale_order.name,
            created = sale_order.created,
            "Payment reconciled"
        );

        Ok(WebhookReport {
            payment_intent_id: intent.id.clone(),
            order_number: details.order_number,
            booking_id,
            enriched_from_session,
            partner_id,
            partner_fallback,
            product_id,
            sale_order,
            purchase,
            booking,
            notification,
        })
    }

    /// Complete `metadata` from the checkout session behind the intent.
    async fn enrich(&self, intent: &PaymentIntent, metadata: &mut BookingMetadata) -> bool {
        let session_id = match intent.metadata.get(SESSION_METADATA_KEY) {
            Some(id) => Some(id.clone()),
            None => match self.gateways.select(None, None) {
                Ok(gateway) => gateway.find_session_id(&intent.id).await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Checkout session lookup failed");
                    None
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "No gateway for checkout session lookup");
                    None
                }
            },
        };
        let Some(session_id) = session_id else {
            tracing::debug!("No checkout session to enrich metadata from");
            return false;
        };

        let session = match self.gateways.select(None, Some(&session_id)) {
            Ok(gateway) => gateway.fetch_checkout_session(&session_id).await,
            Err(e) => Err(e),
        };
        match session {
            Ok(session) => {
                metadata.enrich_from_session(&session);
                tracing::info!(session_id = %session_id, "Metadata enriched from checkout session");
                true
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Checkout session fetch failed");
                false
            }
        }
    }

    /// Odoo product for a catalog product, mapping it on first use.
    async fn product_mapping(&self, product: &CatalogProduct) -> Result<ErpProductId, WebhookError> {
        if let Some(id) = product.odoo_product_id {
            return Ok(id);
        }
        let resolved = resolve_product(self.odoo.as_ref(), &product.to_product_input())
            .await
            .map_err(WebhookError::Product)?;
        if let Err(e) = self.store.set_odoo_product_id(product.id, resolved.id).await {
            tracing::warn!(product_id = %product.id, error = %e, "Failed to store product mapping");
        }
        Ok(resolved.id)
    }

    async fn purchase_order(
        &self,
        product: &CatalogProduct,
        product_id: ErpProductId,
        booking_id: Uuid,
        sale_order: &SaleOrderOutcome,
        sale_input: &SaleOrderInput,
        supplier_cost: Option<Decimal>,
    ) -> PurchaseStep {
        if supplier_cost.is_none() {
            return PurchaseStep::NotApplicable {
                reason: "product has no supplier cost".to_string(),
            };
        }
        let provider = match product.provider_id {
            Some(provider_id) => match self.store.find_provider(provider_id).await {
                Ok(provider) => provider,
                Err(e) => {
                    tracing::warn!(error = %e, "Provider lookup failed");
                    return PurchaseStep::Failed {
                        error: e.to_string(),
                    };
                }
            },
            None => None,
        };
        let Some(provider) = provider else {
            return PurchaseStep::NotApplicable {
                reason: "product has no provider".to_string(),
            };
        };

        let input = PurchaseInput {
            sale_order_id: sale_order.id,
            sale_order_name: sale_order.name.clone(),
            sale_line_id: sale_order.line_id,
            booking_id: booking_id.to_string(),
            supplier_name: provider.name,
            supplier_email: provider.email,
            product: product.to_product_input(),
            product_id: Some(product_id),
            supplier_cost,
            description: sale_input.line_description(),
        };
        match reconcile_purchase_order(self.odoo.as_ref(), &input, &self.settings).await {
            Ok(report) => PurchaseStep::Reconciled { report },
            Err(e) => {
                tracing::warn!(sale_order = %sale_order.name, error = %e, "Purchase order reconciliation failed");
                PurchaseStep::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Write the booking row. Returns the step and the id of the stored row,
    /// which differs from `booking.id` when another delivery wrote it first.
    async fn persist(&self, exists: bool, booking: &NewBooking) -> (PersistStep, Option<Uuid>) {
        if exists {
            return self.refresh_refs(booking).await;
        }

        let step = match self.store.insert_booking(booking).await {
            Ok(true) => PersistStep::Inserted,
            Ok(false) => return self.refresh_refs(booking).await,
            Err(e) => {
                tracing::warn!(error = %e, "Booking insert failed, retrying with reduced fields");
                match self.store.insert_booking(&booking.reduced()).await {
                    Ok(true) => PersistStep::InsertedReduced,
                    Ok(false) => return self.refresh_refs(booking).await,
                    Err(e) => {
                        tracing::error!(error = %e, "Booking could not be persisted");
                        return (
                            PersistStep::Failed {
                                error: e.to_string(),
                            },
                            None,
                        );
                    }
                }
            }
        };

        if let Some(slot_id) = booking.slot_id {
            match self.store.reserve_slot(slot_id, booking.guests).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(slot_id = %slot_id, "Slot capacity exceeded by paid booking"),
                Err(e) => tracing::warn!(slot_id = %slot_id, error = %e, "Slot reservation failed"),
            }
        }
        (step, Some(booking.id))
    }

    /// Refresh the Odoo references of the row already stored for the intent.
    async fn refresh_refs(&self, booking: &NewBooking) -> (PersistStep, Option<Uuid>) {
        match self
            .store
            .update_odoo_refs(&booking.payment_intent_id, &booking.odoo)
            .await
        {
            Ok(stored_id) => (PersistStep::Existing, Some(stored_id)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to refresh booking Odoo references");
                (
                    PersistStep::Failed {
                        error: e.to_string(),
                    },
                    None,
                )
            }
        }
    }

    async fn notify(&self, booking_id: Uuid, confirmation: &BookingConfirmation) -> NotifyStep {
        match self.store.claim_confirmation(booking_id).await {
            Ok(true) => {}
            Ok(false) => return NotifyStep::AlreadySent,
            Err(e) => {
                tracing::warn!(error = %e, "Could not claim confirmation email");
                return NotifyStep::Failed {
                    error: e.to_string(),
                };
            }
        }

        match self.notifier.send_booking_confirmation(confirmation).await {
            Ok(()) => NotifyStep::Sent,
            Err(e) => {
                tracing::warn!(error = %e, "Confirmation email failed");
                if let Err(e) = self.store.release_confirmation(booking_id).await {
                    tracing::warn!(error = %e, "Could not release confirmation claim");
                }
                NotifyStep::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

//! Catch-up jobs run from the sync endpoints and the CLI.
//!
//! Product sync pushes catalog products to Odoo and remembers the mapping.
//! Purchase sync re-runs the purchase order engine for confirmed bookings
//! whose webhook never got as far as the supplier order. Each item is
//! reported on its own; one failure does not stop the batch.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use booking_bridge_core::{ErpProductId, ProductType};

use crate::db::{BookingStore, RepositoryError};
use crate::models::{Booking, CatalogProduct, OdooRefs};
use crate::odoo::OdooRpc;
use crate::reconcile::{
    ProductMatch, PurchaseError, PurchaseInput, PurchaseReport, ReconcileSettings, ResolveError,
    booking_line_description, reconcile_purchase_order, resolve_product,
};

/// Errors from a sync run or one of its items.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    /// The booking lacks data the purchase order needs.
    #[error("Booking incomplete: {0}")]
    Incomplete(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Purchase(#[from] PurchaseError),

    #[error("Repository error: {0}")]
    Store(#[from] RepositoryError),
}

/// Optional narrowing of a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncFilter {
    pub product_id: Option<Uuid>,
    pub product_type: Option<ProductType>,
}

impl SyncFilter {
    fn accepts(&self, product: &CatalogProduct) -> bool {
        self.product_type.is_none_or(|kind| product.product_type == kind)
    }
}

/// Outcome of syncing one catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSyncItem {
    pub product_id: Uuid,
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub odoo_product_id: Option<ErpProductId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<ProductMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of syncing one booking's purchase order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseSyncItem {
    pub booking_id: Uuid,
    pub order_number: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PurchaseReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-item results with aggregate counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary<T> {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<T>,
}

impl<T> SyncSummary<T> {
    fn new(results: Vec<T>, success: impl Fn(&T) -> bool) -> Self {
        let succeeded = results.iter().filter(|item| success(item)).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }
}

/// Runs product and purchase order syncs.
#[derive(Clone)]
pub struct SyncService {
    odoo: Arc<dyn OdooRpc>,
    store: Arc<dyn BookingStore>,
    settings: ReconcileSettings,
}

impl SyncService {
    #[must_use]
    pub fn new(
        odoo: Arc<dyn OdooRpc>,
        store: Arc<dyn BookingStore>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            odoo,
            store,
            settings,
        }
    }

    /// Resolve one or all active catalog products in Odoo.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::ProductNotFound` for an unknown `product_id`
    /// filter and `SyncError::Store` if the catalog cannot be read.
    #[instrument(skip(self))]
    pub async fn sync_products(
        &self,
        filter: &SyncFilter,
    ) -> Result<SyncSummary<ProductSyncItem>, SyncError> {
        let products = match filter.product_id {
            Some(id) => vec![
                self.store
                    .find_product(id)
                    .await?
                    .ok_or(SyncError::ProductNotFound(id))?,
            ],
            None => self.store.list_active_products().await?,
        };

        let mut results = Vec::new();
        for product in products.into_iter().filter(|p| filter.accepts(p)) {
            let item = match self.sync_product(&product).await {
                Ok((odoo_product_id, matched)) => ProductSyncItem {
                    product_id: product.id,
                    name: product.name,
                    success: true,
                    odoo_product_id: Some(odoo_product_id),
                    matched: Some(matched),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(product_id = %product.id, error = %e, "Product sync failed");
                    ProductSyncItem {
                        product_id: product.id,
                        name: product.name,
                        success: false,
                        odoo_product_id: None,
                        matched: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(item);
        }

        let summary = SyncSummary::new(results, |item| item.success);
        tracing::info!(
            total = summary.total,
            failed = summary.failed,
            "Product sync finished"
        );
        Ok(summary)
    }

    async fn sync_product(
        &self,
        product: &CatalogProduct,
    ) -> Result<(ErpProductId, ProductMatch), SyncError> {
        let resolved = resolve_product(self.odoo.as_ref(), &product.to_product_input()).await?;
        if product.odoo_product_id != Some(resolved.id) {
            self.store
                .set_odoo_product_id(product.id, resolved.id)
                .await?;
        }
        Ok((resolved.id, resolved.matched))
    }

    /// Reconcile purchase orders for confirmed bookings that have none.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Store` if pending bookings cannot be listed.
    #[instrument(skip(self))]
    pub async fn sync_purchase_orders(
        &self,
        filter: &SyncFilter,
    ) -> Result<SyncSummary<PurchaseSyncItem>, SyncError> {
        let bookings = self
            .store
            .bookings_missing_purchase_order(filter.product_id)
            .await?;

        let mut products: HashMap<Uuid, CatalogProduct> = HashMap::new();
        let mut results = Vec::new();
        for booking in bookings {
            let product = match self.product_for(&booking, &mut products).await {
                Ok(product) => product,
                Err(e) => {
                    results.push(failed_purchase(&booking, &e));
                    continue;
                }
            };
            if !filter.accepts(&product) {
                continue;
            }
            let item = match self.sync_booking(&booking, &product).await {
                Ok(report) => PurchaseSyncItem {
                    booking_id: booking.id,
                    order_number: booking.order_number,
                    success: true,
                    report: Some(report),
                    error: None,
                },
                Err(e) => failed_purchase(&booking, &e),
            };
            results.push(item);
        }

        let summary = SyncSummary::new(results, |item| item.success);
        tracing::info!(
            total = summary.total,
            failed = summary.failed,
            "Purchase order sync finished"
        );
        Ok(summary)
    }

    async fn product_for(
        &self,
        booking: &Booking,
        cache: &mut HashMap<Uuid, CatalogProduct>,
    ) -> Result<CatalogProduct, SyncError> {
        let id = booking
            .product_id
            .ok_or_else(|| SyncError::Incomplete("no product".to_string()))?;
        if let Some(product) = cache.get(&id) {
            return Ok(product.clone());
        }
        let product = self
            .store
            .find_product(id)
            .await?
            .ok_or(SyncError::ProductNotFound(id))?;
        cache.insert(id, product.clone());
        Ok(product)
    }

    async fn sync_booking(
        &self,
        booking: &Booking,
        product: &CatalogProduct,
    ) -> Result<PurchaseReport, SyncError> {
        let (Some(sale_order_id), Some(sale_order_name)) = (
            booking.odoo.sale_order_id,
            booking.odoo.sale_order_name.clone(),
        ) else {
            return Err(SyncError::Incomplete("no sale order".to_string()));
        };
        let provider_id = product
            .provider_id
            .ok_or_else(|| SyncError::Incomplete("product has no provider".to_string()))?;
        let provider = self
            .store
            .find_provider(provider_id)
            .await?
            .ok_or_else(|| SyncError::Incomplete(format!("provider {provider_id} not found")))?;

        let date = booking.booking_date.map(|d| d.to_string());
        let input = PurchaseInput {
            sale_order_id,
            sale_order_name,
            sale_line_id: booking.odoo.sale_order_line_id,
            booking_id: booking.id.to_string(),
            supplier_name: provider.name,
            supplier_email: provider.email,
            product: product.to_product_input(),
            product_id: product.odoo_product_id,
            supplier_cost: booking.supplier_cost,
            description: booking_line_description(
                &product.name,
                date.as_deref(),
                booking.time_slot.as_deref(),
                booking.guests,
                booking.dogs,
            ),
        };

        let report = reconcile_purchase_order(self.odoo.as_ref(), &input, &self.settings).await?;
        let refs = OdooRefs {
            purchase_order_id: Some(report.purchase_order_id),
            ..OdooRefs::default()
        };
        self.store
            .update_odoo_refs(&booking.payment_intent_id, &refs)
            .await?;
        tracing::info!(
            booking_id = %booking.id,
            purchase_order = %report.purchase_order_name,
            "Purchase order synced"
        );
        Ok(report)
    }
}

fn failed_purchase(booking: &Booking, error: &SyncError) -> PurchaseSyncItem {
    tracing::warn!(booking_id = %booking.id, error = %error, "Purchase order sync failed");
    PurchaseSyncItem {
        booking_id: booking.id,
        order_number: booking.order_number.clone(),
        success: false,
        report: None,
        error: Some(error.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use booking_bridge_core::{BookingStatus, SaleOrderId};

    use super::*;
    use crate::models::NewBooking;
    use crate::reconcile::PurchaseAction;
    use crate::testing::fixtures::{self, Catalog};
    use crate::testing::{FakeOdoo, MemoryBookingStore};

    fn service(odoo: &Arc<FakeOdoo>, store: &Arc<MemoryBookingStore>) -> SyncService {
        SyncService::new(odoo.clone(), store.clone(), ReconcileSettings::default())
    }

    fn confirmed_booking(catalog: &Catalog, order_number: &str, sale_order: i64) -> NewBooking {
        NewBooking {
            id: Uuid::new_v4(),
            payment_intent_id: format!("pi_{order_number}"),
            order_number: order_number.to_string(),
            product_id: Some(catalog.product.id),
            slot_id: Some(catalog.slot.id),
            booking_date: NaiveDate::from_ymd_opt(2026, 7, 1),
            time_slot: Some("09:30".to_string()),
            guests: 2,
            dogs: 0,
            customer_email: "mario.rossi@example.com".to_string(),
            customer_name: Some("Mario Rossi".to_string()),
            total: Decimal::new(100, 0),
            currency: "EUR".to_string(),
            supplier_cost: Some(Decimal::new(60, 0)),
            status: BookingStatus::Confirmed,
            odoo: OdooRefs {
                sale_order_id: Some(SaleOrderId::new(sale_order)),
                sale_order_name: Some(format!("S{sale_order:05}")),
                ..OdooRefs::default()
            },
        }
    }

    #[tokio::test]
    async fn test_sync_products_stores_mapping() {
        let odoo = Arc::new(FakeOdoo::new());
        let store = Arc::new(MemoryBookingStore::new());
        let catalog = fixtures::seed_catalog(&store);
        let sync = service(&odoo, &store);

        let summary = sync.sync_products(&SyncFilter::default()).await.unwrap();
        assert_eq!((summary.total, summary.succeeded, summary.failed), (1, 1, 0));
        let mapped = store.product(catalog.product.id).unwrap().odoo_product_id;
        assert_eq!(mapped, summary.results[0].odoo_product_id);

        let again = sync.sync_products(&SyncFilter::default()).await.unwrap();
        assert_eq!(again.results[0].odoo_product_id, mapped);
        assert_eq!(odoo.count("product.product"), 1);
    }

    #[tokio::test]
    async fn test_sync_products_filters() {
        let odoo = Arc::new(FakeOdoo::new());
        let store = Arc::new(MemoryBookingStore::new());
        let catalog = fixtures::seed_catalog(&store);
        let sync = service(&odoo, &store);

        let other_type = SyncFilter {
            product_type: Some(ProductType::Trip),
            ..SyncFilter::default()
        };
        let summary = sync.sync_products(&other_type).await.unwrap();
        assert_eq!(summary.total, 0);

        let missing = SyncFilter {
            product_id: Some(Uuid::new_v4()),
            ..SyncFilter::default()
        };
        assert!(matches!(
            sync.sync_products(&missing).await,
            Err(SyncError::ProductNotFound(_))
        ));

        let one = SyncFilter {
            product_id: Some(catalog.product.id),
            ..SyncFilter::default()
        };
        assert_eq!(sync.sync_products(&one).await.unwrap().succeeded, 1);
    }

    #[tokio::test]
    async fn test_sync_products_reports_item_failure() {
        let odoo = Arc::new(FakeOdoo::new().failing("product.product", "search"));
        let store = Arc::new(MemoryBookingStore::new());
        let _catalog = fixtures::seed_catalog(&store);

        let summary = service(&odoo, &store)
            .sync_products(&SyncFilter::default())
            .await
            .unwrap();
        assert_eq!((summary.total, summary.failed), (1, 1));
        assert!(summary.results[0].error.is_some());
    }

    #[tokio::test]
    async fn test_sync_purchase_orders_groups_and_records() {
        let odoo = Arc::new(FakeOdoo::new());
        let store = Arc::new(MemoryBookingStore::new());
        let catalog = fixtures::seed_catalog(&store);
        for (order, sale_order) in [("BK-20260701-AAAAAA", 41), ("BK-20260701-BBBBBB", 42)] {
            store
                .insert_booking(&confirmed_booking(&catalog, order, sale_order))
                .await
                .unwrap();
        }
        let sync = service(&odoo, &store);

        let summary = sync.sync_purchase_orders(&SyncFilter::default()).await.unwrap();
        assert_eq!((summary.total, summary.succeeded), (2, 2));
        let actions: Vec<_> = summary
            .results
            .iter()
            .map(|item| item.report.as_ref().unwrap().action)
            .collect();
        assert!(actions.contains(&PurchaseAction::Created));
        assert!(actions.contains(&PurchaseAction::Appended));
        assert_eq!(odoo.count("purchase.order"), 1);
        assert_eq!(odoo.count("purchase.order.line"), 2);
        assert!(
            store
                .bookings()
                .iter()
                .all(|b| b.odoo.purchase_order_id.is_some())
        );

        let rerun = sync.sync_purchase_orders(&SyncFilter::default()).await.unwrap();
        assert_eq!(rerun.total, 0);
        assert_eq!(odoo.count("purchase.order.line"), 2);
    }

    #[tokio::test]
    async fn test_sync_purchase_orders_without_provider() {
        let odoo = Arc::new(FakeOdoo::new());
        let store = Arc::new(MemoryBookingStore::new());
        let mut product = fixtures::product(None);
        product.name = "Orphan Tour".to_string();
        store.add_product(product.clone());
        let catalog = Catalog {
            provider: fixtures::provider(),
            slot: fixtures::slot(product.id, 4),
            product,
        };
        store
            .insert_booking(&confirmed_booking(&catalog, "BK-20260701-CCCCCC", 7))
            .await
            .unwrap();

        let summary = service(&odoo, &store)
            .sync_purchase_orders(&SyncFilter::default())
            .await
            .unwrap();
        assert_eq!((summary.total, summary.failed), (1, 1));
        assert_eq!(odoo.count("purchase.order"), 0);
    }
}

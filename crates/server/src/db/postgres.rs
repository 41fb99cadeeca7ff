//! `PostgreSQL` booking store.
//!
//! Queries are built at runtime with `sqlx::query_as` so the crate compiles
//! without a live database.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use booking_bridge_core::{
    BookingStatus, CostList, ErpProductId, PartnerId, PriceList, PricingType, ProductType,
    PurchaseOrderId, SaleOrderId, SaleOrderLineId,
};

use super::{BookingStore, RepositoryError};
use crate::models::{AvailabilitySlot, Booking, CatalogProduct, NewBooking, OdooRefs, Provider};

const PRODUCT_COLUMNS: &str = "id, provider_id, name, description, product_type, pricing_type, \
     adult_price, dog_price, supplier_cost_adult, supplier_cost_dog, odoo_product_id, active";

const BOOKING_COLUMNS: &str = "id, payment_intent_id, order_number, product_id, slot_id, \
     booking_date, time_slot, guests, dogs, customer_email, customer_name, total, currency, \
     supplier_cost, status, odoo_partner_id, odoo_sale_order_id, odoo_sale_order_name, \
     odoo_sale_order_line_id, odoo_purchase_order_id, confirmation_sent_at, created_at";

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ProviderRow {
    id: Uuid,
    name: String,
    email: Option<String>,
}

impl From<ProviderRow> for Provider {
    fn from(row: ProviderRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    provider_id: Option<Uuid>,
    name: String,
    description: Option<String>,
    product_type: ProductType,
    pricing_type: String,
    adult_price: Decimal,
    dog_price: Decimal,
    supplier_cost_adult: Option<Decimal>,
    supplier_cost_dog: Option<Decimal>,
    odoo_product_id: Option<i64>,
    active: bool,
}

impl TryFrom<ProductRow> for CatalogProduct {
    type Error = RepositoryError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let pricing_type: PricingType = row.pricing_type.parse().map_err(|e| {
            RepositoryError::DataCorruption(format!("product {}: {e}", row.id))
        })?;

        Ok(Self {
            id: row.id,
            provider_id: row.provider_id,
            name: row.name,
            description: row.description,
            product_type: row.product_type,
            prices: PriceList {
                adult: row.adult_price,
                dog: row.dog_price,
                pricing_type,
            },
            costs: CostList {
                adult: row.supplier_cost_adult,
                dog: row.supplier_cost_dog,
            },
            odoo_product_id: row.odoo_product_id.map(ErpProductId::new),
            active: row.active,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SlotRow {
    id: Uuid,
    product_id: Uuid,
    date: NaiveDate,
    time_slot: Option<String>,
    capacity: i32,
    booked: i32,
    created_at: DateTime<Utc>,
}

impl From<SlotRow> for AvailabilitySlot {
    fn from(row: SlotRow) -> Self {
        Self {
            id: row.id,
            product_id: row.product_id,
            date: row.date,
            time_slot: row.time_slot,
            capacity: row.capacity,
            booked: row.booked,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    payment_intent_id: String,
    order_number: String,
    product_id: Option<Uuid>,
    slot_id: Option<Uuid>,
    booking_date: Option<NaiveDate>,
    time_slot: Option<String>,
    guests: i32,
    dogs: i32,
    customer_email: String,
    customer_name: Option<String>,
    total: Decimal,
    currency: String,
    supplier_cost: Option<Decimal>,
    status: BookingStatus,
    odoo_partner_id: Option<i64>,
    odoo_sale_order_id: Option<i64>,
    odoo_sale_order_name: Option<String>,
    odoo_sale_order_line_id: Option<i64>,
    odoo_purchase_order_id: Option<i64>,
    confirmation_sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = RepositoryError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let count = |value: i32, column: &str| {
            u32::try_from(value).map_err(|_| {
                RepositoryError::DataCorruption(format!(
                    "booking {}: negative {column} ({value})",
                    row.id
                ))
            })
        };
        let guests = count(row.guests, "guests")?;
        let dogs = count(row.dogs, "dogs")?;

        Ok(Self {
            id: row.id,
            payment_intent_id: row.payment_intent_id,
            order_number: row.order_number,
            product_id: row.product_id,
            slot_id: row.slot_id,
            booking_date: row.booking_date,
            time_slot: row.time_slot,
            guests,
            dogs,
            customer_email: row.customer_email,
            customer_name: row.customer_name,
            total: row.total,
            currency: row.currency,
            supplier_cost: row.supplier_cost,
            status: row.status,
            odoo: OdooRefs {
                partner_id: row.odoo_partner_id.map(PartnerId::new),
                sale_order_id: row.odoo_sale_order_id.map(SaleOrderId::new),
                sale_order_name: row.odoo_sale_order_name,
                sale_order_line_id: row.odoo_sale_order_line_id.map(SaleOrderLineId::new),
                purchase_order_id: row.odoo_purchase_order_id.map(PurchaseOrderId::new),
            },
            confirmation_sent_at: row.confirmation_sent_at,
            created_at: row.created_at,
        })
    }
}

fn to_i32(value: u32, column: &str) -> Result<i32, RepositoryError> {
    i32::try_from(value)
        .map_err(|_| RepositoryError::Conflict(format!("{column} out of range: {value}")))
}

// =============================================================================
// Store
// =============================================================================

/// Booking store backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_product(&self, id: Uuid) -> Result<Option<CatalogProduct>, RepositoryError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        sqlx::query_as::<_, ProductRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(CatalogProduct::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn list_active_products(&self) -> Result<Vec<CatalogProduct>, RepositoryError> {
        let sql =
            format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE active ORDER BY created_at, id");
        sqlx::query_as::<_, ProductRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(CatalogProduct::try_from)
            .collect()
    }

    #[instrument(skip(self))]
    async fn find_provider(&self, id: Uuid) -> Result<Option<Provider>, RepositoryError> {
        let row = sqlx::query_as::<_, ProviderRow>(
            "SELECT id, name, email FROM providers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Provider::from))
    }

    #[instrument(skip(self))]
    async fn set_odoo_product_id(
        &self,
        product_id: Uuid,
        odoo_product_id: ErpProductId,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE products SET odoo_product_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(product_id)
        .bind(odoo_product_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_slot(&self, id: Uuid) -> Result<Option<AvailabilitySlot>, RepositoryError> {
        let row = sqlx::query_as::<_, SlotRow>(
            r"
            SELECT id, product_id, date, time_slot, capacity, booked, created_at
            FROM availability_slots
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AvailabilitySlot::from))
    }

    #[instrument(skip(self))]
    async fn reserve_slot(&self, slot_id: Uuid, seats: u32) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE availability_slots
            SET booked = booked + $2, updated_at = NOW()
            WHERE id = $1 AND booked + $2 <= capacity
            ",
        )
        .bind(slot_id)
        .bind(to_i32(seats, "seats")?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn find_booking_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Booking>, RepositoryError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE payment_intent_id = $1");
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(payment_intent_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Booking::try_from)
            .transpose()
    }

    #[instrument(skip(self, booking), fields(payment_intent_id = %booking.payment_intent_id))]
    async fn insert_booking(&self, booking: &NewBooking) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            INSERT INTO bookings (
                id, payment_intent_id, order_number, product_id, slot_id,
                booking_date, time_slot, guests, dogs, customer_email,
                customer_name, total, currency, supplier_cost, status,
                odoo_partner_id, odoo_sale_order_id, odoo_sale_order_name,
                odoo_sale_order_line_id, odoo_purchase_order_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT (payment_intent_id) DO NOTHING
            ",
        )
        .bind(booking.id)
        .bind(&booking.payment_intent_id)
        .bind(&booking.order_number)
        .bind(booking.product_id)
        .bind(booking.slot_id)
        .bind(booking.booking_date)
        .bind(&booking.time_slot)
        .bind(to_i32(booking.guests, "guests")?)
        .bind(to_i32(booking.dogs, "dogs")?)
        .bind(&booking.customer_email)
        .bind(&booking.customer_name)
        .bind(booking.total)
        .bind(&booking.currency)
        .bind(booking.supplier_cost)
        .bind(booking.status)
        .bind(booking.odoo.partner_id)
        .bind(booking.odoo.sale_order_id)
        .bind(&booking.odoo.sale_order_name)
        .bind(booking.odoo.sale_order_line_id)
        .bind(booking.odoo.purchase_order_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, refs))]
    async fn update_odoo_refs(
        &self,
        payment_intent_id: &str,
        refs: &OdooRefs,
    ) -> Result<Uuid, RepositoryError> {
        sqlx::query_scalar::<_, Uuid>(
            r"
            UPDATE bookings SET
                odoo_partner_id = COALESCE($2, odoo_partner_id),
                odoo_sale_order_id = COALESCE($3, odoo_sale_order_id),
                odoo_sale_order_name = COALESCE($4, odoo_sale_order_name),
                odoo_sale_order_line_id = COALESCE($5, odoo_sale_order_line_id),
                odoo_purchase_order_id = COALESCE($6, odoo_purchase_order_id),
                updated_at = NOW()
            WHERE payment_intent_id = $1
            RETURNING id
            ",
        )
        .bind(payment_intent_id)
        .bind(refs.partner_id)
        .bind(refs.sale_order_id)
        .bind(&refs.sale_order_name)
        .bind(refs.sale_order_line_id)
        .bind(refs.purchase_order_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)
    }

    #[instrument(skip(self))]
    async fn claim_confirmation(&self, booking_id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE bookings SET confirmation_sent_at = NOW()
            WHERE id = $1 AND confirmation_sent_at IS NULL
            ",
        )
        .bind(booking_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn release_confirmation(&self, booking_id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE bookings SET confirmation_sent_at = NULL WHERE id = $1")
            .bind(booking_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn bookings_missing_purchase_order(
        &self,
        product_id: Option<Uuid>,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let sql = format!(
            r"
            SELECT {BOOKING_COLUMNS} FROM bookings
            WHERE status = 'confirmed'
              AND supplier_cost IS NOT NULL
              AND odoo_sale_order_id IS NOT NULL
              AND odoo_purchase_order_id IS NULL
              AND ($1::uuid IS NULL OR product_id = $1)
            ORDER BY created_at, id
            "
        );
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(product_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Booking::try_from)
            .collect()
    }
}

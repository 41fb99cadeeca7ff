//! Catalog models: who supplies what, at which price, with how many seats.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use booking_bridge_core::{CostList, ErpProductId, PriceList, ProductType};

use crate::reconcile::ProductInput;

/// A supplier running experiences, classes or trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    /// Legal name, also the Odoo supplier name.
    pub name: String,
    pub email: Option<String>,
}

/// A bookable product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    /// Stable external id, mirrored to `x_booking_product_id` in Odoo.
    pub id: Uuid,
    pub provider_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub product_type: ProductType,
    /// Customer prices.
    pub prices: PriceList,
    /// Supplier costs; no cost means no purchase order.
    pub costs: CostList,
    /// Odoo `product.product` id once synced.
    pub odoo_product_id: Option<ErpProductId>,
    pub active: bool,
}

impl CatalogProduct {
    /// Input for the Odoo product resolver.
    #[must_use]
    pub fn to_product_input(&self) -> ProductInput {
        ProductInput {
            external_id: self.id.to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            product_type: self.product_type,
            list_price: self.prices.adult,
        }
    }

    /// Supplier cost for a party, `None` when the product carries no cost.
    #[must_use]
    pub fn supplier_cost(&self, guests: u32, dogs: u32) -> Option<Decimal> {
        self.costs.total(guests, dogs)
    }
}

/// Seats for one product on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: Uuid,
    pub product_id: Uuid,
    pub date: NaiveDate,
    /// Start time label such as `09:30`, if the product has time slots.
    pub time_slot: Option<String>,
    pub capacity: i32,
    pub booked: i32,
    pub created_at: DateTime<Utc>,
}

impl AvailabilitySlot {
    /// Seats still free. Never negative.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        u32::try_from(self.capacity.saturating_sub(self.booked)).unwrap_or(0)
    }

    /// Whether `seats` more people fit.
    #[must_use]
    pub fn fits(&self, seats: u32) -> bool {
        seats <= self.remaining()
    }
}

#[cfg(test)]
mod tests {
    use booking_bridge_core::PricingType;

    use super::*;

    fn slot(capacity: i32, booked: i32) -> AvailabilitySlot {
        AvailabilitySlot {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap_or_default(),
            time_slot: None,
            capacity,
            booked,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_remaining_capacity() {
        assert_eq!(slot(10, 4).remaining(), 6);
        assert!(slot(10, 4).fits(6));
        assert!(!slot(10, 4).fits(7));
        // Overbooked rows never report negative capacity
        assert_eq!(slot(2, 5).remaining(), 0);
    }

    #[test]
    fn test_product_input_uses_adult_price() {
        let product = CatalogProduct {
            id: Uuid::new_v4(),
            provider_id: None,
            name: "Kayak Tour".to_string(),
            description: None,
            product_type: ProductType::Experience,
            prices: PriceList {
                adult: Decimal::new(50, 0),
                dog: Decimal::new(25, 0),
                pricing_type: PricingType::Linear,
            },
            costs: CostList {
                adult: Some(Decimal::new(30, 0)),
                dog: None,
            },
            odoo_product_id: None,
            active: true,
        };
        let input = product.to_product_input();
        assert_eq!(input.external_id, product.id.to_string());
        assert_eq!(input.list_price, Decimal::new(50, 0));
        assert_eq!(product.supplier_cost(2, 1), Some(Decimal::new(60, 0)));
    }
}

//! Product Aggregate
//!
//! Only the slice of the catalog the order engine needs: live price, stock and
//! availability. Catalog CRUD lives elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{Money, Quantity};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub producer_id: Uuid,
    pub title: String,
    pub price: Money,
    pub stock: Quantity,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn create(producer_id: Uuid, title: impl Into<String>, price: Money, stock: u32) -> Self {
        Self {
            id: Uuid::now_v7(), producer_id, title: title.into(), price,
            stock: Quantity::new(stock), is_active: true, updated_at: Utc::now(),
        }
    }

    pub fn is_orderable(&self) -> bool { self.is_active }

    /// Applies a signed stock change. Fails without mutating if the result would be negative.
    pub fn adjust_stock(&mut self, delta: i64) -> Result<Quantity, ProductError> {
        let next = i64::from(self.stock.value()) + delta;
        if next < 0 {
            return Err(ProductError::InsufficientStock { available: self.stock });
        }
        let next = u32::try_from(next).map_err(|_| ProductError::StockOverflow)?;
        self.stock = Quantity::new(next);
        self.touch();
        Ok(self.stock)
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProductError {
    #[error("insufficient stock ({available} available)")]
    InsufficientStock { available: Quantity },
    #[error("stock overflow")]
    StockOverflow,
}

//! Persistence collaborator.
//!
//! Every stock change goes through one conditional primitive that checks and
//! mutates in the same step (`stock + delta >= 0`). Status updates are
//! compare-and-set against the status the caller validated.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;
use crate::domain::aggregates::{ItemStatus, Order, OrderItem, OrderStatus, Product};
use crate::domain::value_objects::Quantity;
use crate::notifications::{NotificationEvent, NotificationStatus};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock { product_id: Uuid, requested: Quantity, available: Quantity },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn products(&self, ids: &[Uuid]) -> StoreResult<Vec<Product>>;

    /// Decrements stock for every item and inserts the order, all or nothing.
    async fn place_order(&self, order: &Order) -> StoreResult<()>;

    async fn order(&self, order_id: Uuid) -> StoreResult<Option<Order>>;

    async fn order_for_item(&self, item_id: Uuid) -> StoreResult<Option<Order>>;

    /// Moves an item from `from` to `to`, returning its stock if `to` requires it.
    /// `None` when the item is no longer in `from`.
    async fn update_item_status(&self, item_id: Uuid, from: ItemStatus, to: ItemStatus) -> StoreResult<Option<OrderItem>>;

    async fn item_statuses(&self, order_id: Uuid) -> StoreResult<Vec<ItemStatus>>;

    /// Compare-and-set on the order status. `None` when the order is no longer in `from`.
    async fn update_order_status(&self, order_id: Uuid, from: OrderStatus, to: OrderStatus) -> StoreResult<Option<Order>>;

    /// Cancels the order and every open item, returning their stock, in one step.
    async fn cancel_order(&self, order_id: Uuid, from: OrderStatus) -> StoreResult<Option<Order>>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Inserts unless an undelivered event with the same dedup key exists inside the
    /// window. Returns whether a row was written.
    async fn insert_unless_duplicate(&self, event: &NotificationEvent, window: Duration) -> StoreResult<bool>;

    async fn pending_events(&self, limit: usize) -> StoreResult<Vec<NotificationEvent>>;

    async fn mark_delivered(&self, event_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Counts a failed attempt; flips the event to `failed` at the ceiling.
    async fn record_failure(&self, event_id: Uuid, error: &str, max_attempts: u32, at: DateTime<Utc>) -> StoreResult<(NotificationStatus, u32)>;

    async fn failed_events(&self, limit: usize) -> StoreResult<Vec<NotificationEvent>>;
}

pub(crate) fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window).ok().and_then(|w| now.checked_sub_signed(w)).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

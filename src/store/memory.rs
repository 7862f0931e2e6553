//! In-memory store. One lock guards all state, so each operation is atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;
use crate::domain::aggregates::{ItemStatus, Order, OrderItem, OrderStatus, Product};
use crate::domain::value_objects::Quantity;
use crate::notifications::{NotificationEvent, NotificationStatus};
use super::{window_start, OrderStore, OutboxStore, StoreError, StoreResult};

#[derive(Default)]
struct State {
    products: HashMap<Uuid, Product>,
    orders: HashMap<Uuid, Order>,
    item_orders: HashMap<Uuid, Uuid>,
    events: Vec<NotificationEvent>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn insert_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    pub async fn product(&self, id: Uuid) -> Option<Product> {
        self.state.lock().await.products.get(&id).cloned()
    }

    pub async fn events(&self) -> Vec<NotificationEvent> {
        self.state.lock().await.events.clone()
    }
}

impl State {
    fn adjust_stock(&mut self, product_id: Uuid, delta: i64) -> StoreResult<()> {
        let product = self.products.get_mut(&product_id).ok_or_else(|| StoreError::Corrupt(format!("product {product_id} missing")))?;
        product.adjust_stock(delta).map(|_| ()).map_err(|_| StoreError::InsufficientStock {
            product_id,
            requested: Quantity::new(u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX)),
            available: product.stock,
        })
    }

    fn order_mut(&mut self, order_id: Uuid) -> Option<&mut Order> { self.orders.get_mut(&order_id) }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn products(&self, ids: &[Uuid]) -> StoreResult<Vec<Product>> {
        let state = self.state.lock().await;
        Ok(ids.iter().filter_map(|id| state.products.get(id).cloned()).collect())
    }

    async fn place_order(&self, order: &Order) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let mut wanted: BTreeMap<Uuid, u32> = BTreeMap::new();
        for item in &order.items {
            *wanted.entry(item.product_id).or_default() += item.qty.value();
        }
        // Check every row before touching any, so a failure leaves nothing behind.
        for (product_id, qty) in &wanted {
            let product = state.products.get(product_id).ok_or_else(|| StoreError::Corrupt(format!("product {product_id} missing")))?;
            if product.stock.value() < *qty {
                return Err(StoreError::InsufficientStock { product_id: *product_id, requested: Quantity::new(*qty), available: product.stock });
            }
        }
        for (product_id, qty) in wanted {
            state.adjust_stock(product_id, -i64::from(qty))?;
        }
        let mut stored = order.clone();
        stored.events.clear();
        for item in &stored.items {
            state.item_orders.insert(item.id, stored.id);
        }
        state.orders.insert(stored.id, stored);
        Ok(())
    }

    async fn order(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn order_for_item(&self, item_id: Uuid) -> StoreResult<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state.item_orders.get(&item_id).and_then(|order_id| state.orders.get(order_id)).cloned())
    }

    async fn update_item_status(&self, item_id: Uuid, from: ItemStatus, to: ItemStatus) -> StoreResult<Option<OrderItem>> {
        let mut state = self.state.lock().await;
        let Some(order_id) = state.item_orders.get(&item_id).copied() else { return Ok(None) };
        let Some(item) = state.order_mut(order_id).and_then(|o| o.items.iter_mut().find(|i| i.id == item_id)) else { return Ok(None) };
        if item.status != from {
            return Ok(None);
        }
        item.status = to;
        let updated = item.clone();
        if to.returns_stock() {
            state.adjust_stock(updated.product_id, i64::from(updated.qty.value()))?;
        }
        if let Some(order) = state.order_mut(order_id) {
            order.updated_at = Utc::now();
        }
        Ok(Some(updated))
    }

    async fn item_statuses(&self, order_id: Uuid) -> StoreResult<Vec<ItemStatus>> {
        Ok(self.state.lock().await.orders.get(&order_id).map(Order::item_statuses).unwrap_or_default())
    }

    async fn update_order_status(&self, order_id: Uuid, from: OrderStatus, to: OrderStatus) -> StoreResult<Option<Order>> {
        let mut state = self.state.lock().await;
        match state.order_mut(order_id) {
            Some(order) if order.status == from => {
                order.status = to;
                order.updated_at = Utc::now();
                Ok(Some(order.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn cancel_order(&self, order_id: Uuid, from: OrderStatus) -> StoreResult<Option<Order>> {
        let mut state = self.state.lock().await;
        let restock: Vec<(Uuid, u32)> = match state.order_mut(order_id) {
            Some(order) if order.status == from => {
                order.status = OrderStatus::Cancelled;
                order.updated_at = Utc::now();
                order.items.iter_mut().filter(|i| i.status.is_open()).map(|i| {
                    i.status = ItemStatus::Cancelled;
                    (i.product_id, i.qty.value())
                }).collect()
            }
            _ => return Ok(None),
        };
        for (product_id, qty) in restock {
            state.adjust_stock(product_id, i64::from(qty))?;
        }
        Ok(state.orders.get(&order_id).cloned())
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn insert_unless_duplicate(&self, event: &NotificationEvent, window: Duration) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let since = window_start(event.created_at, window);
        if state.events.iter().any(|e| {
            e.dedup_key == event.dedup_key && e.created_at >= since && e.status != NotificationStatus::Delivered
        }) {
            return Ok(false);
        }
        state.events.push(event.clone());
        Ok(true)
    }

    async fn pending_events(&self, limit: usize) -> StoreResult<Vec<NotificationEvent>> {
        let state = self.state.lock().await;
        Ok(state.events.iter().filter(|e| e.status == NotificationStatus::Pending).take(limit).cloned().collect())
    }

    async fn mark_delivered(&self, event_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(e) = state.events.iter_mut().find(|e| e.id == event_id && e.status == NotificationStatus::Pending) {
            e.status = NotificationStatus::Delivered;
            e.attempts += 1;
            e.delivered_at = Some(at);
        }
        Ok(())
    }

    async fn record_failure(&self, event_id: Uuid, error: &str, max_attempts: u32, at: DateTime<Utc>) -> StoreResult<(NotificationStatus, u32)> {
        let mut state = self.state.lock().await;
        let e = state.events.iter_mut().find(|e| e.id == event_id).ok_or_else(|| StoreError::Corrupt(format!("event {event_id} missing")))?;
        e.attempts += 1;
        e.last_error = Some(error.to_string());
        if e.attempts >= max_attempts {
            e.status = NotificationStatus::Failed;
            e.failed_at = Some(at);
        }
        Ok((e.status, e.attempts))
    }

    async fn failed_events(&self, limit: usize) -> StoreResult<Vec<NotificationEvent>> {
        let state = self.state.lock().await;
        Ok(state.events.iter().filter(|e| e.status == NotificationStatus::Failed).take(limit).cloned().collect())
    }
}

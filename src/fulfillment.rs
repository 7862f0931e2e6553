//! Order state machine service
//!
//! Producers move their own items; admins move the order. Both go through a
//! compare-and-set in the store against the status the aggregate validated, so
//! two racing requests with the same source status cannot both win. After every
//! item change the rollup is recomputed from a fresh read of item statuses.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use crate::context::{Actor, RequestContext};
use crate::domain::aggregates::{ItemStatus, Order, OrderError, OrderItem, OrderStatus};
use crate::domain::events::OrderEvent;
use crate::notifications::Dispatcher;
use crate::store::{OrderStore, StoreError};

const ROLLUP_RETRIES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("cannot move {entity} from {from} to {to}")]
    InvalidTransition { entity: &'static str, from: String, to: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransitionError {
    fn item(from: ItemStatus, to: ItemStatus) -> Self {
        Self::InvalidTransition { entity: "item", from: from.to_string(), to: to.to_string() }
    }

    fn order(from: OrderStatus, to: OrderStatus) -> Self {
        Self::InvalidTransition { entity: "order", from: from.to_string(), to: to.to_string() }
    }
}

pub struct FulfillmentService {
    store: Arc<dyn OrderStore>,
    dispatcher: Arc<Dispatcher>,
}

impl FulfillmentService {
    pub fn new(store: Arc<dyn OrderStore>, dispatcher: Arc<Dispatcher>) -> Self { Self { store, dispatcher } }

    /// Producer-scoped item transition, followed by the cancellation rollup.
    pub async fn transition_item(&self, ctx: &RequestContext, item_id: Uuid, to: ItemStatus) -> Result<OrderItem, TransitionError> {
        let producer_id = ctx.actor.producer_id().ok_or(TransitionError::Forbidden("only producers may change item status"))?;
        let mut order = self.store.order_for_item(item_id).await?.ok_or(TransitionError::NotFound { entity: "item", id: item_id })?;
        let from = order.item(item_id).map(|i| i.status).ok_or(TransitionError::NotFound { entity: "item", id: item_id })?;

        order.transition_item(item_id, to, producer_id).map_err(|e| match e {
            OrderError::NotItemOwner => TransitionError::Forbidden("item belongs to another producer"),
            OrderError::InvalidItemTransition { from, to } => TransitionError::item(from, to),
            _ => TransitionError::NotFound { entity: "item", id: item_id },
        })?;

        let Some(updated) = self.store.update_item_status(item_id, from, to).await? else {
            let current = self.store.order_for_item(item_id).await?.and_then(|o| o.item(item_id).map(|i| i.status)).unwrap_or(from);
            warn!(request_id = %ctx.request_id, item_id = %item_id, expected = %from, current = %current, "item changed concurrently");
            return Err(TransitionError::item(current, to));
        };
        info!(
            request_id = %ctx.request_id, order_id = %order.id, item_id = %item_id, producer_id = %producer_id,
            from = %from, to = %to, restocked = to.returns_stock(), "item status changed"
        );

        let mut events = order.take_events();
        events.extend(self.roll_up(ctx, order.id).await?);
        self.dispatcher.publish(events).await;
        Ok(updated)
    }

    /// Admin-only linear progression. A cancel closes open items and returns their stock.
    pub async fn transition_order(&self, ctx: &RequestContext, order_id: Uuid, to: OrderStatus) -> Result<Order, TransitionError> {
        if !ctx.actor.is_admin() {
            return Err(TransitionError::Forbidden("only admins may change order status"));
        }
        let mut order = self.store.order(order_id).await?.ok_or(TransitionError::NotFound { entity: "order", id: order_id })?;
        let from = order.status;
        order.advance(to).map_err(|_| TransitionError::order(from, to))?;

        let written = if to == OrderStatus::Cancelled {
            self.store.cancel_order(order_id, from).await?
        } else {
            self.store.update_order_status(order_id, from, to).await?
        };
        let Some(stored) = written else {
            let current = self.store.order(order_id).await?.map(|o| o.status).unwrap_or(from);
            warn!(request_id = %ctx.request_id, order_id = %order_id, expected = %from, current = %current, "order changed concurrently");
            return Err(TransitionError::order(current, to));
        };
        info!(request_id = %ctx.request_id, order_id = %order_id, from = %from, to = %to, "order status changed");

        self.dispatcher.publish(order.take_events()).await;
        Ok(stored)
    }

    /// Admins see every order, buyers their own, producers any order carrying one of
    /// their items. Guests only see guest orders.
    pub async fn order(&self, ctx: &RequestContext, order_id: Uuid) -> Result<Order, TransitionError> {
        let order = self.store.order(order_id).await?.ok_or(TransitionError::NotFound { entity: "order", id: order_id })?;
        let visible = match ctx.actor {
            Actor::Admin(_) => true,
            Actor::Buyer(id) => order.buyer_id == Some(id),
            Actor::Producer(id) => order.items.iter().any(|i| i.producer_id == id),
            Actor::Guest => order.buyer_id.is_none(),
        };
        if visible { Ok(order) } else { Err(TransitionError::Forbidden("order belongs to someone else")) }
    }

    /// Recomputes the rollup from the current item statuses. Safe to run redundantly.
    async fn roll_up(&self, ctx: &RequestContext, order_id: Uuid) -> Result<Vec<OrderEvent>, TransitionError> {
        for _ in 0..ROLLUP_RETRIES {
            let Some(mut order) = self.store.order(order_id).await? else { return Ok(vec![]) };
            let statuses = self.store.item_statuses(order_id).await?;
            let from = order.status;
            if !order.apply_rollup(&statuses) {
                return Ok(vec![]);
            }
            if self.store.update_order_status(order_id, from, order.status).await?.is_some() {
                info!(request_id = %ctx.request_id, order_id = %order_id, from = %from, to = %order.status, "order rolled up");
                return Ok(order.take_events());
            }
        }
        warn!(request_id = %ctx.request_id, order_id = %order_id, "rollup lost the race repeatedly; leaving order as is");
        Ok(vec![])
    }
}

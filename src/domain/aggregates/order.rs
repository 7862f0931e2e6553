//! Order Aggregate
//!
//! The order is the aggregate root over its items. Two state machines live here:
//! the producer-scoped item table and the admin-only linear order progression.
//! Cancellation of the order from item statuses is a separate rollup rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::events::OrderEvent;
use crate::domain::value_objects::{checked_sum, Money, PaymentMethod, Quantity, ShippingMethod, Totals, UnknownVariant};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub buyer_id: Option<Uuid>,
    pub buyer: BuyerContact,
    pub status: OrderStatus,
    pub shipping_method: ShippingMethod,
    pub payment_method: PaymentMethod,
    pub zone: String,
    pub totals: Totals,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) events: Vec<OrderEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub producer_id: Uuid,
    pub title_snapshot: String,
    pub price_snapshot: Money,
    pub qty: Quantity,
    pub status: ItemStatus,
}

impl OrderItem {
    pub fn line_total(&self) -> Option<Money> { self.price_snapshot.checked_times(self.qty) }
}

/// Buyer contact and delivery address, copied onto the order at checkout.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BuyerContact { pub name: String, pub phone: String, pub email: Option<String>, pub line1: String, pub city: String, pub postal: String }

/// A priced cart line ready to become an order item.
#[derive(Clone, Debug, PartialEq)]
pub struct PricedLine { pub product_id: Uuid, pub producer_id: Uuid, pub title: String, pub unit_price: Money, pub qty: Quantity }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus { #[default] Pending, Paid, Packing, Shipped, Delivered, Cancelled }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus { #[default] Placed, Accepted, Rejected, Fulfilled, Cancelled }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING", Self::Paid => "PAID", Self::Packing => "PACKING",
            Self::Shipped => "SHIPPED", Self::Delivered => "DELIVERED", Self::Cancelled => "CANCELLED",
        }
    }

    /// Admin progression: strictly linear, no skipping; cancel only before shipping.
    pub fn can_advance_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid) | (Paid, Packing) | (Packing, Shipped) | (Shipped, Delivered)
                | (Pending, Cancelled) | (Paid, Cancelled) | (Packing, Cancelled)
        )
    }

    /// Rollup cancellation only applies to orders that have not left the warehouse.
    pub fn accepts_rollup_cancel(&self) -> bool {
        matches!(self, Self::Pending | Self::Paid | Self::Packing)
    }

    pub const ALL: [OrderStatus; 6] = [Self::Pending, Self::Paid, Self::Packing, Self::Shipped, Self::Delivered, Self::Cancelled];
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Placed => "PLACED", Self::Accepted => "ACCEPTED", Self::Rejected => "REJECTED",
            Self::Fulfilled => "FULFILLED", Self::Cancelled => "CANCELLED",
        }
    }

    /// Transitions a producer may apply to its own items.
    pub fn producer_can_move_to(&self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!((self, next), (Placed, Accepted) | (Placed, Rejected) | (Accepted, Fulfilled))
    }

    /// Items an admin cancel still reaches.
    pub fn is_open(&self) -> bool { matches!(self, Self::Placed | Self::Accepted) }

    /// Stock goes back to the product when an item enters one of these.
    pub fn returns_stock(&self) -> bool { matches!(self, Self::Rejected | Self::Cancelled) }

    pub fn is_dead(&self) -> bool { matches!(self, Self::Rejected | Self::Cancelled) }
}

/// Order-level rollup from the current item statuses. Only ever yields `Cancelled`.
pub fn rollup(statuses: &[ItemStatus]) -> Option<OrderStatus> {
    if !statuses.is_empty() && statuses.iter().all(ItemStatus::is_dead) {
        Some(OrderStatus::Cancelled)
    } else {
        None
    }
}

impl Order {
    pub fn place(
        buyer_id: Option<Uuid>, buyer: BuyerContact, shipping_method: ShippingMethod, payment_method: PaymentMethod,
        zone: impl Into<String>, totals: Totals, lines: Vec<PricedLine>,
    ) -> Result<Self, OrderError> {
        if lines.is_empty() { return Err(OrderError::NoItems); }
        let id = Uuid::now_v7();
        let items: Vec<OrderItem> = lines.into_iter().map(|l| OrderItem {
            id: Uuid::now_v7(), order_id: id, product_id: l.product_id, producer_id: l.producer_id,
            title_snapshot: l.title, price_snapshot: l.unit_price, qty: l.qty, status: ItemStatus::Placed,
        }).collect();
        let subtotal = items.iter().map(OrderItem::line_total).collect::<Option<Vec<_>>>()
            .and_then(checked_sum)
            .ok_or(OrderError::AmountOutOfRange)?;
        if subtotal != totals.subtotal || !totals.is_consistent() {
            return Err(OrderError::TotalsMismatch { items: subtotal, subtotal: totals.subtotal });
        }
        let now = Utc::now();
        let mut order = Self {
            id, buyer_id, buyer, status: OrderStatus::Pending, shipping_method, payment_method, zone: zone.into(),
            totals, items, created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(OrderEvent::Created {
            order_id: id, buyer_email: order.buyer.email.clone(), buyer_name: order.buyer.name.clone(),
            grand_total: totals.grand_total,
        });
        Ok(order)
    }

    pub fn item(&self, item_id: Uuid) -> Option<&OrderItem> { self.items.iter().find(|i| i.id == item_id) }

    pub fn item_statuses(&self) -> Vec<ItemStatus> { self.items.iter().map(|i| i.status).collect() }

    /// Producer-scoped item transition. Validates ownership and the item table.
    /// Rejection is closed once the order has shipped or been cancelled.
    pub fn transition_item(&mut self, item_id: Uuid, next: ItemStatus, producer_id: Uuid) -> Result<OrderItem, OrderError> {
        let order_id = self.id;
        let rejection_open = self.status.accepts_rollup_cancel();
        let item = self.items.iter_mut().find(|i| i.id == item_id).ok_or(OrderError::ItemNotFound)?;
        if item.producer_id != producer_id { return Err(OrderError::NotItemOwner); }
        if !item.status.producer_can_move_to(next) || (next == ItemStatus::Rejected && !rejection_open) {
            return Err(OrderError::InvalidItemTransition { from: item.status, to: next });
        }
        let from = item.status;
        item.status = next;
        let updated = item.clone();
        self.raise_event(OrderEvent::ItemStatusChanged { order_id, item_id, producer_id, from, to: next });
        self.touch();
        Ok(updated)
    }

    /// Admin progression. A cancel also closes every open item.
    pub fn advance(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_advance_to(next) {
            return Err(OrderError::InvalidOrderTransition { from: self.status, to: next });
        }
        if next == OrderStatus::Cancelled {
            self.items.iter_mut().filter(|i| i.status.is_open()).for_each(|i| i.status = ItemStatus::Cancelled);
        }
        self.set_status(next);
        Ok(())
    }

    /// Applies the rollup to a fresh snapshot of item statuses. Returns true if the order changed.
    pub fn apply_rollup(&mut self, statuses: &[ItemStatus]) -> bool {
        match rollup(statuses) {
            Some(next) if self.status != next && self.status.accepts_rollup_cancel() => {
                self.set_status(next);
                true
            }
            _ => false,
        }
    }

    pub fn take_events(&mut self) -> Vec<OrderEvent> { std::mem::take(&mut self.events) }

    fn set_status(&mut self, next: OrderStatus) {
        let from = self.status;
        self.status = next;
        self.touch();
        self.raise_event(OrderEvent::StatusChanged { order_id: self.id, from, to: next });
    }

    fn raise_event(&mut self, e: OrderEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("order has no items")]
    NoItems,
    #[error("order amounts do not fit in cents")]
    AmountOutOfRange,
    #[error("item totals {items} do not match subtotal {subtotal}")]
    TotalsMismatch { items: Money, subtotal: Money },
    #[error("item not found on order")]
    ItemNotFound,
    #[error("item belongs to another producer")]
    NotItemOwner,
    #[error("cannot move item from {from} to {to}")]
    InvalidItemTransition { from: ItemStatus, to: ItemStatus },
    #[error("cannot move order from {from} to {to}")]
    InvalidOrderTransition { from: OrderStatus, to: OrderStatus },
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL.into_iter().find(|v| v.as_str() == s).ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

impl FromStr for ItemStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Placed, Self::Accepted, Self::Rejected, Self::Fulfilled, Self::Cancelled]
            .into_iter().find(|v| v.as_str() == s).ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(producer_id: Uuid, cents: i64, qty: u32) -> PricedLine {
        PricedLine { product_id: Uuid::now_v7(), producer_id, title: "Feta 400g".into(), unit_price: Money::from_cents(cents), qty: Quantity::new(qty) }
    }

    fn two_producer_order() -> (Order, Uuid, Uuid) {
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let totals = Totals::new(Money::from_cents(3400), Money::from_cents(430), Money::ZERO, Money::ZERO).unwrap();
        let mut order = Order::place(None, BuyerContact::default(), ShippingMethod::Courier, PaymentMethod::Card, "mainland", totals, vec![line(a, 1250, 2), line(b, 900, 1)]).unwrap();
        order.take_events();
        (order, a, b)
    }

    #[test]
    fn test_place_raises_created_and_snapshots_items() {
        let totals = Totals::new(Money::from_cents(2500), Money::from_cents(430), Money::from_cents(200), Money::ZERO).unwrap();
        let mut order = Order::place(None, BuyerContact::default(), ShippingMethod::CourierCod, PaymentMethod::Cod, "mainland", totals, vec![line(Uuid::now_v7(), 1250, 2)]).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.items.iter().all(|i| i.status == ItemStatus::Placed && i.order_id == order.id));
        let events = order.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "order_created");
    }

    #[test]
    fn test_place_rejects_subtotal_mismatch() {
        let totals = Totals::new(Money::from_cents(100), Money::ZERO, Money::ZERO, Money::ZERO).unwrap();
        let err = Order::place(None, BuyerContact::default(), ShippingMethod::Pickup, PaymentMethod::Card, "mainland", totals, vec![line(Uuid::now_v7(), 1250, 2)]).unwrap_err();
        assert!(matches!(err, OrderError::TotalsMismatch { .. }));
    }

    #[test]
    fn test_item_transition_table() {
        use ItemStatus::*;
        let allowed = [(Placed, Accepted), (Placed, Rejected), (Accepted, Fulfilled)];
        for from in [Placed, Accepted, Rejected, Fulfilled, Cancelled] {
            for to in [Placed, Accepted, Rejected, Fulfilled, Cancelled] {
                assert_eq!(from.producer_can_move_to(to), allowed.contains(&(from, to)), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_order_progression_is_linear() {
        use OrderStatus::*;
        assert!(Pending.can_advance_to(Paid));
        assert!(Paid.can_advance_to(Packing));
        assert!(!Paid.can_advance_to(Shipped));
        assert!(!Packing.can_advance_to(Delivered));
        assert!(!Shipped.can_advance_to(Cancelled));
        for next in OrderStatus::ALL {
            assert!(!Delivered.can_advance_to(next), "DELIVERED -> {next}");
            assert!(!Cancelled.can_advance_to(next), "CANCELLED -> {next}");
        }
    }

    #[test]
    fn test_rollup() {
        use ItemStatus::*;
        assert_eq!(rollup(&[Rejected, Rejected]), Some(OrderStatus::Cancelled));
        assert_eq!(rollup(&[Rejected, Cancelled]), Some(OrderStatus::Cancelled));
        assert_eq!(rollup(&[Accepted, Rejected]), None);
        assert_eq!(rollup(&[]), None);
    }

    #[test]
    fn test_transition_item_checks_owner() {
        let (mut order, a, b) = two_producer_order();
        let item_a = order.items[0].id;
        assert_eq!(order.transition_item(item_a, ItemStatus::Accepted, b), Err(OrderError::NotItemOwner));
        let updated = order.transition_item(item_a, ItemStatus::Accepted, a).unwrap();
        assert_eq!(updated.status, ItemStatus::Accepted);
        assert_eq!(order.transition_item(item_a, ItemStatus::Rejected, a), Err(OrderError::InvalidItemTransition { from: ItemStatus::Accepted, to: ItemStatus::Rejected }));
        assert_eq!(order.take_events().len(), 1);
    }

    #[test]
    fn test_rejection_closes_once_the_order_ships() {
        let (mut order, a, b) = two_producer_order();
        let (item_a, item_b) = (order.items[0].id, order.items[1].id);
        order.transition_item(item_b, ItemStatus::Accepted, b).unwrap();
        for next in [OrderStatus::Paid, OrderStatus::Packing, OrderStatus::Shipped] {
            order.advance(next).unwrap();
        }
        order.take_events();
        assert_eq!(
            order.transition_item(item_a, ItemStatus::Rejected, a),
            Err(OrderError::InvalidItemTransition { from: ItemStatus::Placed, to: ItemStatus::Rejected })
        );
        assert_eq!(order.items[0].status, ItemStatus::Placed);
        assert!(order.take_events().is_empty());
        // Forward moves are still the producer's to make.
        assert_eq!(order.transition_item(item_b, ItemStatus::Fulfilled, b).unwrap().status, ItemStatus::Fulfilled);
    }

    #[test]
    fn test_place_reports_overflowing_line_totals() {
        let totals = Totals::new(Money::from_cents(100), Money::ZERO, Money::ZERO, Money::ZERO).unwrap();
        let err = Order::place(None, BuyerContact::default(), ShippingMethod::Pickup, PaymentMethod::Card, "mainland", totals, vec![line(Uuid::now_v7(), i64::MAX, 2)]).unwrap_err();
        assert_eq!(err, OrderError::AmountOutOfRange);
    }

    #[test]
    fn test_admin_cancel_closes_open_items() {
        let (mut order, a, _) = two_producer_order();
        let item_a = order.items[0].id;
        order.transition_item(item_a, ItemStatus::Accepted, a).unwrap();
        order.advance(OrderStatus::Paid).unwrap();
        order.advance(OrderStatus::Cancelled).unwrap();
        assert!(order.items.iter().all(|i| i.status == ItemStatus::Cancelled));
        assert_eq!(order.advance(OrderStatus::Paid), Err(OrderError::InvalidOrderTransition { from: OrderStatus::Cancelled, to: OrderStatus::Paid }));
    }

    #[test]
    fn test_apply_rollup_respects_shipped_orders() {
        let (mut order, _, _) = two_producer_order();
        order.status = OrderStatus::Shipped;
        assert!(!order.apply_rollup(&[ItemStatus::Rejected, ItemStatus::Rejected]));
        order.status = OrderStatus::Paid;
        assert!(order.apply_rollup(&[ItemStatus::Rejected, ItemStatus::Rejected]));
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(!order.apply_rollup(&[ItemStatus::Rejected, ItemStatus::Rejected]));
    }

    #[test]
    fn test_status_strings_round_trip_through_from_str() {
        assert_eq!("PACKING".parse::<OrderStatus>().unwrap(), OrderStatus::Packing);
        assert_eq!("FULFILLED".parse::<ItemStatus>().unwrap(), ItemStatus::Fulfilled);
        assert!("LOST".parse::<OrderStatus>().is_err());
    }
}

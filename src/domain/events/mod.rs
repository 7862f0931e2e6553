//! Domain events raised by the order aggregate

use serde_json::json;
use uuid::Uuid;
use crate::domain::aggregates::{ItemStatus, OrderStatus};
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq)]
pub enum OrderEvent {
    Created { order_id: Uuid, buyer_email: Option<String>, buyer_name: String, grand_total: Money },
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus },
    ItemStatusChanged { order_id: Uuid, item_id: Uuid, producer_id: Uuid, from: ItemStatus, to: ItemStatus },
}

impl OrderEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "order_created",
            Self::StatusChanged { .. } | Self::ItemStatusChanged { .. } => "status_changed",
        }
    }

    /// The entity whose state the event reports on.
    pub fn subject_id(&self) -> Uuid {
        match self {
            Self::Created { order_id, .. } | Self::StatusChanged { order_id, .. } => *order_id,
            Self::ItemStatusChanged { item_id, .. } => *item_id,
        }
    }

    pub fn status_value(&self) -> &'static str {
        match self {
            Self::Created { .. } => OrderStatus::Pending.as_str(),
            Self::StatusChanged { to, .. } => to.as_str(),
            Self::ItemStatusChanged { to, .. } => to.as_str(),
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Created { order_id, buyer_email, buyer_name, grand_total } => json!({
                "orderId": order_id, "buyerEmail": buyer_email, "buyerName": buyer_name,
                "grandTotalCents": grand_total.cents(),
            }),
            Self::StatusChanged { order_id, from, to } => json!({
                "subject": "order", "orderId": order_id, "from": from.as_str(), "to": to.as_str(),
            }),
            Self::ItemStatusChanged { order_id, item_id, producer_id, from, to } => json!({
                "subject": "item", "orderId": order_id, "itemId": item_id, "producerId": producer_id,
                "from": from.as_str(), "to": to.as_str(),
            }),
        }
    }
}

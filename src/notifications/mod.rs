//! Notification outbox: event model, dispatcher, delivery channels and the
//! scheduled worker that drains pending events.

pub mod channel;
pub mod dispatcher;
pub mod worker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::events::OrderEvent;
use crate::domain::value_objects::UnknownVariant;

pub use channel::{DeliveryChannel, DeliveryError, LogChannel, NatsChannel};
pub use dispatcher::{DeliveryOutcome, DeliveryReport, DeliveryResult, DispatchSettings, Dispatcher, EnqueueOutcome};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus { #[default] Pending, Delivered, Failed }

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Delivered => "delivered", Self::Failed => "failed" }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for NotificationStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending), "delivered" => Ok(Self::Delivered), "failed" => Ok(Self::Failed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// An outbox row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub id: Uuid,
    pub dedup_key: String,
    pub event_type: String,
    pub subject_id: Uuid,
    pub status_value: String,
    pub payload: serde_json::Value,
    pub status: NotificationStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl NotificationEvent {
    pub fn pending(event_type: &str, subject_id: Uuid, status_value: &str, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            dedup_key: dedup_key(event_type, subject_id, status_value),
            event_type: event_type.to_string(),
            subject_id,
            status_value: status_value.to_string(),
            payload,
            status: NotificationStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            delivered_at: None,
            failed_at: None,
        }
    }

    pub fn from_order_event(event: &OrderEvent, now: DateTime<Utc>) -> Self {
        Self::pending(event.event_type(), event.subject_id(), event.status_value(), event.payload(), now)
    }
}

/// Hex SHA-256 over `type|subject|status`.
pub fn dedup_key(event_type: &str, subject_id: Uuid, status_value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event_type.as_bytes());
    hasher.update(b"|");
    hasher.update(subject_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(status_value.as_bytes());
    hex::encode(hasher.finalize())
}

/// `jane@example.com` -> `j***@example.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => format!("{}***@{}", &local[..local.chars().next().map_or(1, char::len_utf8)], domain),
        _ => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_key_is_stable_and_discriminating() {
        let id = Uuid::now_v7();
        let k = dedup_key("status_changed", id, "SHIPPED");
        assert_eq!(k.len(), 64);
        assert_eq!(k, dedup_key("status_changed", id, "SHIPPED"));
        assert_ne!(k, dedup_key("status_changed", id, "DELIVERED"));
        assert_ne!(k, dedup_key("order_created", id, "SHIPPED"));
        assert_ne!(k, dedup_key("status_changed", Uuid::now_v7(), "SHIPPED"));
    }

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("jane@example.com"), "j***@example.com");
        assert_eq!(mask_email("broken"), "***");
        assert_eq!(mask_email("@example.com"), "***");
    }
}

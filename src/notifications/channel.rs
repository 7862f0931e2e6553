//! Outbound delivery channels (email/SMS gateway side of the outbox).

use async_trait::async_trait;
use tracing::info;
use super::{mask_email, NotificationEvent};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("channel unavailable: {0}")]
    Unavailable(String),
    #[error("delivery rejected: {0}")]
    Rejected(String),
    #[error("delivery timed out")]
    TimedOut,
}

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError>;
}

/// Writes deliveries to the log. Used when no gateway is configured.
#[derive(Debug, Default, Clone)]
pub struct LogChannel;

#[async_trait]
impl DeliveryChannel for LogChannel {
    fn name(&self) -> &'static str { "log" }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        let to = event.payload.get("buyerEmail").and_then(|v| v.as_str()).map(mask_email);
        info!(
            event_id = %event.id, event_type = %event.event_type, subject_id = %event.subject_id,
            status = %event.status_value, to = ?to, "notification delivered"
        );
        Ok(())
    }
}

/// Publishes each event as JSON to `<prefix>.<event type>` on NATS for the mail/SMS gateway.
#[derive(Clone)]
pub struct NatsChannel {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsChannel {
    pub fn new(client: async_nats::Client, subject_prefix: impl Into<String>) -> Self {
        Self { client, subject_prefix: subject_prefix.into() }
    }

    pub fn subject_for(&self, event: &NotificationEvent) -> String {
        format!("{}.{}", self.subject_prefix, event.event_type)
    }
}

#[async_trait]
impl DeliveryChannel for NatsChannel {
    fn name(&self) -> &'static str { "nats" }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(event).map_err(|e| DeliveryError::Rejected(e.to_string()))?;
        self.client.publish(self.subject_for(event), body.into()).await.map_err(|e| DeliveryError::Unavailable(e.to_string()))?;
        self.client.flush().await.map_err(|e| DeliveryError::Unavailable(e.to_string()))
    }
}

//! Notification dispatcher.
//!
//! `enqueue` is insert-only and never fails from the caller's point of view.
//! `deliver_pending` is the worker entry point: each pending event is tried
//! once per run under its own timeout, and parked as `failed` at the ceiling.

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use crate::domain::events::OrderEvent;
use crate::store::{OutboxStore, StoreError};
use super::{DeliveryChannel, DeliveryError, NotificationEvent, NotificationStatus};

#[derive(Clone, Debug, PartialEq)]
pub struct DispatchSettings {
    pub enabled: bool,
    pub dedup_window: Duration,
    pub max_attempts: u32,
    pub batch_size: usize,
    pub delivery_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dedup_window: Duration::from_secs(120),
            max_attempts: 5,
            batch_size: 50,
            delivery_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(15),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued(Uuid),
    /// Same key already enqueued inside the dedup window. Not an error.
    DuplicateSuppressed,
    Disabled,
    /// The outbox write failed; logged and swallowed.
    Dropped,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Retrying { attempts: u32, error: String },
    Failed { attempts: u32, error: String },
    /// Delivery result could not be written back; the event stays pending.
    Unrecorded { error: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub event_id: Uuid,
    pub event_type: String,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DeliveryReport {
    pub processed: usize,
    pub results: Vec<DeliveryResult>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> usize { self.results.iter().filter(|r| r.outcome == DeliveryOutcome::Delivered).count() }
}

pub struct Dispatcher {
    outbox: Arc<dyn OutboxStore>,
    channel: Arc<dyn DeliveryChannel>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(outbox: Arc<dyn OutboxStore>, channel: Arc<dyn DeliveryChannel>, settings: DispatchSettings) -> Self {
        Self { outbox, channel, settings }
    }

    pub async fn enqueue(&self, event: NotificationEvent) -> EnqueueOutcome {
        if !self.settings.enabled {
            debug!(event_type = %event.event_type, subject_id = %event.subject_id, "notifications disabled, skipping");
            return EnqueueOutcome::Disabled;
        }
        match self.outbox.insert_unless_duplicate(&event, self.settings.dedup_window).await {
            Ok(true) => {
                debug!(event_id = %event.id, event_type = %event.event_type, dedup_key = %event.dedup_key, "notification queued");
                EnqueueOutcome::Queued(event.id)
            }
            Ok(false) => {
                info!(event_type = %event.event_type, subject_id = %event.subject_id, dedup_key = %event.dedup_key, "duplicate notification suppressed");
                EnqueueOutcome::DuplicateSuppressed
            }
            Err(e) => {
                error!(event_type = %event.event_type, subject_id = %event.subject_id, error = %e, "failed to queue notification");
                EnqueueOutcome::Dropped
            }
        }
    }

    /// Queues one notification per domain event, in order.
    pub async fn publish(&self, events: Vec<OrderEvent>) -> Vec<EnqueueOutcome> {
        let now = Utc::now();
        let mut outcomes = Vec::with_capacity(events.len());
        for event in &events {
            outcomes.push(self.enqueue(NotificationEvent::from_order_event(event, now)).await);
        }
        outcomes
    }

    pub async fn deliver_pending(&self) -> Result<DeliveryReport, StoreError> {
        let batch = self.outbox.pending_events(self.settings.batch_size).await?;
        let results = join_all(batch.into_iter().map(|event| self.deliver_one(event))).await;
        Ok(DeliveryReport { processed: results.len(), results })
    }

    pub async fn failed_events(&self, limit: usize) -> Result<Vec<NotificationEvent>, StoreError> {
        self.outbox.failed_events(limit).await
    }

    async fn deliver_one(&self, event: NotificationEvent) -> DeliveryResult {
        let attempt = tokio::time::timeout(self.settings.delivery_timeout, self.channel.deliver(&event))
            .await
            .unwrap_or(Err(DeliveryError::TimedOut));

        let outcome = match attempt {
            Ok(()) => match self.outbox.mark_delivered(event.id, Utc::now()).await {
                Ok(()) => DeliveryOutcome::Delivered,
                Err(e) => {
                    error!(event_id = %event.id, error = %e, "delivered but could not mark event");
                    DeliveryOutcome::Unrecorded { error: e.to_string() }
                }
            },
            Err(err) => {
                let error = err.to_string();
                match self.outbox.record_failure(event.id, &error, self.settings.max_attempts, Utc::now()).await {
                    Ok((NotificationStatus::Failed, attempts)) => {
                        error!(event_id = %event.id, event_type = %event.event_type, attempts, error = %error, channel = self.channel.name(), "notification failed permanently");
                        DeliveryOutcome::Failed { attempts, error }
                    }
                    Ok((_, attempts)) => {
                        warn!(event_id = %event.id, event_type = %event.event_type, attempts, error = %error, channel = self.channel.name(), "notification delivery failed, will retry");
                        DeliveryOutcome::Retrying { attempts, error }
                    }
                    Err(e) => {
                        error!(event_id = %event.id, error = %e, "could not record delivery failure");
                        DeliveryOutcome::Unrecorded { error: e.to_string() }
                    }
                }
            }
        };
        DeliveryResult { event_id: event.id, event_type: event.event_type, outcome }
    }
}

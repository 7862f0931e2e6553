//! Scheduled outbox worker.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use super::Dispatcher;

/// Runs `deliver_pending` every `every` until `shutdown` flips to true.
pub fn spawn(dispatcher: Arc<Dispatcher>, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = every.as_secs_f64(), "notification worker started");
        loop {
            tokio::select! {
                _ = ticker.tick() => run_once(&dispatcher).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("notification worker stopped");
    })
}

async fn run_once(dispatcher: &Dispatcher) {
    match dispatcher.deliver_pending().await {
        Ok(report) if report.processed > 0 => {
            info!(processed = report.processed, delivered = report.delivered(), "notification batch finished");
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "could not load pending notifications"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use crate::notifications::dispatcher::tests::RecordingChannel;
    use crate::notifications::{DispatchSettings, NotificationEvent};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn worker_drains_outbox_and_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), channel.clone(), DispatchSettings::default()));
        dispatcher.enqueue(NotificationEvent::pending("order_created", Uuid::now_v7(), "PENDING", serde_json::json!({}), Utc::now())).await;

        let (tx, rx) = watch::channel(false);
        let handle = spawn(dispatcher, Duration::from_millis(10), rx);
        for _ in 0..100 {
            if !channel.delivered.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(channel.delivered.lock().unwrap().len(), 1);
    }
}

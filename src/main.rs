//! Marketplace order engine service

use anyhow::{Context, Result};
use marketplace_orders::api::{build_router, AppState};
use marketplace_orders::notifications::{worker, DeliveryChannel, Dispatcher, LogChannel, NatsChannel};
use marketplace_orders::shipping::ShippingCalculator;
use marketplace_orders::store::{MemoryStore, OrderStore, OutboxStore, PgStore};
use marketplace_orders::AppConfig;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = AppConfig::from_env()?;

    let (orders, outbox): (Arc<dyn OrderStore>, Arc<dyn OutboxStore>) = match &config.database_url {
        Some(url) => {
            let store = Arc::new(PgStore::connect(url, 10).await.context("connecting to DATABASE_URL")?);
            store.migrate().await.context("running migrations")?;
            let orders: Arc<dyn OrderStore> = store.clone();
            let outbox: Arc<dyn OutboxStore> = store;
            (orders, outbox)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            let store = Arc::new(MemoryStore::new());
            let orders: Arc<dyn OrderStore> = store.clone();
            let outbox: Arc<dyn OutboxStore> = store;
            (orders, outbox)
        }
    };

    let channel: Arc<dyn DeliveryChannel> = match &config.nats_url {
        Some(url) => {
            let client = async_nats::connect(url.as_str()).await.context("connecting to NATS_URL")?;
            Arc::new(NatsChannel::new(client, config.nats_subject_prefix.clone()))
        }
        None => Arc::new(LogChannel),
    };
    tracing::info!(channel = channel.name(), enabled = config.notifications.enabled, "notification channel ready");

    let dispatcher = Arc::new(Dispatcher::new(outbox, channel, config.notifications.clone()));
    let (stop_worker, shutdown) = tokio::sync::watch::channel(false);
    let worker = worker::spawn(dispatcher.clone(), config.notifications.poll_interval, shutdown);

    let state = AppState::new(orders, ShippingCalculator::new(config.shipping.clone()), dispatcher);
    let app = build_router(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!("marketplace order engine listening on 0.0.0.0:{}", config.port);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    stop_worker.send(true).ok();
    worker.await.context("notification worker panicked")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
    tracing::info!("shutdown requested");
}

//! HTTP surface.

pub mod error;
pub mod extract;
mod handlers;

use axum::routing::{get, patch, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use crate::checkout::CheckoutService;
use crate::fulfillment::FulfillmentService;
use crate::notifications::Dispatcher;
use crate::shipping::ShippingCalculator;
use crate::store::OrderStore;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<CheckoutService>,
    pub fulfillment: Arc<FulfillmentService>,
    pub shipping: Arc<ShippingCalculator>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(store: Arc<dyn OrderStore>, shipping: ShippingCalculator, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            checkout: Arc::new(CheckoutService::new(store.clone(), shipping.clone(), dispatcher.clone())),
            fulfillment: Arc::new(FulfillmentService::new(store, dispatcher.clone())),
            shipping: Arc::new(shipping),
            dispatcher,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/checkout", post(handlers::checkout))
        .route("/shipping/quote", post(handlers::shipping_quote))
        .route("/orders/:order_id", get(handlers::get_order))
        .route("/orders/:order_id/status", patch(handlers::update_order_status))
        .route("/orders/items/:item_id/status", patch(handlers::update_item_status))
        .route("/admin/notifications/failed", get(handlers::failed_notifications))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

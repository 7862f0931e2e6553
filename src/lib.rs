//! Marketplace order engine
//!
//! Order lifecycle and fulfillment for a multi-producer marketplace.
//!
//! ## Features
//! - Shipping cost quotes in integer cents
//! - Atomic checkout with no overselling
//! - Producer-scoped item transitions and an admin order progression
//! - Notification outbox with dedup and bounded retries

pub mod api;
pub mod checkout;
pub mod config;
pub mod context;
pub mod domain;
pub mod fulfillment;
pub mod notifications;
pub mod shipping;
pub mod store;

pub use checkout::{CheckoutError, CheckoutService};
pub use config::AppConfig;
pub use context::{Actor, RequestContext};
pub use fulfillment::{FulfillmentService, TransitionError};

//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;

pub use product::{Product, ProductError};
pub use order::{rollup, BuyerContact, ItemStatus, Order, OrderError, OrderItem, OrderStatus, PricedLine};
pub use cart::{Cart, CartItem};

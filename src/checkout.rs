//! Checkout orchestrator
//!
//! Validates the request, prices the cart from live products, quotes shipping,
//! then hands the whole order to the store as one all-or-nothing write. The
//! `order_created` notification is queued only after that write succeeds.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};
use crate::context::RequestContext;
use crate::domain::aggregates::{BuyerContact, Cart, CartItem, Order, OrderError, PricedLine, Product};
use crate::domain::value_objects::{PaymentMethod, Quantity, ShippingMethod, Totals};
use crate::notifications::{mask_email, Dispatcher};
use crate::shipping::{QuoteLine, ShippingCalculator, ShippingError};
use crate::store::{OrderStore, StoreError};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub items: Vec<CheckoutLine>,
    pub shipping: ShippingDetails,
    pub payment: PaymentDetails,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutLine { pub product_id: Uuid, pub qty: u32 }

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShippingDetails {
    #[validate(length(min = 2, message = "must be at least 2 characters"))]
    pub name: String,
    #[validate(length(min = 1, message = "is required"))]
    pub line1: String,
    #[validate(length(min = 1, message = "is required"))]
    pub city: String,
    #[validate(custom = "validate_postal")]
    pub postal: String,
    #[validate(custom = "validate_phone")]
    pub phone: String,
    #[validate(email(message = "is not a valid e-mail address"))]
    pub email: Option<String>,
    pub method: ShippingMethod,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct PaymentDetails { pub method: PaymentMethod }

/// What the caller gets back on success.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder { pub order_id: Uuid, pub totals: Totals }

/// Field-addressable validation messages, ordered by field path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn insert(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_insert_with(|| message.into());
    }
    pub fn get(&self, field: &str) -> Option<&str> { self.0.get(field).map(String::as_str) }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Flattens `validator` output under `prefix` (e.g. `shipping.postal`).
    pub fn merge_validator(&mut self, prefix: &str, errors: &ValidationErrors) {
        for (field, errs) in errors.field_errors() {
            if let Some(first) = errs.first() {
                let message = first.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| first.code.to_string());
                self.insert(format!("{prefix}.{field}"), message);
            }
        }
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        f.write_str(&parts.join(", "))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("cart is empty")]
    EmptyCart,
    #[error("validation failed: {0}")]
    Validation(FieldErrors),
    #[error("unknown or inactive product {0}")]
    UnknownProduct(Uuid),
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock { product_id: Uuid, requested: Quantity, available: Quantity },
    #[error(transparent)]
    Store(StoreError),
    #[error("order could not be built: {0}")]
    Order(#[from] OrderError),
    #[error(transparent)]
    Shipping(#[from] ShippingError),
}

impl From<StoreError> for CheckoutError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientStock { product_id, requested, available } => Self::InsufficientStock { product_id, requested, available },
            other => Self::Store(other),
        }
    }
}

pub struct CheckoutService {
    store: Arc<dyn OrderStore>,
    shipping: ShippingCalculator,
    dispatcher: Arc<Dispatcher>,
}

impl CheckoutService {
    pub fn new(store: Arc<dyn OrderStore>, shipping: ShippingCalculator, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, shipping, dispatcher }
    }

    pub async fn checkout(&self, ctx: &RequestContext, req: CheckoutRequest) -> Result<PlacedOrder, CheckoutError> {
        if req.items.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        let cart = validate_request(&req)?;

        let lines = cart.lines_by_product();
        let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        let products: HashMap<Uuid, Product> = self.store.products(&ids).await?.into_iter().map(|p| (p.id, p)).collect();
        let priced = lines.iter().map(|line| {
            let product = products.get(&line.product_id).filter(|p| p.is_orderable()).ok_or(CheckoutError::UnknownProduct(line.product_id))?;
            Ok(PricedLine {
                product_id: product.id, producer_id: product.producer_id, title: product.title.clone(),
                unit_price: product.price, qty: line.quantity,
            })
        }).collect::<Result<Vec<_>, CheckoutError>>()?;

        let shipping = &req.shipping;
        let zone = self.shipping.zone_for_postal(&shipping.postal).to_string();
        let cod = shipping.method.implies_cod() || req.payment.method == PaymentMethod::Cod;
        let quote_lines: Vec<QuoteLine> = priced.iter().map(|l| QuoteLine { price: l.unit_price, qty: l.qty }).collect();
        let totals = self.shipping.quote(&quote_lines, &zone, shipping.method, cod)?;

        let buyer = BuyerContact {
            name: shipping.name.trim().to_string(), phone: shipping.phone.trim().to_string(),
            email: shipping.email.as_ref().map(|e| e.trim().to_lowercase()).filter(|e| !e.is_empty()),
            line1: shipping.line1.trim().to_string(), city: shipping.city.trim().to_string(), postal: shipping.postal.clone(),
        };
        let mut order = Order::place(ctx.actor.buyer_id(), buyer, shipping.method, req.payment.method, zone, totals, priced)?;

        if let Err(e) = self.store.place_order(&order).await {
            if let StoreError::InsufficientStock { product_id, .. } = &e {
                warn!(request_id = %ctx.request_id, product_id = %product_id, "checkout rejected: insufficient stock");
            }
            return Err(e.into());
        }
        info!(
            request_id = %ctx.request_id, order_id = %order.id, items = order.items.len(),
            grand_total_cents = totals.grand_total.cents(), buyer = ?order.buyer.email.as_deref().map(mask_email),
            "order placed"
        );

        self.dispatcher.publish(order.take_events()).await;
        Ok(PlacedOrder { order_id: order.id, totals })
    }
}

/// Checks the request shape and returns the merged cart.
fn validate_request(req: &CheckoutRequest) -> Result<Cart, CheckoutError> {
    let mut errors = FieldErrors::default();
    if let Err(e) = req.shipping.validate() {
        errors.merge_validator("shipping", &e);
    }
    for (i, line) in req.items.iter().enumerate() {
        if !Quantity::new(line.qty).is_orderable() {
            errors.insert(format!("items[{i}].qty"), format!("must be between 1 and {}", Quantity::MAX_PER_LINE));
        }
    }
    let cart: Cart = req.items.iter().map(|l| CartItem { product_id: l.product_id, quantity: Quantity::new(l.qty) }).collect();
    if cart.item_count() > Cart::MAX_LINES {
        errors.insert("items", format!("at most {} distinct products per order", Cart::MAX_LINES));
    }
    if let Some(line) = cart.items().iter().find(|l| l.quantity.value() > Quantity::MAX_PER_LINE) {
        errors.insert("items", format!("combined quantity for {} exceeds {}", line.product_id, Quantity::MAX_PER_LINE));
    }
    if errors.is_empty() { Ok(cart) } else { Err(CheckoutError::Validation(errors)) }
}

fn field_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut e = ValidationError::new(code);
    e.message = Some(Cow::Borrowed(message));
    e
}

fn validate_postal(postal: &str) -> Result<(), ValidationError> {
    if postal.len() == 5 && postal.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(field_error("postal", "must be exactly 5 digits"))
    }
}

/// Optional `+`, then 8 to 15 digits. Spaces and dashes are ignored.
fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let compact: String = phone.trim().chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);
    if (8..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(field_error("phone", "is not a valid phone number"))
    }
}

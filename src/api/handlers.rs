use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;
use crate::checkout::{CheckoutRequest, FieldErrors, PlacedOrder};
use crate::context::RequestContext;
use crate::domain::aggregates::{Cart, ItemStatus, Order, OrderItem, OrderStatus};
use crate::domain::value_objects::{Money, Quantity, ShippingMethod, Totals};
use crate::notifications::NotificationEvent;
use crate::shipping::{QuoteLine, ShippingError};
use super::extract::ApiJson;
use super::{ApiError, AppState};

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy", "service": "marketplace-orders"}))
}

pub async fn checkout(State(s): State<AppState>, ctx: RequestContext, ApiJson(req): ApiJson<CheckoutRequest>) -> Result<(StatusCode, Json<PlacedOrder>), ApiError> {
    let placed = s.checkout.checkout(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub items: Vec<QuoteItem>,
    pub zone: Option<String>,
    pub postal: Option<String>,
    #[serde(default = "default_method")]
    pub method: ShippingMethod,
    #[serde(default)]
    pub cod_requested: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteItem { pub price_cents: i64, pub qty: u32 }

fn default_method() -> ShippingMethod { ShippingMethod::Courier }

/// Side-effect free. The zone is taken as given, or resolved from `postal`.
pub async fn shipping_quote(State(s): State<AppState>, ApiJson(req): ApiJson<QuoteRequest>) -> Result<Json<Totals>, ApiError> {
    let mut errors = FieldErrors::default();
    if req.items.len() > Cart::MAX_LINES {
        errors.insert("items", format!("at most {} lines per quote", Cart::MAX_LINES));
    }
    for (i, item) in req.items.iter().enumerate() {
        if item.price_cents < 0 {
            errors.insert(format!("items[{i}].priceCents"), "must not be negative");
        }
        if !Quantity::new(item.qty).is_orderable() {
            errors.insert(format!("items[{i}].qty"), format!("must be between 1 and {}", Quantity::MAX_PER_LINE));
        }
    }
    let zone = match (req.zone, req.postal) {
        (Some(zone), _) => zone,
        (None, Some(postal)) => s.shipping.zone_for_postal(&postal).to_string(),
        (None, None) => {
            errors.insert("zone", "zone or postal is required");
            String::new()
        }
    };
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    let lines: Vec<QuoteLine> = req.items.iter().map(|i| QuoteLine { price: Money::from_cents(i.price_cents), qty: Quantity::new(i.qty) }).collect();
    let cod = req.cod_requested || req.method.implies_cod();
    let totals = s.shipping.quote(&lines, &zone, req.method, cod).map_err(|e| {
        let field = match &e {
            ShippingError::UnknownZone(_) => "zone".to_string(),
            ShippingError::AmountOutOfRange { line: Some(i) } => format!("items[{i}].priceCents"),
            ShippingError::AmountOutOfRange { line: None } => "items".to_string(),
        };
        let mut errors = FieldErrors::default();
        errors.insert(field, e.to_string());
        ApiError::Validation(errors)
    })?;
    Ok(Json(totals))
}

pub async fn get_order(State(s): State<AppState>, ctx: RequestContext, Path(order_id): Path<Uuid>) -> Result<Json<Order>, ApiError> {
    Ok(Json(s.fulfillment.order(&ctx, order_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusChange<T> { pub status: T }

pub async fn update_item_status(
    State(s): State<AppState>, ctx: RequestContext, Path(item_id): Path<Uuid>, ApiJson(body): ApiJson<StatusChange<ItemStatus>>,
) -> Result<Json<OrderItem>, ApiError> {
    Ok(Json(s.fulfillment.transition_item(&ctx, item_id, body.status).await?))
}

pub async fn update_order_status(
    State(s): State<AppState>, ctx: RequestContext, Path(order_id): Path<Uuid>, ApiJson(body): ApiJson<StatusChange<OrderStatus>>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(s.fulfillment.transition_order(&ctx, order_id, body.status).await?))
}

#[derive(Debug, Deserialize)]
pub struct FailedParams { pub limit: Option<usize> }

pub async fn failed_notifications(State(s): State<AppState>, ctx: RequestContext, Query(p): Query<FailedParams>) -> Result<Json<Vec<NotificationEvent>>, ApiError> {
    if !ctx.actor.is_admin() {
        return Err(ApiError::Forbidden("only admins may inspect failed notifications"));
    }
    let limit = p.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(s.dispatcher.failed_events(limit).await?))
}

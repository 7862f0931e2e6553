//! In-process route tests. The router is driven through
//! `tower::ServiceExt::oneshot` against the in-memory store; no socket is bound.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use marketplace_orders::api::{build_router, AppState};
use marketplace_orders::domain::aggregates::Product;
use marketplace_orders::domain::value_objects::Money;
use marketplace_orders::notifications::{DispatchSettings, Dispatcher, LogChannel};
use marketplace_orders::shipping::{ShippingCalculator, ShippingConfig};
use marketplace_orders::store::MemoryStore;
use serde_json::{json, Value};
use tower::ServiceExt; // oneshot
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    router: axum::Router,
    store: Arc<MemoryStore>,
    producer: Uuid,
    product: Uuid,
}

async fn harness(stock: u32) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let producer = Uuid::now_v7();
    let feta = Product::create(producer, "Feta 400g", Money::from_cents(1250), stock);
    let product = feta.id;
    store.insert_product(feta).await;
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(LogChannel), DispatchSettings::default()));
    let state = AppState::new(store.clone(), ShippingCalculator::new(ShippingConfig::default()), dispatcher);
    Harness { router: build_router(state), store, producer, product }
}

async fn call(router: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body: Bytes = resp.into_body().collect().await.expect("body collect failed").to_bytes();
    let json = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).expect("body is not valid JSON") };
    (status, json)
}

fn json_request(method: &str, uri: &str, headers: &[(&str, String)], body: Value) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri).header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn as_role(role: &str, id: Uuid) -> Vec<(&'static str, String)> {
    vec![("x-actor-role", role.to_string()), ("x-actor-id", id.to_string())]
}

fn checkout_body(product: Uuid, qty: u32) -> Value {
    json!({
        "items": [{"productId": product, "qty": qty}],
        "shipping": {
            "name": "Maria P", "line1": "Ermou 12", "city": "Athens", "postal": "10563",
            "phone": "+306912345678", "email": "maria@example.com", "method": "COURIER_COD"
        },
        "payment": {"method": "COD"}
    })
}

async fn place(h: &Harness, qty: u32) -> Value {
    let (status, body) = call(&h.router, json_request("POST", "/checkout", &[], checkout_body(h.product, qty))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200() {
    let h = harness(1).await;
    let req = Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap();
    let (status, body) = call(&h.router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

// ---------------------------------------------------------------------------
// POST /checkout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn checkout_returns_201_with_totals() {
    let h = harness(5).await;
    let body = place(&h, 2).await;
    assert!(body["orderId"].is_string());
    assert_eq!(body["totals"], json!({
        "subtotalCents": 2500, "shippingCents": 430, "codFeeCents": 200, "taxCents": 0, "grandTotalCents": 3130
    }));
    assert_eq!(h.store.product(h.product).await.unwrap().stock.value(), 3);
}

#[tokio::test]
async fn checkout_validation_errors_are_per_field() {
    let h = harness(5).await;
    let mut body = checkout_body(h.product, 2);
    body["shipping"]["postal"] = json!("123");
    body["shipping"]["name"] = json!("M");
    let (status, body) = call(&h.router, json_request("POST", "/checkout", &[], body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_failed");
    assert_eq!(body["errors"]["shipping.postal"], "must be exactly 5 digits");
    assert_eq!(body["errors"]["shipping.name"], "must be at least 2 characters");
}

#[tokio::test]
async fn checkout_empty_cart_is_400() {
    let h = harness(5).await;
    let mut body = checkout_body(h.product, 1);
    body["items"] = json!([]);
    let (status, body) = call(&h.router, json_request("POST", "/checkout", &[], body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "empty_cart");
}

#[tokio::test]
async fn checkout_malformed_body_is_400() {
    let h = harness(5).await;
    let mut body = checkout_body(h.product, 1);
    body["shipping"]["method"] = json!("DRONE");
    let (status, body) = call(&h.router, json_request("POST", "/checkout", &[], body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "malformed_body");
}

#[tokio::test]
async fn checkout_over_stock_is_409_and_unknown_product_is_422() {
    let h = harness(1).await;
    let (status, body) = call(&h.router, json_request("POST", "/checkout", &[], checkout_body(h.product, 2))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "insufficient_stock");
    assert_eq!(h.store.product(h.product).await.unwrap().stock.value(), 1);

    let (status, _) = call(&h.router, json_request("POST", "/checkout", &[], checkout_body(Uuid::now_v7(), 1))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// ---------------------------------------------------------------------------
// POST /shipping/quote
// ---------------------------------------------------------------------------

#[tokio::test]
async fn quote_matches_calculator_and_has_no_side_effects() {
    let h = harness(1).await;
    let body = json!({"items": [{"priceCents": 3000, "qty": 2}], "zone": "mainland", "method": "COURIER_COD"});
    let (status, first) = call(&h.router, json_request("POST", "/shipping/quote", &[], body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["shippingCents"], 0);
    assert_eq!(first["codFeeCents"], 200);
    assert_eq!(first["grandTotalCents"], 6200);
    let (_, second) = call(&h.router, json_request("POST", "/shipping/quote", &[], body)).await;
    assert_eq!(first, second);
    assert!(h.store.events().await.is_empty());
}

#[tokio::test]
async fn quote_resolves_zone_from_postal_and_rejects_unknown_zone() {
    let h = harness(1).await;
    let body = json!({"items": [{"priceCents": 1250, "qty": 2}], "postal": "84100"});
    let (status, totals) = call(&h.router, json_request("POST", "/shipping/quote", &[], body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(totals["shippingCents"], 690);

    let body = json!({"items": [{"priceCents": 1250, "qty": 2}], "zone": "moon"});
    let (status, body) = call(&h.router, json_request("POST", "/shipping/quote", &[], body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"]["zone"].is_string());
}

#[tokio::test]
async fn quote_with_overflowing_price_is_a_field_error() {
    let h = harness(1).await;
    let body = json!({"items": [{"priceCents": 4611686018427387904_i64, "qty": 2}], "zone": "mainland"});
    let (status, body) = call(&h.router, json_request("POST", "/shipping/quote", &[], body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_failed");
    assert!(body["errors"]["items[0].priceCents"].is_string(), "{body}");

    let body = json!({"items": [{"priceCents": i64::MAX, "qty": 1}, {"priceCents": i64::MAX, "qty": 1}], "zone": "mainland"});
    let (status, body) = call(&h.router, json_request("POST", "/shipping/quote", &[], body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"]["items"].is_string(), "{body}");
}

#[tokio::test]
async fn quote_caps_the_number_of_lines() {
    let h = harness(1).await;
    let items: Vec<Value> = (0..51).map(|_| json!({"priceCents": 100, "qty": 1})).collect();
    let (status, body) = call(&h.router, json_request("POST", "/shipping/quote", &[], json!({"items": items, "zone": "mainland"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"]["items"], "at most 50 lines per quote");
}

// ---------------------------------------------------------------------------
// PATCH /orders/items/{itemId}/status and /orders/{orderId}/status
// ---------------------------------------------------------------------------

async fn first_item_id(h: &Harness, order_id: &str) -> String {
    let admin = as_role("admin", Uuid::now_v7());
    let mut req = Request::builder().method("GET").uri(format!("/orders/{order_id}"));
    for (name, value) in &admin {
        req = req.header(*name, value);
    }
    let (status, order) = call(&h.router, req.body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    order["items"][0]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn item_transition_checks_owner_and_table() {
    let h = harness(5).await;
    let placed = place(&h, 2).await;
    let order_id = placed["orderId"].as_str().unwrap().to_string();
    let item_id = first_item_id(&h, &order_id).await;
    let uri = format!("/orders/items/{item_id}/status");

    let (status, _) = call(&h.router, json_request("PATCH", &uri, &as_role("producer", Uuid::now_v7()), json!({"status": "ACCEPTED"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, item) = call(&h.router, json_request("PATCH", &uri, &as_role("producer", h.producer), json!({"status": "REJECTED"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["status"], "REJECTED");
    assert_eq!(h.store.product(h.product).await.unwrap().stock.value(), 5);

    let (status, body) = call(&h.router, json_request("PATCH", &uri, &as_role("producer", h.producer), json!({"status": "REJECTED"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_transition");
    assert_eq!(h.store.product(h.product).await.unwrap().stock.value(), 5);
}

#[tokio::test]
async fn item_rejection_after_shipping_is_400() {
    let h = harness(5).await;
    let placed = place(&h, 2).await;
    let order_id = placed["orderId"].as_str().unwrap().to_string();
    let item_id = first_item_id(&h, &order_id).await;

    let admin = as_role("admin", Uuid::now_v7());
    for next in ["PAID", "PACKING", "SHIPPED"] {
        let (status, _) = call(&h.router, json_request("PATCH", &format!("/orders/{order_id}/status"), &admin, json!({"status": next}))).await;
        assert_eq!(status, StatusCode::OK);
    }
    let uri = format!("/orders/items/{item_id}/status");
    let (status, body) = call(&h.router, json_request("PATCH", &uri, &as_role("producer", h.producer), json!({"status": "REJECTED"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_transition");
    assert_eq!(h.store.product(h.product).await.unwrap().stock.value(), 3);
}

#[tokio::test]
async fn order_transition_is_admin_only_and_linear() {
    let h = harness(5).await;
    let placed = place(&h, 1).await;
    let uri = format!("/orders/{}/status", placed["orderId"].as_str().unwrap());

    let (status, _) = call(&h.router, json_request("PATCH", &uri, &as_role("producer", h.producer), json!({"status": "PAID"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = as_role("admin", Uuid::now_v7());
    let (status, _) = call(&h.router, json_request("PATCH", &uri, &admin, json!({"status": "SHIPPED"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, order) = call(&h.router, json_request("PATCH", &uri, &admin, json!({"status": "PAID"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "PAID");
}

#[tokio::test]
async fn unknown_order_is_404_and_bad_identity_is_401() {
    let h = harness(1).await;
    let uri = format!("/orders/{}/status", Uuid::now_v7());
    let (status, _) = call(&h.router, json_request("PATCH", &uri, &as_role("admin", Uuid::now_v7()), json!({"status": "PAID"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let headers = vec![("x-actor-role", "admin".to_string()), ("x-actor-id", "not-a-uuid".to_string())];
    let (status, body) = call(&h.router, json_request("PATCH", &uri, &headers, json!({"status": "PAID"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn failed_notifications_are_admin_only() {
    let h = harness(1).await;
    let req = |headers: Vec<(&'static str, String)>| {
        let mut b = Request::builder().method("GET").uri("/admin/notifications/failed");
        for (name, value) in headers {
            b = b.header(name, value);
        }
        b.body(Body::empty()).unwrap()
    };
    let (status, _) = call(&h.router, req(vec![])).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = call(&h.router, req(as_role("admin", Uuid::now_v7()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

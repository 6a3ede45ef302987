use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use memstore::MemoryStore;
use model::ProductType;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use service::{Backend, EngineSettings, LogMailer, Services};
use tower::ServiceExt;

use super::*;

async fn app() -> (Arc<MemoryStore>, Router) {
    let store = Arc::new(MemoryStore::new());
    store.set_stock(ProductType::Electronic, "phone", 3).await;
    let services = Services::new(Backend::single(store.clone()), &EngineSettings::default(), Arc::new(LogMailer));
    let server = Server::new(0, Arc::new(services), 30).unwrap();
    (store, server.router())
}

fn request(method: &str, uri: &str, user: Option<(&str, &str)>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = user {
        builder = builder.header(USER_ID_HEADER, id).header(USER_ROLE_HEADER, role);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn money(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

const BUYER: Option<(&str, &str)> = Some(("u1", "buyer"));
const ADMIN: Option<(&str, &str)> = Some(("root", "admin"));

fn phone(quantity: u32) -> Value {
    json!({
        "productType": "electronic",
        "productId": "phone",
        "name": "Phone",
        "price": "100.00",
        "quantity": quantity
    })
}

fn shipping() -> Value {
    json!({
        "street": "1 Main St",
        "city": "Springfield",
        "state": "IL",
        "zip": "62701",
        "country": "US"
    })
}

#[tokio::test]
async fn test_health_and_metrics() {
    let (_, app) = app().await;
    let resp = app.clone().oneshot(request("GET", "/health", None, None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.clone().oneshot(request("GET", "/metrics", None, None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("http_requests_total"));
}

#[tokio::test]
async fn test_missing_identity_is_unauthenticated() {
    let (_, app) = app().await;
    let (status, body) = send(&app, request("GET", "/api/cart", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthenticated");

    let (status, _) = send(&app, request("GET", "/api/cart", Some(("u1", "wizard")), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cart_flow() {
    let (_, app) = app().await;
    let (status, _) = send(&app, request("GET", "/api/cart", BUYER, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, cart) = send(&app, request("POST", "/api/cart/add", BUYER, Some(phone(2)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(money(&cart["totals"]["total"]), Decimal::new(220, 0));

    let (status, body) = send(
        &app,
        request("PUT", "/api/cart/update-quantity", BUYER, Some(json!({ "productId": "phone", "quantity": 4 }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InsufficientStock");
    assert_eq!(body["available"], 3);

    let (status, body) = send(
        &app,
        request("PUT", "/api/cart/update-quantity", BUYER, Some(json!({ "productId": "tv", "quantity": 1 }))),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "ItemNotFound");

    let (status, summary) = send(&app, request("GET", "/api/cart/summary", BUYER, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["totalQuantity"], 2);
    assert_eq!(summary["totals"]["total"], "220.00");
    assert_eq!(summary["itemTypes"]["electronic"], 1);

    let (status, cart) = send(&app, request("DELETE", "/api/cart/clear", BUYER, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["items"], json!([]));
}

#[tokio::test]
async fn test_checkout_and_lifecycle() {
    let (_, app) = app().await;
    send(&app, request("POST", "/api/cart/add", BUYER, Some(phone(1)))).await;

    let (status, order) = send(
        &app,
        request("POST", "/api/orders", BUYER, Some(json!({ "shippingAddress": shipping(), "paymentMethod": "card" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "Processing");
    let id = order["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        request("PUT", &format!("/api/orders/{id}/status"), BUYER, Some(json!({ "status": "Shipped" }))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        request("PUT", &format!("/api/orders/{id}/status"), ADMIN, Some(json!({ "status": "Delivered" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        request("PUT", &format!("/api/orders/{id}/status"), ADMIN, Some(json!({ "status": "Shipped" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "InvalidTransition");
    assert_eq!(body["from"], "Delivered");

    let (status, body) = send(&app, request("PUT", &format!("/api/orders/{id}/cancel"), BUYER, None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["to"], "Cancelled");

    let (_, history) = send(&app, request("GET", &format!("/api/orders/{id}/history"), BUYER, None)).await;
    assert_eq!(history.as_array().unwrap().len(), 2);

    let (status, stats) = send(&app, request("GET", "/api/orders/admin/stats", ADMIN, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["byStatus"]["delivered"], 1);

    let (_, notifications) = send(&app, request("GET", "/api/notifications", BUYER, None)).await;
    assert_eq!(notifications["total"], 2);
}

#[tokio::test]
async fn test_address_defaults() {
    let (_, app) = app().await;
    let mut first = shipping();
    first["isDefault"] = json!(true);
    let (status, a) = send(&app, request("POST", "/api/addresses", BUYER, Some(first))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, b) = send(&app, request("POST", "/api/addresses", BUYER, Some(shipping()))).await;

    let b_id = b["id"].as_str().unwrap();
    let (status, _) = send(&app, request("PUT", &format!("/api/addresses/{b_id}/default"), BUYER, None)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, list) = send(&app, request("GET", "/api/addresses", BUYER, None)).await;
    let defaults: Vec<&Value> = list.as_array().unwrap().iter().filter(|a| a["isDefault"] == true).collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0]["id"], b["id"]);

    let a_id = a["id"].as_str().unwrap();
    let (status, _) = send(
        &app,
        request("DELETE", &format!("/api/addresses/{a_id}"), Some(("u2", "buyer")), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_appointment_slots() {
    let (_, app) = app().await;
    let booking = json!({
        "service": "Oil change",
        "serviceType": "Maintenance",
        "date": "2024-01-01",
        "time": "09:00",
        "duration": 30,
        "price": "49.99"
    });
    let (status, _) = send(&app, request("POST", "/api/appointments", BUYER, Some(booking.clone()))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, request("POST", "/api/appointments", BUYER, Some(booking))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "SlotUnavailable");

    let (status, body) = send(
        &app,
        request("GET", "/api/appointments/available-slots?date=2024-01-01&duration=30", BUYER, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let slots: Vec<&str> = body["availableSlots"].as_array().unwrap().iter().filter_map(Value::as_str).collect();
    assert!(!slots.contains(&"09:00"));
    assert!(slots.contains(&"09:30"));
    assert!(!slots.contains(&"08:30"));
}

#[tokio::test]
async fn test_malformed_line_item_is_invalid_line_item() {
    let (_, app) = app().await;
    let mut item = phone(1);
    item["quantity"] = json!(-1);
    let (status, body) = send(&app, request("POST", "/api/cart/add", BUYER, Some(item))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidLineItem");
    assert!(body["message"].as_str().unwrap().contains("-1"));

    let mut item = phone(1);
    item["quantity"] = json!(1.5);
    let (status, body) = send(&app, request("POST", "/api/cart/add", BUYER, Some(item))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidLineItem");

    let (status, _) = send(&app, request("GET", "/api/cart", BUYER, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rejected_bodies_and_queries_are_json() {
    let (_, app) = app().await;
    let req = Request::builder()
        .method("POST")
        .uri("/api/addresses")
        .header(USER_ID_HEADER, "u1")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadRequest");
    assert!(body["message"].is_string());

    let (status, body) = send(&app, request("POST", "/api/orders", BUYER, Some(json!({ "paymentMethod": "cash" })))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadRequest");

    let (status, body) = send(
        &app,
        request("GET", "/api/appointments/available-slots?date=tomorrow", BUYER, None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadRequest");
}

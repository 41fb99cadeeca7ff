//! Checkout endpoint and the sandbox checkout-to-booking path.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use booking_bridge_integration_tests::TestApp;

#[tokio::test]
async fn test_checkout_creates_sandbox_session() {
    let app = TestApp::new();

    let resp = app
        .post_json("/api/checkout", &app.checkout_payload(), &[])
        .await;

    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
    assert!(resp.body["sessionId"].as_str().unwrap().starts_with("sbx_"));
    assert!(resp.body["orderNumber"].as_str().unwrap().starts_with("BK-20260701-"));
    assert!(
        resp.body["url"]
            .as_str()
            .unwrap()
            .starts_with("https://booking.example.com/success?session_id=sbx_")
    );
    assert!(app.store.bookings().is_empty());
}

#[tokio::test]
async fn test_paid_sandbox_checkout_becomes_booking() {
    let app = TestApp::new();
    let created = app
        .post_json("/api/checkout", &app.checkout_payload(), &[])
        .await;
    let session_id = created.body["sessionId"].as_str().unwrap();

    let event = app.sandbox.complete(session_id).await.unwrap();
    let resp = app.deliver(&event).await;

    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
    let bookings = app.store.bookings();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].order_number, created.body["orderNumber"].as_str().unwrap());
    assert_eq!(bookings[0].guests, 2);
    assert_eq!(bookings[0].dogs, 1);
    assert!(bookings[0].payment_intent_id.starts_with("pi_sbx_"));
    assert_eq!(app.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_validation_error_echoes_request_id() {
    let app = TestApp::new();
    let mut payload = app.checkout_payload();
    payload["guests"] = json!(0);

    let resp = app
        .post_json("/api/checkout", &payload, &[("x-request-id", "req-checkout-1")])
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(resp.body["error"].is_string());
    assert_eq!(resp.body["requestId"], json!("req-checkout-1"));
    assert_eq!(resp.headers["x-request-id"], "req-checkout-1");
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let app = TestApp::new();

    let resp = app
        .post_json("/api/checkout", &json!({ "productId": "not-a-uuid" }), &[])
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(resp.body["requestId"].is_string());
}

#[tokio::test]
async fn test_unknown_product_not_found() {
    let app = TestApp::new();
    let mut payload = app.checkout_payload();
    payload["productId"] = json!(Uuid::new_v4());

    let resp = app.post_json("/api/checkout", &payload, &[]).await;

    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_party_larger_than_slot_conflicts() {
    let app = TestApp::new();
    let mut payload = app.checkout_payload();
    payload["guests"] = json!(11);

    let resp = app.post_json("/api/checkout", &payload, &[]).await;

    assert_eq!(resp.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_rate_limit_per_client() {
    let app = TestApp::with_rate_limit(2);
    let payload = app.checkout_payload();
    let client = [("x-forwarded-for", "203.0.113.7")];

    for _ in 0..2 {
        let resp = app.post_json("/api/checkout", &payload, &client).await;
        assert_eq!(resp.status, StatusCode::OK);
    }
    let limited = app.post_json("/api/checkout", &payload, &client).await;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.body["requestId"].is_string());

    let other = app
        .post_json("/api/checkout", &payload, &[("x-forwarded-for", "198.51.100.4")])
        .await;
    assert_eq!(other.status, StatusCode::OK);
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new();

    let live = app.get("/health").await;
    assert_eq!(live.status, StatusCode::OK);
    assert_eq!(live.body, json!("ok"));

    let ready = app.get("/health/ready").await;
    assert_eq!(ready.status, StatusCode::OK);
}

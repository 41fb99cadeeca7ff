//! Stripe webhook endpoint, end to end through the router.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use booking_bridge_integration_tests::TestApp;
use booking_bridge_server::testing::FakeOdoo;
use booking_bridge_server::testing::fixtures;

#[tokio::test]
async fn test_paid_intent_is_reconciled() {
    let app = TestApp::new();

    let resp = app.deliver(&app.paid_event("pi_3PqRsT")).await;

    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
    assert_eq!(resp.body["success"], json!(true));
    assert_eq!(resp.body["paymentIntentId"], json!("pi_3PqRsT"));
    assert!(resp.body["orderId"].as_i64().is_some());

    assert_eq!(app.odoo.count("sale.order"), 1);
    assert_eq!(app.odoo.count("purchase.order"), 1);
    assert_eq!(app.odoo.count("purchase.order.line"), 1);

    let bookings = app.store.bookings();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].payment_intent_id, "pi_3PqRsT");
    assert!(bookings[0].odoo.purchase_order_id.is_some());
    assert_eq!(app.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let app = TestApp::new();
    let event = app.paid_event("pi_3Replay");

    let first = app.deliver(&event).await;
    let sale_lines = app.odoo.count("sale.order.line");
    let second = app.deliver(&event).await;

    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(first.body["orderId"], second.body["orderId"]);
    assert_eq!(app.odoo.count("sale.order"), 1);
    assert_eq!(app.odoo.count("sale.order.line"), sale_lines);
    assert_eq!(app.odoo.count("purchase.order.line"), 1);
    assert_eq!(app.store.bookings().len(), 1);
    assert_eq!(app.notifier.sent().len(), 1);

    let slot = app.store.slot(app.catalog.slot.id).unwrap();
    assert_eq!(slot.booked, 2);
}

#[tokio::test]
async fn test_bookings_share_supplier_purchase_order() {
    let app = TestApp::new();
    let mut metadata = fixtures::intent_metadata(&app.catalog);

    app.deliver(&fixtures::payment_succeeded_event("pi_first", &metadata))
        .await;
    metadata["order_number"] = json!("BK-20260701-ZZ99XY");
    metadata["customer_email"] = json!("giulia.bianchi@example.com");
    app.deliver(&fixtures::payment_succeeded_event("pi_second", &metadata))
        .await;

    assert_eq!(app.odoo.count("sale.order"), 2);
    assert_eq!(app.odoo.count("purchase.order"), 1);
    assert_eq!(app.odoo.count("purchase.order.line"), 2);
}

#[tokio::test]
async fn test_missing_signature_rejected() {
    let app = TestApp::new();
    let payload = app.paid_event("pi_nosig").to_string();

    let resp = app.deliver_raw(payload, None).await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(resp.body["error"].as_str().unwrap().contains("Stripe-Signature"));
    assert!(app.odoo.calls().is_empty());
}

#[tokio::test]
async fn test_tampered_payload_rejected() {
    let app = TestApp::new();
    let signed = app.paid_event("pi_signed").to_string();
    let signature = fixtures::signature_header(signed.as_bytes());
    let tampered = app.paid_event("pi_tampered").to_string();

    let resp = app.deliver_raw(tampered, Some(&signature)).await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.body["error"], json!("Invalid signature"));
    assert!(app.store.bookings().is_empty());
}

#[tokio::test]
async fn test_stale_signature_rejected() {
    let app = TestApp::new();
    let payload = app.paid_event("pi_stale").to_string();

    let resp = app
        .deliver_raw(payload, Some("t=1600000000,v1=00ff00ff"))
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_other_event_types_acknowledged() {
    let app = TestApp::new();
    let event = json!({
        "id": "evt_refund",
        "type": "charge.refunded",
        "data": { "object": { "id": "ch_123" } }
    });

    let resp = app.deliver(&event).await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body, json!({ "received": true, "ignored": "charge.refunded" }));
    assert!(app.odoo.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_product_is_client_error() {
    let app = TestApp::new();
    let mut metadata = fixtures::intent_metadata(&app.catalog);
    metadata["product_id"] = json!(Uuid::new_v4().to_string());

    let resp = app
        .deliver(&fixtures::payment_succeeded_event("pi_unknown", &metadata))
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.body["paymentIntentId"], json!("pi_unknown"));
    assert_eq!(resp.body["orderNumber"], json!("BK-20260701-AB12CD"));
    assert_eq!(app.odoo.count("sale.order"), 0);
}

#[tokio::test]
async fn test_sale_order_failure_is_server_error() {
    let app = TestApp::with_odoo(FakeOdoo::new().failing("sale.order", "create"));

    let resp = app.deliver(&app.paid_event("pi_down")).await;

    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.body["error"], json!("Reconciliation failed"));
    assert_eq!(resp.body["paymentIntentId"], json!("pi_down"));
    assert!(app.store.bookings().is_empty());
    assert!(app.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_schema_drift_does_not_fail_delivery() {
    let app = TestApp::with_odoo(FakeOdoo::new().without_custom_fields());

    let resp = app.deliver(&app.paid_event("pi_drift")).await;

    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
    assert_eq!(app.odoo.count("sale.order"), 1);
}

#[tokio::test]
async fn test_readiness_payload() {
    let app = TestApp::new();

    let resp = app.get("/api/webhooks/stripe").await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["status"], json!("ok"));
    assert_eq!(resp.body["events"], json!(["payment_intent.succeeded"]));
}

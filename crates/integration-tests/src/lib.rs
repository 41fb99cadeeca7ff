//! Integration tests for the booking bridge.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p booking-bridge-integration-tests
//! ```
//!
//! Most tests drive the full axum router in-process with
//! `tower::ServiceExt::oneshot`, backed by the in-memory Odoo, booking store,
//! sandbox gateway and recording notifier. Tests marked `#[ignore]` talk to a
//! running server instead.
//!
//! # Test Categories
//!
//! - `webhook` - signature checks, reconciliation, replay idempotency
//! - `checkout` - validation, rate limiting, sandbox checkout to booking
//! - `sync` - bearer auth and the catch-up jobs
//! - `live` - smoke tests against `BRIDGE_BASE_URL`

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode, header};
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;

use booking_bridge_server::app;
use booking_bridge_server::config::RateLimitConfig;
use booking_bridge_server::payments::{GatewayKind, Gateways, SandboxGateway};
use booking_bridge_server::reconcile::ReconcileSettings;
use booking_bridge_server::state::{AppState, StateParts};
use booking_bridge_server::testing::fixtures::{self, Catalog};
use booking_bridge_server::testing::{FakeOdoo, MemoryBookingStore, RecordingNotifier};

/// Bearer token accepted by the sync endpoints.
pub const SYNC_TOKEN: &str = "sync_Hq7Lw2Nx9Rb4Tz6Kp3Vm";

/// Upper bound on response bodies read by the harness.
const BODY_LIMIT: usize = 1024 * 1024;

/// A router wired to in-memory collaborators, with handles to inspect them.
pub struct TestApp {
    pub router: Router,
    pub odoo: Arc<FakeOdoo>,
    pub store: Arc<MemoryBookingStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub sandbox: Arc<SandboxGateway>,
    pub catalog: Catalog,
}

/// A response with its parsed body. Non-JSON bodies become a JSON string.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    #[must_use]
    pub fn new() -> Self {
        Self::build(FakeOdoo::new(), 100)
    }

    /// Use a scripted Odoo.
    #[must_use]
    pub fn with_odoo(odoo: FakeOdoo) -> Self {
        Self::build(odoo, 100)
    }

    /// Allow `max_requests` checkouts per client per minute.
    #[must_use]
    pub fn with_rate_limit(max_requests: u32) -> Self {
        Self::build(FakeOdoo::new(), max_requests)
    }

    fn build(odoo: FakeOdoo, max_requests: u32) -> Self {
        let odoo = Arc::new(odoo);
        let store = Arc::new(MemoryBookingStore::new());
        let catalog = fixtures::seed_catalog(&store);
        let notifier = Arc::new(RecordingNotifier::new());
        let sandbox = Arc::new(SandboxGateway::new());

        let state = AppState::new(StateParts {
            store: store.clone(),
            odoo: odoo.clone(),
            gateways: Gateways::new(GatewayKind::Sandbox).with(sandbox.clone()),
            notifier: notifier.clone(),
            settings: ReconcileSettings::default(),
            webhook_secret: SecretString::from(fixtures::WEBHOOK_SECRET.to_string()),
            sync_api_token: Some(SecretString::from(SYNC_TOKEN.to_string())),
            checkout_rate_limit: RateLimitConfig {
                max_requests,
                window: Duration::from_secs(60),
            },
        });

        Self {
            router: app(state),
            odoo,
            store,
            notifier,
            sandbox,
            catalog,
        }
    }

    /// Send a request through the router.
    ///
    /// # Panics
    ///
    /// Panics if the router fails or the body cannot be read.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|e| match e {});
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), BODY_LIMIT)
            .await
            .unwrap_or_else(|e| panic!("failed to read body: {e}"));
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// GET `path`.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.send(request("GET", path).body(Body::empty()).unwrap_or_else(|e| panic!("{e}")))
            .await
    }

    /// POST `body` as JSON to `path` with extra headers.
    pub async fn post_json(&self, path: &str, body: &Value, headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = request("POST", path).header(header::CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(
            builder
                .body(Body::from(body.to_string()))
                .unwrap_or_else(|e| panic!("{e}")),
        )
        .await
    }

    /// Deliver a webhook event with a valid signature.
    pub async fn deliver(&self, event: &Value) -> TestResponse {
        let payload = event.to_string();
        let signature = fixtures::signature_header(payload.as_bytes());
        self.deliver_raw(payload, Some(&signature)).await
    }

    /// Deliver a raw webhook payload with an optional signature header.
    pub async fn deliver_raw(&self, payload: String, signature: Option<&str>) -> TestResponse {
        let mut builder = request("POST", "/api/webhooks/stripe")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header("stripe-signature", signature);
        }
        self.send(builder.body(Body::from(payload)).unwrap_or_else(|e| panic!("{e}")))
            .await
    }

    /// A checkout request for 2 adults and 1 dog on the seeded slot.
    #[must_use]
    pub fn checkout_payload(&self) -> Value {
        json!({
            "productId": self.catalog.product.id,
            "productType": "experience",
            "availabilitySlotId": self.catalog.slot.id,
            "date": fixtures::SLOT_DATE,
            "timeSlot": "09:30",
            "guests": 2,
            "dogs": 1,
            "successUrl": "https://booking.example.com/success",
            "cancelUrl": "https://booking.example.com/cancel",
            "customer": {
                "email": "mario.rossi@example.com",
                "name": "Mario Rossi",
                "phone": "+39 333 1234567"
            }
        })
    }

    /// The seeded booking metadata as a paid intent event.
    #[must_use]
    pub fn paid_event(&self, payment_intent_id: &str) -> Value {
        fixtures::payment_succeeded_event(
            payment_intent_id,
            &fixtures::intent_metadata(&self.catalog),
        )
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

fn request(method: &str, path: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(path)
}

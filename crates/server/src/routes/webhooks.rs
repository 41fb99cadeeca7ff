//! Stripe webhook endpoint.
//!
//! The raw body is verified against `Stripe-Signature` before it is parsed.
//! Only `payment_intent.succeeded` is acted on; every other event type is
//! acknowledged so Stripe stops redelivering it.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::payments::{PaymentIntent, StripeEvent};
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "stripe-signature";
const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";

/// Failure body; ids are included when they could be read.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookFailure<'a> {
    error: &'a str,
    payment_intent_id: Option<&'a str>,
    order_number: Option<&'a str>,
}

fn failure(
    status: StatusCode,
    error: &str,
    payment_intent_id: Option<&str>,
    order_number: Option<&str>,
) -> Response {
    let body = WebhookFailure {
        error,
        payment_intent_id,
        order_number,
    };
    (status, Json(body)).into_response()
}

/// Receive a Stripe event.
///
/// POST /api/webhooks/stripe
pub async fn receive(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok()) else {
        tracing::warn!("Stripe webhook without signature header");
        return failure(StatusCode::BAD_REQUEST, "Missing Stripe-Signature header", None, None);
    };
    if let Err(e) = state.verifier().verify(&body, signature) {
        tracing::warn!(error = %e, "Stripe webhook signature rejected");
        return failure(StatusCode::BAD_REQUEST, "Invalid signature", None, None);
    }

    let event: StripeEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable Stripe event");
            return failure(StatusCode::BAD_REQUEST, "Invalid event payload", None, None);
        }
    };

    if event.event_type != PAYMENT_SUCCEEDED {
        tracing::info!(event_id = %event.id, event_type = %event.event_type, "Ignoring Stripe event");
        return Json(json!({ "received": true, "ignored": event.event_type })).into_response();
    }

    let intent: PaymentIntent = match serde_json::from_value(event.data.object) {
        Ok(intent) => intent,
        Err(e) => {
            tracing::warn!(event_id = %event.id, error = %e, "Malformed payment intent");
            return failure(StatusCode::BAD_REQUEST, "Invalid payment intent", None, None);
        }
    };
    let order_number = intent.metadata.get("order_number").map(String::as_str);

    match state.orchestrator().handle_payment_succeeded(&intent).await {
        Ok(report) => {
            tracing::info!(
                payment_intent_id = %intent.id,
                sale_order = %report.sale_order.name,
                "Stripe payment reconciled"
            );
            Json(json!({
                "success": true,
                "orderId": report.sale_order.id,
                "orderName": report.sale_order.name,
                "bookingId": report.booking_id,
                "paymentIntentId": intent.id,
            }))
            .into_response()
        }
        Err(e) if e.is_client_error() => {
            tracing::warn!(payment_intent_id = %intent.id, error = %e, "Payment cannot be reconciled");
            failure(
                StatusCode::BAD_REQUEST,
                &e.to_string(),
                Some(&intent.id),
                order_number,
            )
        }
        Err(e) => {
            let event_id = sentry::capture_error(&e);
            tracing::error!(
                payment_intent_id = %intent.id,
                error = %e,
                sentry_event_id = %event_id,
                "Payment reconciliation failed"
            );
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Reconciliation failed",
                Some(&intent.id),
                order_number,
            )
        }
    }
}

/// Readiness probe for the webhook endpoint.
///
/// GET /api/webhooks/stripe
pub async fn status() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "endpoint": "stripe-webhook",
        "events": [PAYMENT_SUCCEEDED],
    }))
}

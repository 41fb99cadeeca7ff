//! Stripe Checkout and webhook signature verification.

use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tracing::instrument;

use booking_bridge_core::CheckoutStatus;

use super::{
    CheckoutRequest, CreatedCheckout, CustomerIdentity, GatewayError, GatewayKind,
    NormalizedCheckoutSession, PaymentGateway,
};
use crate::config::StripeConfig;

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.stripe.com/v1";

/// Maximum age of a webhook timestamp (Stripe's recommendation).
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Accepted clock skew for timestamps from the future.
const FUTURE_SKEW_SECS: i64 = 60;

/// Stripe Checkout gateway.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: SecretString,
    api_base: String,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_base", &self.api_base)
            .field("secret_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionList {
    data: Vec<Value>,
}

impl StripeGateway {
    /// Create a gateway using the configured secret key.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Http` if the HTTP client cannot be built.
    pub fn new(config: &StripeConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            secret_key: config.secret_key.clone(),
            api_base: API_BASE.to_string(),
        })
    }

    async fn parse_error(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<StripeErrorBody>(&text).map_or(text, |body| {
            match (body.error.code, body.error.message) {
                (Some(code), Some(message)) => format!("{code}: {message}"),
                (None, Some(message)) => message,
                (Some(code), None) => code,
                (None, None) => "unknown error".to_string(),
            }
        });
        GatewayError::Api { status, message }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Stripe
    }

    #[instrument(skip(self, request), fields(order_number = %request.order_number))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CreatedCheckout, GatewayError> {
        let form = checkout_form(request);
        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.api_base))
            .basic_auth(self.secret_key.expose_secret(), None::<&str>)
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::parse_error(response).await);
        }

        let session: CreateSessionResponse = response.json().await?;
        let url = session
            .url
            .ok_or_else(|| GatewayError::InvalidResponse("session without url".to_string()))?;
        tracing::info!(session_id = %session.id, "Created Stripe checkout session");
        Ok(CreatedCheckout {
            session_id: session.id,
            url,
        })
    }

    #[instrument(skip(self))]
    async fn get_checkout_session(&self, session_id: &str) -> Result<Value, GatewayError> {
        let response = self
            .client
            .get(format!("{}/checkout/sessions/{session_id}", self.api_base))
            .basic_auth(self.secret_key.expose_secret(), None::<&str>)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(session_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::parse_error(response).await);
        }
        Ok(response.json().await?)
    }

    fn normalize_checkout_session(
        &self,
        raw: &Value,
    ) -> Result<NormalizedCheckoutSession, GatewayError> {
        normalize_session(raw, GatewayKind::Stripe)
    }

    #[instrument(skip(self))]
    async fn find_session_id(&self, payment_intent_id: &str) -> Result<Option<String>, GatewayError> {
        let url = url::Url::parse_with_params(
            &format!("{}/checkout/sessions", self.api_base),
            &[("payment_intent", payment_intent_id), ("limit", "1")],
        )
        .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let response = self
            .client
            .get(url)
            .basic_auth(self.secret_key.expose_secret(), None::<&str>)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::parse_error(response).await);
        }
        let list: SessionList = response.json().await?;
        Ok(list
            .data
            .first()
            .and_then(|session| session.get("id"))
            .and_then(Value::as_str)
            .map(String::from))
    }
}

/// Form body for `POST /v1/checkout/sessions`.
fn checkout_form(request: &CheckoutRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("customer_email".to_string(), request.customer_email.clone()),
        ("client_reference_id".to_string(), request.order_number.clone()),
    ];

    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((
            format!("{prefix}[price_data][currency]"),
            request.currency.to_lowercase(),
        ));
        form.push((
            format!("{prefix}[price_data][unit_amount]"),
            item.unit_amount_cents.to_string(),
        ));
        form.push((
            format!("{prefix}[price_data][product_data][name]"),
            item.label.clone(),
        ));
        form.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
    }

    for (key, value) in &request.metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
        form.push((format!("payment_intent_data[metadata][{key}]"), value.clone()));
    }
    form
}

/// Normalize a Stripe-shaped checkout session payload.
pub(crate) fn normalize_session(
    raw: &Value,
    gateway: GatewayKind,
) -> Result<NormalizedCheckoutSession, GatewayError> {
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidResponse("session without id".to_string()))?;

    let text = |value: Option<&Value>| {
        value
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    let details = raw.get("customer_details");

    let customer = CustomerIdentity {
        email: text(details.and_then(|d| d.get("email"))).or_else(|| text(raw.get("customer_email"))),
        name: text(details.and_then(|d| d.get("name"))),
        phone: text(details.and_then(|d| d.get("phone"))),
    };

    // `payment_intent` is an id, or the object when expanded
    let payment_intent_id = match raw.get("payment_intent") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Object(pi)) => text(pi.get("id")),
        _ => None,
    };

    Ok(NormalizedCheckoutSession {
        id: id.to_string(),
        gateway,
        status: CheckoutStatus::from_stripe(
            raw.get("payment_status").and_then(Value::as_str),
            raw.get("status").and_then(Value::as_str),
        ),
        amount: raw
            .get("amount_total")
            .and_then(Value::as_i64)
            .map(|minor| Decimal::new(minor, 2)),
        currency: text(raw.get("currency")).map(|c| c.to_uppercase()),
        customer,
        payment_intent_id,
        metadata: string_map(raw.get("metadata")),
        custom_fields: custom_fields(raw.get("custom_fields")),
    })
}

fn string_map(value: Option<&Value>) -> HashMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| match v {
                    Value::String(s) => Some((k.clone(), s.clone())),
                    Value::Number(n) => Some((k.clone(), n.to_string())),
                    Value::Bool(b) => Some((k.clone(), b.to_string())),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Flatten Checkout custom fields (`text`, `numeric`, `dropdown`) to strings.
fn custom_fields(value: Option<&Value>) -> HashMap<String, String> {
    let Some(fields) = value.and_then(Value::as_array) else {
        return HashMap::new();
    };
    fields
        .iter()
        .filter_map(|field| {
            let key = field.get("key")?.as_str()?;
            let value = ["text", "numeric", "dropdown"]
                .iter()
                .find_map(|kind| field.get(kind)?.get("value")?.as_str())?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

// =============================================================================
// Webhooks
// =============================================================================

/// Errors from webhook signature verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing Stripe-Signature header")]
    MissingHeader,

    #[error("malformed Stripe-Signature header")]
    Malformed,

    #[error("timestamp outside tolerance (age {0}s)")]
    OutsideTolerance(i64),

    #[error("signature mismatch")]
    Mismatch,
}

/// Verifies `Stripe-Signature` headers.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl WebhookVerifier {
    #[must_use]
    pub const fn new(secret: SecretString) -> Self {
        Self {
            secret,
            tolerance_secs: WEBHOOK_TOLERANCE_SECS,
        }
    }

    /// Verify `header` against the raw `payload` at the current time.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError` when the header is malformed, stale, or no
    /// `v1` signature matches.
    pub fn verify(&self, payload: &[u8], header: &str) -> Result<(), SignatureError> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    /// Verify against an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`Self::verify`].
    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<(), SignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(sig) = part.strip_prefix("v1=") {
                signatures.push(sig);
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if signatures.is_empty() {
            return Err(SignatureError::Malformed);
        }
        let ts: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;

        let age = now - ts;
        if age > self.tolerance_secs || age < -FUTURE_SKEW_SECS {
            tracing::warn!(age, "Stripe webhook timestamp outside tolerance");
            return Err(SignatureError::OutsideTolerance(age));
        }

        let expected = sign_payload(self.secret.expose_secret(), ts, payload);
        if signatures
            .iter()
            .any(|candidate| constant_time_compare(&expected, candidate))
        {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`, as Stripe computes `v1`.
#[must_use]
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    // HMAC accepts keys of any length
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

/// A webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: Value,
}

/// The fields of a `payment_intent` object the bridge reads.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    /// Amount in minor units.
    pub amount: i64,
    #[serde(default)]
    pub amount_received: Option<i64>,
    pub currency: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub receipt_email: Option<String>,
}

impl PaymentIntent {
    /// Charged amount in major units.
    #[must_use]
    pub fn charged(&self) -> Decimal {
        Decimal::new(self.amount_received.unwrap_or(self.amount), 2)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use booking_bridge_core::QuoteLine;
    use serde_json::json;

    use super::*;

    const SECRET: &str = "whsec_9f2Kq81LmZ0aB7cD4eF6gH3jN5";
    const NOW: i64 = 1_780_000_000;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SecretString::from(SECRET))
    }

    #[test]
    fn test_valid_signature() {
        let body = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
        let header = format!("t={NOW},v1={}", sign_payload(SECRET, NOW, body));
        assert_eq!(verifier().verify_at(body, &header, NOW + 10), Ok(()));
    }

    #[test]
    fn test_any_v1_may_match() {
        let body = b"{}";
        let header = format!("t={NOW},v1=deadbeef,v1={},v0=ignored", sign_payload(SECRET, NOW, body));
        assert_eq!(verifier().verify_at(body, &header, NOW), Ok(()));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = format!("t={NOW},v1={}", sign_payload(SECRET, NOW, b"{\"amount\":100}"));
        assert_eq!(
            verifier().verify_at(b"{\"amount\":1}", &header, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_stale_and_future_timestamps_rejected() {
        let body = b"{}";
        let header = format!("t={NOW},v1={}", sign_payload(SECRET, NOW, body));
        assert!(matches!(
            verifier().verify_at(body, &header, NOW + 301),
            Err(SignatureError::OutsideTolerance(301))
        ));
        assert!(matches!(
            verifier().verify_at(body, &header, NOW - 61),
            Err(SignatureError::OutsideTolerance(-61))
        ));
    }

    #[test]
    fn test_malformed_headers() {
        for header in ["", "v1=abc", "t=abc,v1=abc", "t=123"] {
            assert_eq!(
                verifier().verify_at(b"{}", header, NOW),
                Err(SignatureError::Malformed),
                "{header}"
            );
        }
    }

    #[test]
    fn test_normalize_session() {
        let raw = json!({
            "id": "cs_test_a1",
            "payment_status": "paid",
            "status": "complete",
            "amount_total": 12500,
            "currency": "eur",
            "payment_intent": "pi_123",
            "customer_details": {"email": "mario@example.com", "name": "Mario Rossi", "phone": null},
            "metadata": {"order_number": "BK-20260701-AB12CD", "guests": "2"},
            "custom_fields": [
                {"key": "fiscal_code", "type": "text", "text": {"value": "RSSMRA80A01H501U"}},
                {"key": "empty", "type": "text", "text": {"value": null}}
            ]
        });
        let session = normalize_session(&raw, GatewayKind::Stripe).unwrap();
        assert_eq!(session.status, CheckoutStatus::Paid);
        assert_eq!(session.amount, Some(Decimal::new(125, 0)));
        assert_eq!(session.currency.as_deref(), Some("EUR"));
        assert_eq!(session.payment_intent_id.as_deref(), Some("pi_123"));
        assert_eq!(session.customer.name.as_deref(), Some("Mario Rossi"));
        assert_eq!(session.customer.phone, None);
        assert_eq!(session.metadata["guests"], "2");
        assert_eq!(session.custom_fields["fiscal_code"], "RSSMRA80A01H501U");
        assert!(!session.custom_fields.contains_key("empty"));
    }

    #[test]
    fn test_normalize_expanded_intent_and_unknown_status() {
        let raw = json!({
            "id": "cs_test_a2",
            "payment_status": "weird",
            "payment_intent": {"id": "pi_456"},
            "customer_email": "x@example.com"
        });
        let session = normalize_session(&raw, GatewayKind::Stripe).unwrap();
        assert_eq!(session.status, CheckoutStatus::Unknown);
        assert_eq!(session.payment_intent_id.as_deref(), Some("pi_456"));
        assert_eq!(session.customer.email.as_deref(), Some("x@example.com"));
        assert!(normalize_session(&json!({}), GatewayKind::Stripe).is_err());
    }

    #[test]
    fn test_checkout_form_copies_metadata_to_intent() {
        let request = CheckoutRequest {
            order_number: "BK-20260701-AB12CD".to_string(),
            currency: "EUR".to_string(),
            line_items: vec![
                QuoteLine {
                    label: "Adult".to_string(),
                    unit_amount_cents: 5000,
                    quantity: 2,
                },
                QuoteLine {
                    label: "Dog".to_string(),
                    unit_amount_cents: 2500,
                    quantity: 1,
                },
            ],
            customer_email: "mario@example.com".to_string(),
            success_url: "https://example.com/ok".to_string(),
            cancel_url: "https://example.com/ko".to_string(),
            metadata: BTreeMap::from([("order_number".to_string(), "BK-20260701-AB12CD".to_string())]),
        };
        let form: HashMap<String, String> = checkout_form(&request).into_iter().collect();
        assert_eq!(form["line_items[0][price_data][unit_amount]"], "5000");
        assert_eq!(form["line_items[1][quantity]"], "1");
        assert_eq!(form["line_items[1][price_data][currency]"], "eur");
        assert_eq!(form["metadata[order_number]"], "BK-20260701-AB12CD");
        assert_eq!(form["payment_intent_data[metadata][order_number]"], "BK-20260701-AB12CD");
    }

    #[test]
    fn test_payment_intent_charged_amount() {
        let pi: PaymentIntent = serde_json::from_value(json!({
            "id": "pi_1", "amount": 12500, "amount_received": 12500, "currency": "eur",
            "metadata": {"order_number": "BK-1"}
        }))
        .unwrap();
        assert_eq!(pi.charged(), Decimal::new(125, 0));
        assert_eq!(pi.metadata["order_number"], "BK-1");
    }
}

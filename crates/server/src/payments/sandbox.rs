//! In-process gateway for local development and tests.
//!
//! Sessions are kept in memory in the same shape Stripe returns, so the
//! normalization path is shared with the real gateway. A session starts open
//! and unpaid; [`SandboxGateway::complete`] marks it paid and yields the
//! `payment_intent.succeeded` event Stripe would deliver.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::stripe::normalize_session;
use super::{
    CheckoutRequest, CreatedCheckout, GatewayError, GatewayKind, NormalizedCheckoutSession,
    PaymentGateway,
};

/// Prefix of sandbox session ids.
pub const SESSION_PREFIX: &str = "sbx_";

/// Metadata key linking a sandbox payment intent to its session.
pub const SESSION_METADATA_KEY: &str = "checkout_session_id";

/// In-memory checkout gateway.
#[derive(Debug, Default)]
pub struct SandboxGateway {
    sessions: RwLock<HashMap<String, Value>>,
}

impl SandboxGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a session paid and return the matching `payment_intent.succeeded`
    /// event body. `None` if the session does not exist.
    pub async fn complete(&self, session_id: &str) -> Option<Value> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id)?;
        session["status"] = json!("complete");
        session["payment_status"] = json!("paid");

        let mut metadata = session.get("metadata").cloned().unwrap_or_else(|| json!({}));
        if let Some(map) = metadata.as_object_mut() {
            map.insert(SESSION_METADATA_KEY.to_string(), json!(session_id));
        }
        let amount = session.get("amount_total").cloned().unwrap_or(json!(0));

        Some(json!({
            "id": format!("evt_{}", Uuid::new_v4().simple()),
            "object": "event",
            "type": "payment_intent.succeeded",
            "data": {
                "object": {
                    "id": session.get("payment_intent").cloned().unwrap_or(Value::Null),
                    "object": "payment_intent",
                    "amount": amount,
                    "amount_received": amount,
                    "currency": session.get("currency").cloned().unwrap_or(json!("eur")),
                    "receipt_email": session.get("customer_email").cloned().unwrap_or(Value::Null),
                    "metadata": metadata,
                    "status": "succeeded"
                }
            }
        }))
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Sandbox
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CreatedCheckout, GatewayError> {
        let token = Uuid::new_v4().simple().to_string();
        let session_id = format!("{SESSION_PREFIX}{token}");
        let separator = if request.success_url.contains('?') { '&' } else { '?' };
        let url = format!("{}{separator}session_id={session_id}", request.success_url);
        let amount_total: i64 = request
            .line_items
            .iter()
            .map(booking_bridge_core::QuoteLine::amount_cents)
            .sum();

        let raw = json!({
            "id": session_id,
            "object": "checkout.session",
            "status": "open",
            "payment_status": "unpaid",
            "amount_total": amount_total,
            "currency": request.currency.to_lowercase(),
            "customer_email": request.customer_email,
            "client_reference_id": request.order_number,
            "payment_intent": format!("pi_sbx_{token}"),
            "metadata": request.metadata,
            "url": url,
        });
        self.sessions.write().await.insert(session_id.clone(), raw);
        tracing::info!(session_id = %session_id, "Created sandbox checkout session");

        Ok(CreatedCheckout { session_id, url })
    }

    async fn get_checkout_session(&self, session_id: &str) -> Result<Value, GatewayError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(session_id.to_string()))
    }

    fn normalize_checkout_session(
        &self,
        raw: &Value,
    ) -> Result<NormalizedCheckoutSession, GatewayError> {
        normalize_session(raw, GatewayKind::Sandbox)
    }

    async fn find_session_id(&self, payment_intent_id: &str) -> Result<Option<String>, GatewayError> {
        Ok(self
            .sessions
            .read()
            .await
            .iter()
            .find(|(_, raw)| raw.get("payment_intent").and_then(Value::as_str) == Some(payment_intent_id))
            .map(|(id, _)| id.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use booking_bridge_core::{CheckoutStatus, QuoteLine};
    use rust_decimal::Decimal;

    use super::*;

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            order_number: "BK-20260701-AB12CD".to_string(),
            currency: "EUR".to_string(),
            line_items: vec![QuoteLine {
                label: "Adult".to_string(),
                unit_amount_cents: 5000,
                quantity: 2,
            }],
            customer_email: "mario@example.com".to_string(),
            success_url: "https://example.com/ok?step=done".to_string(),
            cancel_url: "https://example.com/ko".to_string(),
            metadata: BTreeMap::from([("order_number".to_string(), "BK-20260701-AB12CD".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let gateway = SandboxGateway::new();
        let created = gateway.create_checkout_session(&request()).await.unwrap();
        assert!(created.session_id.starts_with(SESSION_PREFIX));
        assert!(created.url.contains("?step=done&session_id=sbx_"));

        let open = gateway.fetch_checkout_session(&created.session_id).await.unwrap();
        assert_eq!(open.status, CheckoutStatus::Pending);
        assert_eq!(open.amount, Some(Decimal::new(100, 0)));
        assert_eq!(open.currency.as_deref(), Some("EUR"));
        assert_eq!(open.gateway, GatewayKind::Sandbox);

        let event = gateway.complete(&created.session_id).await.unwrap();
        assert_eq!(event["type"], json!("payment_intent.succeeded"));
        assert_eq!(
            event["data"]["object"]["metadata"][SESSION_METADATA_KEY],
            json!(created.session_id)
        );

        let paid = gateway.fetch_checkout_session(&created.session_id).await.unwrap();
        assert_eq!(paid.status, CheckoutStatus::Paid);
        let pi = paid.payment_intent_id.unwrap();
        assert_eq!(
            gateway.find_session_id(&pi).await.unwrap(),
            Some(created.session_id)
        );
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let gateway = SandboxGateway::new();
        assert!(matches!(
            gateway.get_checkout_session("sbx_missing").await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(gateway.complete("sbx_missing").await.is_none());
    }
}

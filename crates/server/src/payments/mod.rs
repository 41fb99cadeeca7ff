//! Payment gateway abstraction.
//!
//! Gateways create hosted checkout sessions and project their own session
//! payloads into a [`NormalizedCheckoutSession`]. The webhook orchestrator
//! only ever looks at the normalized shape.
//!
//! # Selection
//!
//! [`Gateways::select`] picks, in order: the explicitly requested gateway,
//! the gateway owning the session id prefix (`cs_` Stripe, `sbx_` sandbox),
//! then the configured default.

pub mod sandbox;
pub mod stripe;

pub use sandbox::SandboxGateway;
pub use stripe::{
    PaymentIntent, SignatureError, StripeEvent, StripeGateway, WebhookVerifier, sign_payload,
};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use booking_bridge_core::{CheckoutStatus, QuoteLine};

/// Errors that can occur when talking to a payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Gateway rejected the request.
    #[error("Gateway API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the gateway.
        message: String,
    },

    /// Session does not exist.
    #[error("Checkout session not found: {0}")]
    NotFound(String),

    /// Payload did not have the expected shape.
    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),

    /// No gateway of this kind is registered.
    #[error("Gateway not configured: {0}")]
    NotConfigured(GatewayKind),
}

/// Supported gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    Stripe,
    /// In-process gateway for local development and tests.
    Sandbox,
}

impl GatewayKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Sandbox => "sandbox",
        }
    }

    /// Gateway owning a session id, judged by its prefix.
    #[must_use]
    pub fn from_session_id(session_id: &str) -> Option<Self> {
        if session_id.starts_with("cs_") {
            Some(Self::Stripe)
        } else if session_id.starts_with(sandbox::SESSION_PREFIX) {
            Some(Self::Sandbox)
        } else {
            None
        }
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GatewayKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Ok(Self::Stripe),
            "sandbox" => Ok(Self::Sandbox),
            other => Err(format!("unknown payment gateway: {other}")),
        }
    }
}

/// Customer identity captured by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerIdentity {
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

/// Gateway-agnostic view of a checkout session. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedCheckoutSession {
    pub id: String,
    pub gateway: GatewayKind,
    pub status: CheckoutStatus,
    /// Total in major units.
    pub amount: Option<Decimal>,
    /// Upper-case ISO currency.
    pub currency: Option<String>,
    pub customer: CustomerIdentity,
    pub payment_intent_id: Option<String>,
    pub metadata: HashMap<String, String>,
    /// Answers to custom checkout fields, by key.
    pub custom_fields: HashMap<String, String>,
}

/// A hosted checkout to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    /// Booking order number, also the client reference.
    pub order_number: String,
    /// Lowercase ISO currency.
    pub currency: String,
    pub line_items: Vec<QuoteLine>,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Copied to both the session and its payment intent.
    pub metadata: BTreeMap<String, String>,
}

/// A created hosted checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedCheckout {
    pub session_id: String,
    pub url: String,
}

/// A payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Which gateway this is.
    fn kind(&self) -> GatewayKind;

    /// Create a hosted checkout session.
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CreatedCheckout, GatewayError>;

    /// Raw session payload as the gateway returns it.
    async fn get_checkout_session(&self, session_id: &str) -> Result<Value, GatewayError>;

    /// Project a raw payload into the gateway-agnostic shape.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::InvalidResponse` when the payload has no id.
    fn normalize_checkout_session(&self, raw: &Value)
    -> Result<NormalizedCheckoutSession, GatewayError>;

    /// Checkout session that produced a payment intent, when the gateway can
    /// look it up.
    async fn find_session_id(&self, _payment_intent_id: &str) -> Result<Option<String>, GatewayError> {
        Ok(None)
    }

    /// Fetch and normalize in one step.
    async fn fetch_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<NormalizedCheckoutSession, GatewayError> {
        let raw = self.get_checkout_session(session_id).await?;
        self.normalize_checkout_session(&raw)
    }
}

/// Registered gateways and the default choice.
#[derive(Clone)]
pub struct Gateways {
    default: GatewayKind,
    registered: HashMap<GatewayKind, Arc<dyn PaymentGateway>>,
}

impl std::fmt::Debug for Gateways {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateways")
            .field("default", &self.default)
            .field("registered", &self.registered.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Gateways {
    #[must_use]
    pub fn new(default: GatewayKind) -> Self {
        Self {
            default,
            registered: HashMap::new(),
        }
    }

    /// Register a gateway, replacing any of the same kind.
    #[must_use]
    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.registered.insert(gateway.kind(), gateway);
        self
    }

    /// The configured default gateway kind.
    #[must_use]
    pub const fn default_kind(&self) -> GatewayKind {
        self.default
    }

    /// Pick a gateway: explicit choice, session id prefix, then default.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotConfigured` if the chosen kind is not registered.
    pub fn select(
        &self,
        explicit: Option<GatewayKind>,
        session_id: Option<&str>,
    ) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        let kind = explicit
            .or_else(|| session_id.and_then(GatewayKind::from_session_id))
            .unwrap_or(self.default);
        self.registered
            .get(&kind)
            .cloned()
            .ok_or(GatewayError::NotConfigured(kind))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gateways() -> Gateways {
        Gateways::new(GatewayKind::Stripe)
            .with(Arc::new(SandboxGateway::new()))
    }

    #[test]
    fn test_kind_from_session_prefix() {
        assert_eq!(GatewayKind::from_session_id("cs_test_a1b2"), Some(GatewayKind::Stripe));
        assert_eq!(GatewayKind::from_session_id("sbx_1234"), Some(GatewayKind::Sandbox));
        assert_eq!(GatewayKind::from_session_id("pi_1234"), None);
    }

    #[test]
    fn test_select_prefers_explicit_then_prefix() {
        let gateways = gateways();
        assert_eq!(
            gateways.select(Some(GatewayKind::Sandbox), Some("cs_test")).unwrap().kind(),
            GatewayKind::Sandbox
        );
        assert_eq!(
            gateways.select(None, Some("sbx_abc")).unwrap().kind(),
            GatewayKind::Sandbox
        );
    }

    #[test]
    fn test_select_default_not_registered() {
        let gateways = gateways();
        assert!(matches!(
            gateways.select(None, Some("unknown")),
            Err(GatewayError::NotConfigured(GatewayKind::Stripe))
        ));
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("Stripe".parse::<GatewayKind>().unwrap(), GatewayKind::Stripe);
        assert!("paypal".parse::<GatewayKind>().is_err());
    }
}

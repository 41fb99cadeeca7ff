//! Application state shared across handlers.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;

use crate::config::{BridgeConfig, RateLimitConfig};
use crate::db::{BookingStore, PgBookingStore};
use crate::middleware::RateLimiter;
use crate::odoo::{OdooClient, OdooError, OdooRpc};
use crate::payments::{
    GatewayError, GatewayKind, Gateways, SandboxGateway, StripeGateway, WebhookVerifier,
};
use crate::reconcile::ReconcileSettings;
use crate::services::{
    CheckoutService, EmailNotifier, LogNotifier, Notifier, SyncService, WebhookOrchestrator,
};

/// Error building the application state from configuration.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("odoo client: {0}")]
    Odoo(#[from] OdooError),
    #[error("payment gateway: {0}")]
    Gateway(#[from] GatewayError),
    #[error("smtp transport: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Collaborators the state is assembled from.
pub struct StateParts {
    pub store: Arc<dyn BookingStore>,
    pub odoo: Arc<dyn OdooRpc>,
    pub gateways: Gateways,
    pub notifier: Arc<dyn Notifier>,
    pub settings: ReconcileSettings,
    pub webhook_secret: SecretString,
    pub sync_api_token: Option<SecretString>,
    pub checkout_rate_limit: RateLimitConfig,
}

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn BookingStore>,
    orchestrator: WebhookOrchestrator,
    checkout: CheckoutService,
    sync: SyncService,
    rate_limiter: RateLimiter,
    verifier: WebhookVerifier,
    sync_api_token: Option<SecretString>,
}

impl AppState {
    /// Assemble the state from already-built collaborators.
    #[must_use]
    pub fn new(parts: StateParts) -> Self {
        let orchestrator = WebhookOrchestrator::new(
            parts.odoo.clone(),
            parts.store.clone(),
            parts.gateways.clone(),
            parts.notifier,
            parts.settings.clone(),
        );
        let checkout = CheckoutService::new(
            parts.store.clone(),
            parts.gateways,
            parts.settings.default_country.clone(),
        );
        let sync = SyncService::new(parts.odoo, parts.store.clone(), parts.settings);

        Self {
            inner: Arc::new(AppStateInner {
                store: parts.store,
                orchestrator,
                checkout,
                sync,
                rate_limiter: RateLimiter::new(&parts.checkout_rate_limit),
                verifier: WebhookVerifier::new(parts.webhook_secret),
                sync_api_token: parts.sync_api_token,
            }),
        }
    }

    /// Build the production state: Postgres store, Odoo client, Stripe and
    /// SMTP when configured.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if a client cannot be constructed.
    pub fn from_config(config: &BridgeConfig, pool: PgPool) -> Result<Self, StateError> {
        let odoo = OdooClient::new(&config.odoo)?;
        let store = PgBookingStore::new(pool);

        let mut gateways = Gateways::new(config.default_gateway)
            .with(Arc::new(StripeGateway::new(&config.stripe)?));
        if config.default_gateway == GatewayKind::Sandbox {
            tracing::warn!("Sandbox payment gateway enabled");
            gateways = gateways.with(Arc::new(SandboxGateway::new()));
        }

        let notifier: Arc<dyn Notifier> = match &config.email {
            Some(email) => Arc::new(EmailNotifier::new(email)?),
            None => {
                tracing::info!("SMTP not configured, confirmations are logged only");
                Arc::new(LogNotifier)
            }
        };

        Ok(Self::new(StateParts {
            store: Arc::new(store),
            odoo: Arc::new(odoo),
            gateways,
            notifier,
            settings: config.reconcile.clone(),
            webhook_secret: config.stripe.webhook_secret.clone(),
            sync_api_token: config.sync_api_token.clone(),
            checkout_rate_limit: config.checkout_rate_limit,
        }))
    }

    #[must_use]
    pub fn store(&self) -> &dyn BookingStore {
        self.inner.store.as_ref()
    }

    #[must_use]
    pub fn orchestrator(&self) -> &WebhookOrchestrator {
        &self.inner.orchestrator
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }

    #[must_use]
    pub fn sync(&self) -> &SyncService {
        &self.inner.sync
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.rate_limiter
    }

    #[must_use]
    pub fn verifier(&self) -> &WebhookVerifier {
        &self.inner.verifier
    }

    /// Whether `token` matches the configured sync token. `None` when the
    /// sync endpoints are disabled.
    #[must_use]
    pub fn check_sync_token(&self, token: &str) -> Option<bool> {
        self.inner
            .sync_api_token
            .as_ref()
            .map(|expected| constant_time_eq(expected.expose_secret(), token))
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

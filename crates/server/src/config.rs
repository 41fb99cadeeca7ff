//! Bridge configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL` - `PostgreSQL` connection string for the booking store
//! - `ODOO_URL` - Odoo base URL (e.g., <https://erp.example.com>)
//! - `ODOO_DB` - Odoo database name
//! - `ODOO_USERNAME` - Odoo login of the integration user
//! - `ODOO_API_KEY` - Odoo API key of the integration user
//! - `STRIPE_SECRET_KEY` - Stripe secret API key
//! - `STRIPE_WEBHOOK_SECRET` - Stripe webhook signing secret (`whsec_...`)
//!
//! ## Optional
//! - `BRIDGE_HOST` - Bind address (default: 127.0.0.1)
//! - `BRIDGE_PORT` - Listen port (default: 3000)
//! - `PAYMENT_GATEWAY` - Default gateway, `stripe` or `sandbox` (default: stripe)
//! - `ODOO_DEFAULT_COUNTRY` - Fallback partner country code (default: IT)
//! - `ODOO_SALE_TAX_RATE` - Sale tax rate as a fraction (default: 0.22)
//! - `ODOO_SALE_TAX_ID` - `account.tax` id applied to sale order lines
//! - `ODOO_PURCHASE_TAX_ID` - `account.tax` id applied to purchase order lines
//! - `SYNC_API_TOKEN` - Bearer token for the `/api/odoo/*` sync endpoints
//! - `CHECKOUT_RATE_LIMIT` - Checkout attempts per window per client (default: 10)
//! - `CHECKOUT_RATE_WINDOW_SECS` - Rate-limit window length (default: 60)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`, `SENTRY_TRACES_SAMPLE_RATE`
//!
//! ## Optional (SMTP - enables confirmation emails)
//! - `SMTP_HOST`, `SMTP_PORT` (default: 587), `SMTP_USERNAME`, `SMTP_PASSWORD`, `SMTP_FROM`

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;

use booking_bridge_core::TaxId;

use crate::payments::GatewayKind;
use crate::reconcile::ReconcileSettings;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Bridge application configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Odoo connection
    pub odoo: OdooConfig,
    /// Country, tax and pricing settings used by the reconcilers
    pub reconcile: ReconcileSettings,
    /// Stripe credentials
    pub stripe: StripeConfig,
    /// Gateway used when a session id carries no recognizable prefix
    pub default_gateway: GatewayKind,
    /// Bearer token for the sync endpoints (disabled when unset)
    pub sync_api_token: Option<SecretString>,
    /// Checkout rate limiting
    pub checkout_rate_limit: RateLimitConfig,
    /// SMTP configuration (optional - log-only confirmations when unset)
    pub email: Option<EmailConfig>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
}

/// Odoo JSON-RPC connection settings.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct OdooConfig {
    /// Base URL without the `/jsonrpc` suffix
    pub url: String,
    /// Database name
    pub db: String,
    /// Login of the integration user
    pub username: String,
    /// API key of the integration user
    pub api_key: SecretString,
}

impl std::fmt::Debug for OdooConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OdooConfig")
            .field("url", &self.url)
            .field("db", &self.db)
            .field("username", &self.username)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Stripe API configuration.
///
/// Implements `Debug` manually to redact both secrets.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (`sk_...`)
    pub secret_key: SecretString,
    /// Webhook signing secret (`whsec_...`)
    pub webhook_secret: SecretString,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .finish()
    }
}

/// Fixed-window rate limit settings.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub max_requests: u32,
    /// Window length
    pub window: Duration,
}

/// Email (SMTP) configuration.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct EmailConfig {
    /// SMTP server hostname
    pub smtp_host: String,
    /// SMTP server port
    pub smtp_port: u16,
    /// SMTP authentication username
    pub smtp_username: String,
    /// SMTP authentication password
    pub smtp_password: SecretString,
    /// Email sender address (From header)
    pub from_address: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_required_secret("DATABASE_URL")?;
        let host = parse_env("BRIDGE_HOST", "127.0.0.1")?;
        let port = parse_env("BRIDGE_PORT", "3000")?;
        let default_gateway = parse_env("PAYMENT_GATEWAY", "stripe")?;

        let odoo = OdooConfig::from_env()?;
        let reconcile = reconcile_from_env()?;
        let stripe = StripeConfig::from_env()?;
        let sync_api_token = get_optional_env("SYNC_API_TOKEN")
            .map(|token| {
                validate_secret_strength(&token, "SYNC_API_TOKEN")?;
                Ok::<_, ConfigError>(SecretString::from(token))
            })
            .transpose()?;
        let checkout_rate_limit = RateLimitConfig {
            max_requests: parse_env("CHECKOUT_RATE_LIMIT", "10")?,
            window: Duration::from_secs(parse_env("CHECKOUT_RATE_WINDOW_SECS", "60")?),
        };
        let email = EmailConfig::from_env()?;

        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.1);

        Ok(Self {
            database_url,
            host,
            port,
            odoo,
            reconcile,
            stripe,
            default_gateway,
            sync_api_token,
            checkout_rate_limit,
            email,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl OdooConfig {
    /// Load the `ODOO_*` variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is missing or the URL is not http(s).
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = get_required_env("ODOO_URL")?;
        let parsed = url::Url::parse(&url)
            .map_err(|e| ConfigError::InvalidEnvVar("ODOO_URL".to_string(), e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEnvVar(
                "ODOO_URL".to_string(),
                "must be an http(s) URL".to_string(),
            ));
        }

        Ok(Self {
            url,
            db: get_required_env("ODOO_DB")?,
            username: get_required_env("ODOO_USERNAME")?,
            api_key: get_validated_secret("ODOO_API_KEY")?,
        })
    }
}

impl StripeConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            secret_key: get_validated_secret("STRIPE_SECRET_KEY")?,
            webhook_secret: get_validated_secret("STRIPE_WEBHOOK_SECRET")?,
        })
    }
}

impl EmailConfig {
    /// Returns `None` when `SMTP_HOST` is unset; the remaining SMTP variables
    /// are then required.
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(smtp_host) = get_optional_env("SMTP_HOST") else {
            return Ok(None);
        };

        Ok(Some(Self {
            smtp_host,
            smtp_port: parse_env("SMTP_PORT", "587")?,
            smtp_username: get_required_env("SMTP_USERNAME")?,
            smtp_password: get_required_secret("SMTP_PASSWORD")?,
            from_address: get_required_env("SMTP_FROM")?,
        }))
    }
}

/// Configuration the CLI jobs need: the booking store and Odoo, without
/// Stripe or SMTP.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub database_url: SecretString,
    pub odoo: OdooConfig,
    pub reconcile: ReconcileSettings,
}

impl JobConfig {
    /// Load from environment variables, reading `.env` when present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Ok(Self {
            database_url: get_required_secret("DATABASE_URL")?,
            odoo: OdooConfig::from_env()?,
            reconcile: reconcile_from_env()?,
        })
    }
}

/// Read `DATABASE_URL`, loading `.env` when present.
///
/// # Errors
///
/// Returns `ConfigError::MissingEnvVar` if it is unset.
pub fn database_url_from_env() -> Result<SecretString, ConfigError> {
    let _ = dotenvy::dotenv();
    get_required_secret("DATABASE_URL")
}

fn reconcile_from_env() -> Result<ReconcileSettings, ConfigError> {
    let default_country = get_env_or_default("ODOO_DEFAULT_COUNTRY", "IT").to_ascii_uppercase();
    if default_country.len() != 2 || !default_country.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ConfigError::InvalidEnvVar(
            "ODOO_DEFAULT_COUNTRY".to_string(),
            "must be a two-letter country code".to_string(),
        ));
    }

    let sale_tax_rate: Decimal = parse_env("ODOO_SALE_TAX_RATE", "0.22")?;
    if sale_tax_rate.is_sign_negative() || sale_tax_rate >= Decimal::ONE {
        return Err(ConfigError::InvalidEnvVar(
            "ODOO_SALE_TAX_RATE".to_string(),
            "must be a fraction in [0, 1)".to_string(),
        ));
    }

    Ok(ReconcileSettings {
        default_country,
        sale_tax_rate,
        sale_tax_id: parse_optional_env::<i64>("ODOO_SALE_TAX_ID")?.map(TaxId::new),
        purchase_tax_id: parse_optional_env::<i64>("ODOO_PURCHASE_TAX_ID")?.map(TaxId::new),
    })
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get an optional environment variable, treating empty values as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable, falling back to `default`.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse an optional environment variable.
fn parse_optional_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
        })
        .transpose()
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use the key issued by the provider."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

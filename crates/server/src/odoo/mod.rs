//! Odoo JSON-RPC integration.
//!
//! # Architecture
//!
//! - [`OdooRpc`] is the seam every resolver talks through; it has a single
//!   required method (`execute_kw`) and typed helpers on top
//! - [`OdooClient`] is the production transport over `POST {url}/jsonrpc`,
//!   caching the `common.login` uid for one hour
//! - [`fallback`] implements the rich-write / minimal-retry negotiation used
//!   when a database lacks the bridge's custom `x_*` fields
//!
//! Errors carry the upstream exception name and message so callers can
//! classify them (schema drift, state, access, transient) without string
//! matching of their own.

pub mod auth;
pub mod client;
pub mod fallback;
pub mod rpc;

pub use client::OdooClient;
pub use fallback::{CreateOutcome, Reattach, WriteOutcome, create_with_fallback, write_with_fallback};
pub use rpc::{OdooRpc, Record, Values, many2one_id, record_id, record_str};

use thiserror::Error;

/// Markers Odoo uses when a field is missing from the model.
const SCHEMA_DRIFT_MARKERS: &[&str] = &["invalid field", "unknown field", "does not exist"];

/// Markers for state-machine rejections (e.g. confirming a confirmed order).
const STATE_MARKERS: &[&str] = &[
    "already confirmed",
    "not allowed to confirm",
    "following states",
    "already in state",
];

/// Errors that can occur when talking to Odoo.
#[derive(Debug, Error)]
pub enum OdooError {
    /// HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Odoo answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// Odoo returned a JSON-RPC error envelope.
    #[error("Odoo RPC error {code} ({}): {message}", .exception.as_deref().unwrap_or("unknown"))]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Detailed message (`error.data.message`, else `error.message`).
        message: String,
        /// Fully-qualified exception name (`error.data.name`).
        exception: Option<String>,
    },

    /// `common.login` returned `false`.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Response body did not match the JSON-RPC envelope.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Coarse classification of an [`OdooError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A written, searched, or read field does not exist on the model.
    SchemaDrift,
    /// The record is in a state that rejects the operation.
    State,
    /// Credentials rejected or insufficient rights.
    Access,
    /// Network failures, timeouts, 429 and 5xx responses.
    Transient,
    /// Anything else (validation errors, missing records).
    Other,
}

impl OdooError {
    /// Build an RPC error; used by the transport and the in-memory fake.
    #[must_use]
    pub fn rpc(code: i64, message: impl Into<String>, exception: Option<&str>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            exception: exception.map(String::from),
        }
    }

    /// Classify the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                ErrorKind::Transient
            }
            Self::Http(_) | Self::UnexpectedResponse(_) => ErrorKind::Other,
            Self::Status { status, .. } => match status {
                401 | 403 => ErrorKind::Access,
                429 | 500..=599 => ErrorKind::Transient,
                _ => ErrorKind::Other,
            },
            Self::AuthenticationFailed(_) => ErrorKind::Access,
            Self::Rpc {
                message, exception, ..
            } => {
                let lower = message.to_lowercase();
                let exception = exception.as_deref().unwrap_or_default();
                if SCHEMA_DRIFT_MARKERS.iter().any(|m| lower.contains(m)) {
                    ErrorKind::SchemaDrift
                } else if exception.contains("AccessDenied")
                    || exception.contains("AccessError")
                    || lower.contains("access denied")
                    || lower.contains("session expired")
                {
                    ErrorKind::Access
                } else if STATE_MARKERS.iter().any(|m| lower.contains(m)) {
                    ErrorKind::State
                } else {
                    ErrorKind::Other
                }
            }
        }
    }

    /// The model lacks a field used by the request.
    #[must_use]
    pub fn is_schema_drift(&self) -> bool {
        self.kind() == ErrorKind::SchemaDrift
    }

    /// The record's state rejected the operation.
    #[must_use]
    pub fn is_state_error(&self) -> bool {
        self.kind() == ErrorKind::State
    }

    /// Credentials rejected; the cached session should be dropped.
    #[must_use]
    pub fn is_access_error(&self) -> bool {
        self.kind() == ErrorKind::Access
    }

    /// Name of the missing field, when the message identifies one.
    ///
    /// Understands `Invalid field 'x' on model 'y'`, `Invalid field x on
    /// model y`, `Unknown field "x"` and `Field x does not exist`.
    #[must_use]
    pub fn unknown_field(&self) -> Option<String> {
        let Self::Rpc { message, .. } = self else {
            return None;
        };
        let lower = message.to_lowercase();

        for marker in ["invalid field", "unknown field"] {
            if let Some(pos) = lower.find(marker) {
                let rest = message.get(pos + marker.len()..)?;
                return first_identifier(rest);
            }
        }

        let pos = lower.find("does not exist")?;
        let before = message.get(..pos)?;
        let field_pos = before.to_lowercase().rfind("field")?;
        first_identifier(before.get(field_pos + "field".len()..)?)
    }
}

/// First field-like token, with quotes and punctuation stripped.
fn first_identifier(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|token| {
            token.trim_matches(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
        })
        .find(|token| !token.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_error(message: &str) -> OdooError {
        OdooError::rpc(200, message, Some("builtins.ValueError"))
    }

    #[test]
    fn test_schema_drift_detection() {
        assert!(value_error("Invalid field 'x_stripe_payment_id' on model 'sale.order'").is_schema_drift());
        assert!(value_error("Unknown field \"x_fiscal_code\"").is_schema_drift());
        assert!(value_error("Field x_booking_product_id does not exist").is_schema_drift());
        assert!(!value_error("Record does not validate").is_schema_drift());
    }

    #[test]
    fn test_unknown_field_extraction() {
        let cases = [
            ("Invalid field 'x_stripe_payment_id' on model 'sale.order'", "x_stripe_payment_id"),
            ("Invalid field x_address on model res.partner", "x_address"),
            ("Unknown field \"x_fiscal_code\"", "x_fiscal_code"),
            ("Field x_booking_product_id does not exist", "x_booking_product_id"),
            ("ValueError: Invalid field 'sale_line_id' in leaf", "sale_line_id"),
        ];
        for (message, field) in cases {
            assert_eq!(value_error(message).unknown_field().as_deref(), Some(field), "{message}");
        }
        assert_eq!(value_error("Something else").unknown_field(), None);
    }

    #[test]
    fn test_state_and_access_classification() {
        let confirmed = OdooError::rpc(
            200,
            "It is not allowed to confirm an order in the following states: Sales Order",
            Some("odoo.exceptions.UserError"),
        );
        assert_eq!(confirmed.kind(), ErrorKind::State);

        let denied = OdooError::rpc(200, "Access Denied", Some("odoo.exceptions.AccessDenied"));
        assert!(denied.is_access_error());
        assert!(OdooError::AuthenticationFailed("bad key".into()).is_access_error());
    }

    #[test]
    fn test_status_classification() {
        let gateway = OdooError::Status {
            status: 502,
            body: String::new(),
        };
        assert_eq!(gateway.kind(), ErrorKind::Transient);
        let forbidden = OdooError::Status {
            status: 403,
            body: String::new(),
        };
        assert_eq!(forbidden.kind(), ErrorKind::Access);
    }

    #[test]
    fn test_error_display_includes_exception() {
        let err = value_error("Invalid field 'x' on model 'y'");
        assert_eq!(
            err.to_string(),
            "Odoo RPC error 200 (builtins.ValueError): Invalid field 'x' on model 'y'"
        );
    }
}

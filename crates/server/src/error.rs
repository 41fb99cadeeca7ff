//! Unified error handling with Sentry integration.
//!
//! Handlers return `Result<T, AppError>`. Server-side failures are captured
//! to Sentry before the response is built, and their details never reach
//! the client.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::payments::GatewayError;
use crate::services::{CheckoutError, SyncError};

/// Application-level error type for the bridge.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Checkout could not be created.
    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// A sync run could not start.
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or wrong credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Rate limited.
    #[error("Rate limited")]
    RateLimited,

    /// Endpoint switched off by configuration.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Checkout(err) => match err {
                CheckoutError::Validation(_) | CheckoutError::Pricing(_) => {
                    StatusCode::BAD_REQUEST
                }
                CheckoutError::NotFound(_) => StatusCode::NOT_FOUND,
                CheckoutError::SlotUnavailable { .. } => StatusCode::CONFLICT,
                CheckoutError::Gateway(GatewayError::NotConfigured(_)) => StatusCode::BAD_REQUEST,
                CheckoutError::Gateway(_) => StatusCode::BAD_GATEWAY,
                CheckoutError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Sync(err) => match err {
                SyncError::ProductNotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Message safe to show the client.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Checkout(CheckoutError::Gateway(GatewayError::NotConfigured(kind))) => {
                format!("Payment gateway not available: {kind}")
            }
            Self::Checkout(CheckoutError::Gateway(_)) => "Payment service error".to_string(),
            Self::Checkout(CheckoutError::Store(_)) => "Internal server error".to_string(),
            Self::Checkout(err) => err.to_string(),
            Self::Sync(SyncError::ProductNotFound(id)) => format!("Product not found: {id}"),
            Self::Sync(_) => "Sync failed".to_string(),
            Self::RateLimited => "Too many requests, please try again later".to_string(),
            _ => self.to_string(),
        }
    }

    /// Report server-side failures to Sentry.
    fn capture(&self) {
        if self.status().is_server_error() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }
    }

    /// Response body `{error, requestId}` for endpoints that echo the request id.
    #[must_use]
    pub fn into_response_with_request_id(self, request_id: &str) -> Response {
        self.capture();
        let body = json!({
            "error": self.public_message(),
            "requestId": request_id,
        });
        (self.status(), Json(body)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.capture();
        let body = json!({ "error": self.public_message() });
        (self.status(), Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::GatewayKind;

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("product-123".to_string());
        assert_eq!(err.to_string(), "Not found: product-123");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        fn get_status(err: AppError) -> StatusCode {
            err.into_response().status()
        }

        assert_eq!(
            get_status(AppError::Unauthorized("test".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(get_status(AppError::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            get_status(CheckoutError::Validation("guests must be at least 1".to_string()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(CheckoutError::SlotUnavailable { remaining: 1 }.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(CheckoutError::NotFound("product").into()),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = AppError::Database(RepositoryError::DataCorruption("bad row 42".to_string()));
        assert_eq!(err.public_message(), "Internal server error");

        let err: AppError = CheckoutError::Gateway(GatewayError::Api {
            status: 401,
            message: "Invalid API Key provided: sk_live_***".to_string(),
        })
        .into();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.public_message(), "Payment service error");

        let err: AppError =
            CheckoutError::Gateway(GatewayError::NotConfigured(GatewayKind::Sandbox)).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}

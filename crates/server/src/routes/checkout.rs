//! Checkout creation.

use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::middleware::{RequestId, client_ip};
use crate::services::CheckoutPayload;
use crate::state::AppState;

/// Open a hosted checkout for a booking.
///
/// POST /api/checkout
///
/// Failures answer `{error, requestId}`.
pub async fn create(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    payload: Result<Json<CheckoutPayload>, JsonRejection>,
) -> Response {
    let client = client_ip(&headers).map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
    if !state.rate_limiter().check(&client).await {
        tracing::warn!(client = %client, "Checkout rate limit exceeded");
        return AppError::RateLimited.into_response_with_request_id(&request_id);
    }

    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return AppError::BadRequest(rejection.body_text())
                .into_response_with_request_id(&request_id);
        }
    };

    match state.checkout().create(&payload).await {
        Ok(created) => Json(created).into_response(),
        Err(e) => {
            tracing::info!(request_id = %request_id, error = %e, "Checkout rejected");
            AppError::from(e).into_response_with_request_id(&request_id)
        }
    }
}

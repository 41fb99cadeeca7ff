//! HTTP middleware and request helpers.

pub mod rate_limit;
pub mod request_id;

pub use rate_limit::{RateLimiter, client_ip};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};

//! Fixed-window rate limiting for checkout creation.
//!
//! Counters live in a `moka` cache whose entries expire one window after
//! they are created, so each client gets `max_requests` per window. The
//! limiter is in-process and advisory: restarts and multiple instances each
//! start from zero.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use axum::http::HeaderMap;
use moka::future::Cache;

use crate::config::RateLimitConfig;

/// Real client IP behind Cloudflare and Fly.io.
///
/// Checks `CF-Connecting-IP`, the first `X-Forwarded-For` hop, `X-Real-IP`
/// and `Fly-Client-IP`, in that order.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    header("cf-connecting-ip")
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            header("x-forwarded-for")
                .and_then(|s| s.split(',').next())
                .and_then(|s| s.trim().parse().ok())
        })
        .or_else(|| header("x-real-ip").and_then(|s| s.trim().parse().ok()))
        .or_else(|| header("fly-client-ip").and_then(|s| s.trim().parse().ok()))
}

/// Per-client fixed-window counter.
#[derive(Clone)]
pub struct RateLimiter {
    counters: Cache<String, Arc<AtomicU32>>,
    max_requests: u32,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_requests", &self.max_requests)
            .field("tracked_clients", &self.counters.entry_count())
            .finish()
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let counters = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(config.window)
            .build();
        Self {
            counters,
            max_requests: config.max_requests,
        }
    }

    /// Count a request from `client`. Returns `false` once the client is over
    /// its allowance for the current window.
    pub async fn check(&self, client: &str) -> bool {
        let counter = self
            .counters
            .get_with(client.to_string(), async { Arc::new(AtomicU32::new(0)) })
            .await;
        let seen = counter.fetch_add(1, Ordering::Relaxed);
        seen < self.max_requests
    }
}

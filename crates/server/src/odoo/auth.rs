//! Odoo session authentication.
//!
//! External API access uses `common.login(db, login, api_key)`, which returns
//! the numeric uid (or `false`). The uid is then passed with the API key on
//! every `object.execute_kw` call.

use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::instrument;

use super::OdooError;
use super::client::post_jsonrpc;

/// How long an authenticated uid is reused before logging in again.
pub const SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// An authenticated Odoo session.
#[derive(Debug, Clone, Copy)]
pub struct OdooSession {
    /// Authenticated user id.
    pub uid: i64,
    /// When `common.login` succeeded.
    pub authenticated_at: Instant,
}

impl OdooSession {
    /// Create a session authenticated now.
    #[must_use]
    pub fn new(uid: i64) -> Self {
        Self {
            uid,
            authenticated_at: Instant::now(),
        }
    }

    /// Whether the session is older than `ttl`.
    #[must_use]
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.authenticated_at.elapsed() >= ttl
    }
}

/// Log in with an API key.
///
/// # Errors
///
/// Returns `OdooError::AuthenticationFailed` if Odoo answers `false`, or the
/// transport error if the request fails.
#[instrument(skip(client, api_key), fields(db = %db, username = %username))]
pub async fn login(
    client: &reqwest::Client,
    endpoint: &str,
    db: &str,
    username: &str,
    api_key: &SecretString,
) -> Result<OdooSession, OdooError> {
    let result = post_jsonrpc(
        client,
        endpoint,
        "common",
        "login",
        vec![json!(db), json!(username), json!(api_key.expose_secret())],
    )
    .await?;

    match result {
        Value::Number(n) => n.as_i64().filter(|uid| *uid > 0).map_or_else(
            || Err(OdooError::AuthenticationFailed(format!("invalid uid {n}"))),
            |uid| {
                tracing::debug!(uid, "Odoo login succeeded");
                Ok(OdooSession::new(uid))
            },
        ),
        Value::Bool(false) | Value::Null => Err(OdooError::AuthenticationFailed(format!(
            "login rejected for {username} on {db}"
        ))),
        other => Err(OdooError::UnexpectedResponse(format!(
            "login returned {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_session_is_not_stale() {
        let session = OdooSession::new(2);
        assert!(!session.is_stale(SESSION_TTL));
    }

    #[test]
    fn test_old_session_is_stale() {
        let Some(two_hours_ago) = Instant::now().checked_sub(Duration::from_secs(7200)) else {
            return;
        };
        let session = OdooSession {
            uid: 2,
            authenticated_at: two_hours_ago,
        };
        assert!(session.is_stale(SESSION_TTL));
    }
}

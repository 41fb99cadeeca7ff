//! Odoo JSON-RPC 2.0 client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;
use tracing::instrument;

use super::auth::{OdooSession, SESSION_TTL, login};
use super::{OdooError, OdooRpc};
use crate::config::OdooConfig;

/// Maximum number of response-body bytes kept in error messages.
const ERROR_BODY_LIMIT: usize = 512;

/// Odoo JSON-RPC client.
///
/// # Authentication
///
/// The uid obtained from `common.login` is cached in memory and reused for
/// one hour. Access errors drop the cached session so the next call logs in
/// again; the failed call itself is not retried.
#[derive(Clone)]
pub struct OdooClient {
    inner: Arc<OdooClientInner>,
}

struct OdooClientInner {
    client: reqwest::Client,
    endpoint: String,
    db: String,
    username: String,
    api_key: SecretString,
    session: RwLock<Option<OdooSession>>,
}

impl std::fmt::Debug for OdooClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OdooClient")
            .field("endpoint", &self.inner.endpoint)
            .field("db", &self.inner.db)
            .field("username", &self.inner.username)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<JsonRpcErrorData>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorData {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl From<JsonRpcError> for OdooError {
    fn from(error: JsonRpcError) -> Self {
        let (exception, detail) = error
            .data
            .map_or((None, None), |data| (data.name, data.message));
        Self::Rpc {
            code: error.code,
            message: detail.filter(|m| !m.is_empty()).unwrap_or(error.message),
            exception,
        }
    }
}

impl OdooClient {
    /// Create a client for the configured database.
    ///
    /// # Errors
    ///
    /// Returns `OdooError::Http` if the HTTP client cannot be built.
    pub fn new(config: &OdooConfig) -> Result<Self, OdooError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            inner: Arc::new(OdooClientInner {
                client,
                endpoint: format!("{}/jsonrpc", config.url.trim_end_matches('/')),
                db: config.db.clone(),
                username: config.username.clone(),
                api_key: config.api_key.clone(),
                session: RwLock::new(None),
            }),
        })
    }

    /// Return the cached uid, logging in when there is none or it is stale.
    ///
    /// # Errors
    ///
    /// Returns `OdooError::AuthenticationFailed` if the credentials are rejected.
    pub async fn authenticate(&self) -> Result<i64, OdooError> {
        if let Some(session) = *self.inner.session.read().await
            && !session.is_stale(SESSION_TTL)
        {
            return Ok(session.uid);
        }

        let mut guard = self.inner.session.write().await;
        // Another task may have logged in while we waited for the lock
        if let Some(session) = *guard
            && !session.is_stale(SESSION_TTL)
        {
            return Ok(session.uid);
        }

        let session = login(
            &self.inner.client,
            &self.inner.endpoint,
            &self.inner.db,
            &self.inner.username,
            &self.inner.api_key,
        )
        .await?;
        *guard = Some(session);
        Ok(session.uid)
    }

    /// Drop the cached session.
    pub async fn clear_session(&self) {
        *self.inner.session.write().await = None;
    }

    /// Server version string from `common.version`.
    ///
    /// # Errors
    ///
    /// Returns `OdooError` if the request fails.
    #[instrument(skip(self))]
    pub async fn server_version(&self) -> Result<String, OdooError> {
        let result = post_jsonrpc(
            &self.inner.client,
            &self.inner.endpoint,
            "common",
            "version",
            Vec::new(),
        )
        .await?;
        Ok(result
            .get("server_version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }
}

#[async_trait]
impl OdooRpc for OdooClient {
    #[instrument(skip(self, args, kwargs), fields(model = %model, method = %method))]
    async fn execute_kw(
        &self,
        model: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, OdooError> {
        let uid = self.authenticate().await?;

        let result = post_jsonrpc(
            &self.inner.client,
            &self.inner.endpoint,
            "object",
            "execute_kw",
            vec![
                json!(self.inner.db),
                json!(uid),
                json!(self.inner.api_key.expose_secret()),
                json!(model),
                json!(method),
                Value::Array(args),
                Value::Object(kwargs),
            ],
        )
        .await;

        if let Err(e) = &result {
            if e.is_access_error() {
                self.clear_session().await;
            }
            tracing::debug!(error = %e, "Odoo call failed");
        }
        result
    }
}

/// POST one JSON-RPC `call` and unwrap the envelope.
pub(super) async fn post_jsonrpc(
    client: &reqwest::Client,
    endpoint: &str,
    service: &str,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, OdooError> {
    static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

    let body = json!({
        "jsonrpc": "2.0",
        "method": "call",
        "params": {
            "service": service,
            "method": method,
            "args": args,
        },
        "id": REQUEST_ID.fetch_add(1, Ordering::Relaxed),
    });

    let response = client.post(endpoint).json(&body).send().await?;
    let status = response.status();

    if !status.is_success() {
        let mut text = response.text().await.unwrap_or_default();
        if let Some((cut, _)) = text.char_indices().nth(ERROR_BODY_LIMIT) {
            text.truncate(cut);
        }
        return Err(OdooError::Status {
            status: status.as_u16(),
            body: text,
        });
    }

    let envelope: JsonRpcResponse = response.json().await?;
    unwrap_envelope(envelope)
}

fn unwrap_envelope(envelope: JsonRpcResponse) -> Result<Value, OdooError> {
    if let Some(error) = envelope.error {
        return Err(error.into());
    }
    envelope
        .result
        .ok_or_else(|| OdooError::UnexpectedResponse("missing result".to_string()))
}

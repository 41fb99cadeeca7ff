//! Odoo connectivity check.
//!
//! # Usage
//!
//! ```bash
//! bb-cli odoo ping
//! ```

use booking_bridge_server::config::OdooConfig;
use booking_bridge_server::odoo::OdooClient;

use super::CommandError;

/// Report the server version and authenticate the integration user.
///
/// # Errors
///
/// Returns `CommandError` if the `ODOO_*` variables are missing, the server
/// is unreachable, or the credentials are rejected.
pub async fn ping() -> Result<(), CommandError> {
    dotenvy::dotenv().ok();
    let config = OdooConfig::from_env()?;
    let client = OdooClient::new(&config)?;

    let version = client.server_version().await?;
    tracing::info!(url = %config.url, version = %version, "Odoo reachable");

    let uid = client.authenticate().await?;
    tracing::info!(db = %config.db, username = %config.username, uid, "Odoo login succeeded");
    Ok(())
}

//! CLI subcommands.

pub mod migrate;
pub mod odoo;
pub mod sync;

use thiserror::Error;

use booking_bridge_server::config::ConfigError;
use booking_bridge_server::odoo::OdooError;
use booking_bridge_server::services::SyncError;

/// Errors a command can end with.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Odoo error: {0}")]
    Odoo(#[from] OdooError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),

    /// The command ran but some items failed.
    #[error("{failed} of {total} items failed")]
    PartialFailure { failed: usize, total: usize },
}

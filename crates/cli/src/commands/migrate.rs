//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! bb-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` - `PostgreSQL` connection string for the booking store
//!
//! # Migration Files
//!
//! `crates/server/migrations/`, embedded at compile time.

use booking_bridge_server::config::database_url_from_env;
use booking_bridge_server::db::create_pool;

use super::CommandError;

/// Run the booking store migrations.
///
/// # Errors
///
/// Returns `CommandError` if `DATABASE_URL` is missing, the database is
/// unreachable, or a migration fails.
pub async fn run() -> Result<(), CommandError> {
    let database_url = database_url_from_env()?;

    tracing::info!("Connecting to booking store...");
    let pool = create_pool(&database_url).await?;

    tracing::info!("Running migrations...");
    sqlx::migrate!("../server/migrations").run(&pool).await?;

    tracing::info!("Migrations complete");
    Ok(())
}

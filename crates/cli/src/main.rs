//! Booking bridge CLI - migrations and Odoo maintenance.
//!
//! # Usage
//!
//! ```bash
//! # Run booking store migrations
//! bb-cli migrate
//!
//! # Push catalog products to Odoo
//! bb-cli sync products [--product-id <uuid>]
//!
//! # Create missing supplier purchase orders
//! bb-cli sync purchase-orders [--product-id <uuid>]
//!
//! # Check Odoo connectivity and credentials
//! bb-cli odoo ping
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use uuid::Uuid;

mod commands;

use commands::CommandError;

#[derive(Parser)]
#[command(name = "bb-cli")]
#[command(author, version, about = "Booking bridge CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Run an Odoo sync job
    Sync {
        #[command(subcommand)]
        job: SyncJob,
    },
    /// Odoo diagnostics
    Odoo {
        #[command(subcommand)]
        action: OdooAction,
    },
}

#[derive(Subcommand)]
enum SyncJob {
    /// Resolve catalog products in Odoo
    Products {
        /// Only this catalog product
        #[arg(long)]
        product_id: Option<Uuid>,
    },
    /// Reconcile purchase orders for bookings missing one
    PurchaseOrders {
        /// Only bookings of this catalog product
        #[arg(long)]
        product_id: Option<Uuid>,
    },
}

#[derive(Subcommand)]
enum OdooAction {
    /// Check the server is reachable and the credentials work
    Ping,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await,
        Commands::Sync { job } => match job {
            SyncJob::Products { product_id } => commands::sync::products(product_id).await,
            SyncJob::PurchaseOrders { product_id } => {
                commands::sync::purchase_orders(product_id).await
            }
        },
        Commands::Odoo { action } => match action {
            OdooAction::Ping => commands::odoo::ping().await,
        },
    }
}

//! Business services behind the HTTP handlers and the CLI.

pub mod checkout;
pub mod metadata;
pub mod notifier;
pub mod sync;
pub mod webhook;

pub use checkout::{CheckoutError, CheckoutPayload, CheckoutResponse, CheckoutService};
pub use metadata::BookingMetadata;
pub use notifier::{BookingConfirmation, EmailNotifier, LogNotifier, NotifyError, Notifier};
pub use sync::{SyncError, SyncFilter, SyncService, SyncSummary};
pub use webhook::{WebhookError, WebhookOrchestrator, WebhookReport};

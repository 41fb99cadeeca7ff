//! Booking confirmation delivery.
//!
//! [`EmailNotifier`] sends a multipart (text + HTML) email over SMTP with
//! Askama templates. [`LogNotifier`] only logs, and is used when SMTP is not
//! configured. Exactly-once delivery is the caller's job: the webhook claims
//! `confirmation_sent_at` before calling [`Notifier::send_booking_confirmation`].

use askama::Template;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Serialize;
use thiserror::Error;

use crate::config::EmailConfig;

/// Everything the confirmation email shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingConfirmation {
    pub order_number: String,
    pub customer_email: String,
    pub customer_name: String,
    pub product_name: String,
    pub booking_date: Option<String>,
    pub time_slot: Option<String>,
    /// Party description such as `2 adults, 1 dog`.
    pub party: String,
    pub total: Decimal,
    pub currency: String,
    pub sale_order_name: Option<String>,
}

impl BookingConfirmation {
    fn subject(&self) -> String {
        format!("Booking confirmed: {} ({})", self.product_name, self.order_number)
    }
}

#[derive(Template)]
#[template(path = "email/booking_confirmation.html")]
struct BookingConfirmationHtml<'a> {
    order_number: &'a str,
    customer_name: &'a str,
    product_name: &'a str,
    booking_date: Option<&'a str>,
    time_slot: Option<&'a str>,
    party: &'a str,
    total: &'a Decimal,
    currency: &'a str,
    sale_order_name: Option<&'a str>,
}

#[derive(Template)]
#[template(path = "email/booking_confirmation.txt")]
struct BookingConfirmationText<'a> {
    order_number: &'a str,
    customer_name: &'a str,
    product_name: &'a str,
    booking_date: Option<&'a str>,
    time_slot: Option<&'a str>,
    party: &'a str,
    total: &'a Decimal,
    currency: &'a str,
    sale_order_name: Option<&'a str>,
}

/// Render the text and HTML bodies.
fn render(confirmation: &BookingConfirmation) -> Result<(String, String), NotifyError> {
    let text = BookingConfirmationText {
        order_number: &confirmation.order_number,
        customer_name: &confirmation.customer_name,
        product_name: &confirmation.product_name,
        booking_date: confirmation.booking_date.as_deref(),
        time_slot: confirmation.time_slot.as_deref(),
        party: &confirmation.party,
        total: &confirmation.total,
        currency: &confirmation.currency,
        sale_order_name: confirmation.sale_order_name.as_deref(),
    }
    .render()?;
    let html = BookingConfirmationHtml {
        order_number: &confirmation.order_number,
        customer_name: &confirmation.customer_name,
        product_name: &confirmation.product_name,
        booking_date: confirmation.booking_date.as_deref(),
        time_slot: confirmation.time_slot.as_deref(),
        party: &confirmation.party,
        total: &confirmation.total,
        currency: &confirmation.currency,
        sale_order_name: confirmation.sale_order_name.as_deref(),
    }
    .render()?;
    Ok((text, html))
}

/// Errors that can occur when sending a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
}

/// Sends booking confirmations.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_booking_confirmation(
        &self,
        confirmation: &BookingConfirmation,
    ) -> Result<(), NotifyError>;
}

/// SMTP notifier.
#[derive(Clone)]
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl EmailNotifier {
    /// Create a notifier from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the SMTP relay cannot be configured.
    pub fn new(config: &EmailConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    #[tracing::instrument(skip(self, confirmation), fields(order_number = %confirmation.order_number))]
    async fn send_booking_confirmation(
        &self,
        confirmation: &BookingConfirmation,
    ) -> Result<(), NotifyError> {
        let (text_body, html_body) = render(confirmation)?;
        let to = &confirmation.customer_email;
        let subject = confirmation.subject();

        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| NotifyError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(to
                .parse()
                .map_err(|_| NotifyError::InvalidAddress(to.clone()))?)
            .subject(&subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )?;

        self.mailer.send(email).await?;

        tracing::info!(to = %to, subject = %subject, "Confirmation email sent");
        Ok(())
    }
}

/// Notifier that only logs. Used when SMTP is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_booking_confirmation(
        &self,
        confirmation: &BookingConfirmation,
    ) -> Result<(), NotifyError> {
        // Render anyway so template errors surface without SMTP
        render(confirmation)?;
        tracing::info!(
            order_number = %confirmation.order_number,
            to = %confirmation.customer_email,
            "SMTP not configured, confirmation email logged only"
        );
        Ok(())
    }
}

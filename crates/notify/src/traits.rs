//! Sender trait definition and shared error types.

/// Errors that can occur while rendering or delivering a digest email.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// A fully rendered email ready for delivery.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
}

/// Transport seam. The dispatcher never knows whether it is talking to a
/// real SMTP relay or a test double.
#[async_trait::async_trait]
pub trait DigestSender: Send + Sync {
    /// Deliver one email. Returns a provider message identifier for the
    /// delivery record.
    async fn send(&self, email: &OutboundEmail) -> Result<String, NotifyError>;
}

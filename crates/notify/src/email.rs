//! SMTP digest sender via `lettre` with TLS support.

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use centinela_core::config::SmtpConfig;

use crate::traits::{DigestSender, NotifyError, OutboundEmail};

/// Sends digests through an SMTP relay.
pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpSender {
    /// Build a sender from SMTP configuration.
    ///
    /// Port 465 uses implicit TLS; any other port uses STARTTLS when
    /// `secure` is set and a plain connection otherwise. Credentials are
    /// attached when both `user` and `pass` are configured.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| NotifyError::Config("SMTP_HOST is not set".to_string()))?;
        let from: Mailbox = config
            .from
            .as_deref()
            .ok_or_else(|| NotifyError::Config("SMTP_FROM is not set".to_string()))?
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        let mut builder = if config.port == 465 || config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(config.port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(config.port)
        };

        if let (Some(user), Some(pass)) = (&config.user, &config.pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait::async_trait]
impl DigestSender for SmtpSender {
    async fn send(&self, email: &OutboundEmail) -> Result<String, NotifyError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject);

        let message = match &email.body_html {
            Some(html) => builder
                .multipart(MultiPart::alternative_plain_html(
                    email.body_text.clone(),
                    html.clone(),
                ))
                .map_err(|e| NotifyError::Smtp(e.to_string()))?,
            None => builder
                .body(email.body_text.clone())
                .map_err(|e| NotifyError::Smtp(e.to_string()))?,
        };

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        tracing::info!(
            recipient = %email.to,
            subject = %email.subject,
            "digest email delivered"
        );

        Ok(format!("smtp:{}", response.code()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: Option<&str>, from: Option<&str>) -> SmtpConfig {
        SmtpConfig {
            host: host.map(String::from),
            port: 587,
            secure: true,
            user: None,
            pass: None,
            from: from.map(String::from),
            alert_recipient: None,
        }
    }

    #[test]
    fn from_config_valid() {
        let sender = SmtpSender::from_config(&config(
            Some("smtp.example.com"),
            Some("Centinela Alerts <alerts@example.com>"),
        ));
        assert!(sender.is_ok());
    }

    #[test]
    fn from_config_missing_host() {
        let result = SmtpSender::from_config(&config(None, Some("alerts@example.com")));
        assert!(result.is_err());
        let err = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("SMTP_HOST"), "got: {err}");
    }

    #[test]
    fn from_config_missing_from() {
        let result = SmtpSender::from_config(&config(Some("smtp.example.com"), None));
        assert!(result.is_err());
    }

    #[test]
    fn from_config_invalid_from_address() {
        let result = SmtpSender::from_config(&config(Some("smtp.example.com"), Some("not-an-address")));
        assert!(result.is_err());
    }

    #[test]
    fn from_config_plain_port_25() {
        let mut cfg = config(Some("relay.internal"), Some("alerts@example.com"));
        cfg.port = 25;
        cfg.secure = false;
        assert!(SmtpSender::from_config(&cfg).is_ok());
    }
}

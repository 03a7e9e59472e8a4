//! Digest delivery.
//!
//! Selects digests with no `sent` delivery row and hands them to the
//! injected sender. Success and failure both leave a delivery record;
//! failures are retried on the next tick because the `sent` row never
//! appeared.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};

use centinela_core::{Digest, Tenant, DELIVERY_FAILED, DELIVERY_SENT};
use centinela_notify::{DigestSender, OutboundEmail};

use crate::PipelineError;

#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchSummary {
    pub sent: u64,
    pub failed: u64,
}

pub struct EmailDispatcher {
    pool: PgPool,
    sender: Arc<dyn DigestSender>,
    /// Used when a tenant has no alert recipient of its own.
    fallback_recipient: Option<String>,
}

impl EmailDispatcher {
    pub fn new(
        pool: PgPool,
        sender: Arc<dyn DigestSender>,
        fallback_recipient: Option<String>,
    ) -> Self {
        Self {
            pool,
            sender,
            fallback_recipient,
        }
    }

    pub async fn run(&self) -> Result<DispatchSummary, PipelineError> {
        let pending: Vec<Digest> = sqlx::query_as(
            "SELECT d.* FROM digests d WHERE NOT EXISTS \
             (SELECT 1 FROM email_deliveries e \
              WHERE e.digest_id = d.id AND e.status = $1) \
             ORDER BY d.created_at ASC",
        )
        .bind(DELIVERY_SENT)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = DispatchSummary::default();
        for digest in &pending {
            match self.dispatch_one(digest).await {
                Ok(true) => summary.sent += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(digest_id = %digest.id, error = %e, "digest dispatch errored");
                }
            }
        }

        if summary.sent > 0 || summary.failed > 0 {
            info!(sent = summary.sent, failed = summary.failed, "digest dispatch complete");
        }
        Ok(summary)
    }

    async fn dispatch_one(&self, digest: &Digest) -> Result<bool, PipelineError> {
        let tenant: Tenant = sqlx::query_as("SELECT * FROM tenants WHERE id = $1")
            .bind(digest.tenant_id)
            .fetch_one(&self.pool)
            .await?;

        let Some(recipient) = tenant
            .alert_recipient
            .clone()
            .or_else(|| self.fallback_recipient.clone())
        else {
            self.record_delivery(digest, "", DELIVERY_FAILED, None, Some("no recipient configured"))
                .await?;
            warn!(tenant_id = %tenant.id, digest_id = %digest.id, "no alert recipient configured");
            return Ok(false);
        };

        let email = OutboundEmail {
            to: recipient.clone(),
            subject: digest.subject.clone(),
            body_text: digest.body_text.clone(),
            body_html: digest.body_html.clone(),
        };

        match self.sender.send(&email).await {
            Ok(provider_message_id) => {
                self.record_delivery(
                    digest,
                    &recipient,
                    DELIVERY_SENT,
                    Some(&provider_message_id),
                    None,
                )
                .await?;
                Ok(true)
            }
            Err(e) => {
                self.record_delivery(digest, &recipient, DELIVERY_FAILED, None, Some(&e.to_string()))
                    .await?;
                warn!(digest_id = %digest.id, error = %e, "digest email failed, will retry next tick");
                Ok(false)
            }
        }
    }

    async fn record_delivery(
        &self,
        digest: &Digest,
        recipient: &str,
        status: &str,
        provider_message_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), PipelineError> {
        let sent_at = (status == DELIVERY_SENT).then(Utc::now);
        sqlx::query(
            "INSERT INTO email_deliveries \
             (digest_id, tenant_id, recipient, provider_message_id, status, error, sent_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(digest.id)
        .bind(digest.tenant_id)
        .bind(recipient)
        .bind(provider_message_id)
        .bind(status)
        .bind(error)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

//! Ingest queue worker: one job = one RawEvent row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use centinela_queue::{DedupeSet, Job, JobHandler};

/// Window for exact-duplicate suppression via `x-payload-sha256`.
pub const DEDUPE_WINDOW_SECS: u64 = 600;

#[derive(Debug, Deserialize)]
struct IngestPayload {
    tenant_id: Uuid,
    raw_message: String,
    received_at: DateTime<Utc>,
    #[serde(default)]
    source_ip: Option<String>,
    #[serde(default)]
    site_id: Option<String>,
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    collector_name: Option<String>,
    #[serde(default)]
    transport: Option<String>,
    #[serde(default)]
    payload_sha256: Option<String>,
}

pub struct IngestJobHandler {
    pool: PgPool,
    dedupe: Option<DedupeSet>,
}

impl IngestJobHandler {
    pub fn new(pool: PgPool, dedupe: Option<DedupeSet>) -> Self {
        Self { pool, dedupe }
    }
}

#[async_trait]
impl JobHandler for IngestJobHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let payload: IngestPayload = serde_json::from_value(job.payload.clone())?;

        // Best-effort dedupe: a digest seen within the window means the
        // collector replayed an already-accepted upload. A dedupe *error*
        // never blocks ingestion.
        if let (Some(dedupe), Some(digest)) = (&self.dedupe, &payload.payload_sha256) {
            match dedupe
                .try_claim(&payload.tenant_id.to_string(), digest)
                .await
            {
                Ok(false) => {
                    debug!(job_id = %job.id, "duplicate payload suppressed");
                    return Ok(());
                }
                Ok(true) => {}
                Err(e) => debug!(error = %e, "dedupe check failed, ingesting anyway"),
            }
        }

        sqlx::query(
            "INSERT INTO raw_events \
             (tenant_id, site_id, source_id, received_at, source_ip, transport, raw_message, \
              collector_name) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(payload.tenant_id)
        .bind(&payload.site_id)
        .bind(&payload.source_id)
        .bind(payload.received_at)
        .bind(&payload.source_ip)
        .bind(payload.transport.as_deref().unwrap_or("http"))
        .bind(&payload.raw_message)
        .bind(&payload.collector_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn name(&self) -> &str {
        "ingest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_parses_from_front_door_shape() {
        let value = serde_json::json!({
            "tenant_id": "4b8c6e1e-8c39-4a2e-9a44-30f9a0a2e9b1",
            "raw_message": "type=\"event\" subtype=\"vpn\"",
            "received_at": "2024-01-15T08:30:01Z",
            "source_ip": "10.0.0.5",
            "site_id": null,
            "source_id": null,
            "collector_name": "edge-1",
            "transport": "http",
            "payload_sha256": null,
        });
        let payload: IngestPayload = serde_json::from_value(value).unwrap();
        assert_eq!(payload.raw_message, "type=\"event\" subtype=\"vpn\"");
        assert_eq!(payload.collector_name.as_deref(), Some("edge-1"));
        assert!(payload.payload_sha256.is_none());
    }
}

//! Per-tenant digest assembly.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use centinela_core::{Detection, Severity, Tenant};
use centinela_notify::{render_digest, DigestContext, DigestLine};

use crate::PipelineError;

#[derive(Debug, Default, Clone, Copy)]
pub struct BatchSummary {
    pub digests_created: u64,
    pub detections_reported: u64,
}

pub struct Batcher {
    pool: PgPool,
}

impl Batcher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fold every tenant's open detections into one digest each.
    pub async fn run(&self) -> Result<BatchSummary, PipelineError> {
        let tenants: Vec<Tenant> = sqlx::query_as(
            "SELECT t.* FROM tenants t WHERE EXISTS \
             (SELECT 1 FROM detections d \
              WHERE d.tenant_id = t.id AND d.reported_digest_id IS NULL)",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = BatchSummary::default();
        for tenant in &tenants {
            match self.batch_tenant(tenant).await {
                Ok(Some(reported)) => {
                    summary.digests_created += 1;
                    summary.detections_reported += reported;
                }
                Ok(None) => {}
                Err(e) => {
                    // One tenant's failure must not starve the others.
                    warn!(tenant_id = %tenant.id, error = %e, "digest batching failed for tenant");
                }
            }
        }
        Ok(summary)
    }

    /// Create one digest for a tenant and freeze its member detections.
    /// Returns the number of detections folded in.
    async fn batch_tenant(&self, tenant: &Tenant) -> Result<Option<u64>, PipelineError> {
        let mut tx = self.pool.begin().await?;

        // Severity desc, then recency. Locked so a concurrent rule update
        // waits rather than mutating a row mid-batch.
        let detections: Vec<Detection> = sqlx::query_as(
            "SELECT * FROM detections \
             WHERE tenant_id = $1 AND reported_digest_id IS NULL \
             ORDER BY CASE severity \
                 WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 \
                 WHEN 'low' THEN 3 ELSE 4 END, \
                 last_event_at DESC \
             FOR UPDATE",
        )
        .bind(tenant.id)
        .fetch_all(&mut *tx)
        .await?;

        if detections.is_empty() {
            return Ok(None);
        }

        let window_start = detections
            .iter()
            .map(|d| d.first_event_at)
            .min()
            .unwrap_or_else(Utc::now);
        let window_end = detections
            .iter()
            .map(|d| d.last_event_at)
            .max()
            .unwrap_or_else(Utc::now);
        let severity = detections
            .iter()
            .map(Detection::severity_level)
            .max()
            .unwrap_or(Severity::Info);
        let event_count: i64 = detections.iter().map(|d| d.event_count).sum();

        let detection_ids: Vec<Uuid> = detections.iter().map(|d| d.id).collect();
        let summaries = self.load_ai_summaries(&mut tx, &detection_ids).await?;

        let context = DigestContext {
            tenant_name: tenant.name.clone(),
            window_start: format_ts(window_start),
            window_end: format_ts(window_end),
            severity: severity.as_str().to_string(),
            detection_count: detections.len(),
            event_count,
            detections: detections
                .iter()
                .map(|d| DigestLine {
                    detection_type: d.detection_type.clone(),
                    severity: d.severity.clone(),
                    group_key: d.group_key.clone(),
                    event_count: d.event_count,
                    first_event_at: format_ts(d.first_event_at),
                    last_event_at: format_ts(d.last_event_at),
                    ai_summary: summaries.get(&d.id).cloned(),
                })
                .collect(),
        };

        let rendered = render_digest(&tenant.default_locale, &context)?;

        let (digest_id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO digests \
             (tenant_id, window_start, window_end, severity, detection_count, event_count, \
              subject, body_text, body_html, locale) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING id",
        )
        .bind(tenant.id)
        .bind(window_start)
        .bind(window_end)
        .bind(severity.as_str())
        .bind(detections.len() as i32)
        .bind(event_count)
        .bind(&rendered.subject)
        .bind(&rendered.body_text)
        .bind(&rendered.body_html)
        .bind(&tenant.default_locale)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE detections SET reported_digest_id = $1 WHERE id = ANY($2)")
            .bind(digest_id)
            .bind(&detection_ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            tenant_id = %tenant.id,
            digest_id = %digest_id,
            detections = detection_ids.len(),
            severity = severity.as_str(),
            "digest created"
        );
        Ok(Some(detection_ids.len() as u64))
    }

    async fn load_ai_summaries(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        detection_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, String>, PipelineError> {
        let rows: Vec<(Uuid, Option<String>)> = sqlx::query_as(
            "SELECT detection_id, context_summary FROM ai_analyses WHERE detection_id = ANY($1)",
        )
        .bind(detection_ids)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, summary)| summary.map(|s| (id, s)))
            .collect())
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

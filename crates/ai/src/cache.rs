//! Signature-keyed knowledge cache with TTL invalidation.
//!
//! One row per `(tenant, pattern_signature)`. The signature deliberately
//! excludes rule version. After any change to a rule's semantics, call
//! [`AiKnowledgeCache::invalidate_by_type`] for the affected detection type.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use centinela_core::AiCacheEntry;

use crate::AiError;

/// Content fields written on upsert.
#[derive(Debug, Clone, Default)]
pub struct CachePayload {
    pub detection_type: String,
    pub severity: String,
    pub threat_detected: bool,
    pub threat_type: Option<String>,
    pub confidence_score: Option<f32>,
    pub context_summary: Option<String>,
    pub recommended_actions: Option<serde_json::Value>,
    pub report_subject: Option<String>,
    pub report_body: Option<String>,
}

pub struct AiKnowledgeCache {
    pool: PgPool,
    ttl_days: i64,
}

impl AiKnowledgeCache {
    pub fn new(pool: PgPool, ttl_days: i64) -> Self {
        Self { pool, ttl_days }
    }

    /// Look up a live entry. On a hit the hit counter and `last_hit_at` are
    /// touched in the same statement, so the returned row reflects the read.
    pub async fn lookup(
        &self,
        tenant_id: Uuid,
        signature: &str,
    ) -> Result<Option<AiCacheEntry>, AiError> {
        let entry: Option<AiCacheEntry> = sqlx::query_as(
            "UPDATE ai_cache_entries \
             SET hit_count = hit_count + 1, last_hit_at = now() \
             WHERE tenant_id = $1 AND pattern_signature = $2 \
               AND is_valid = TRUE AND expires_at > now() \
             RETURNING *",
        )
        .bind(tenant_id)
        .bind(signature)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(entry) = &entry {
            debug!(
                tenant_id = %tenant_id,
                signature = &signature[..12.min(signature.len())],
                hit_count = entry.hit_count,
                "AI cache hit"
            );
        }
        Ok(entry)
    }

    /// Insert or overwrite the entry for this pattern, resetting its TTL and
    /// validity.
    pub async fn upsert(
        &self,
        tenant_id: Uuid,
        signature: &str,
        payload: &CachePayload,
    ) -> Result<(), AiError> {
        let expires_at = Utc::now() + Duration::days(self.ttl_days);
        sqlx::query(
            "INSERT INTO ai_cache_entries \
             (tenant_id, pattern_signature, detection_type, severity, threat_detected, \
              threat_type, confidence_score, context_summary, recommended_actions, \
              report_subject, report_body, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (tenant_id, pattern_signature) DO UPDATE SET \
                 detection_type = EXCLUDED.detection_type, \
                 severity = EXCLUDED.severity, \
                 threat_detected = EXCLUDED.threat_detected, \
                 threat_type = EXCLUDED.threat_type, \
                 confidence_score = EXCLUDED.confidence_score, \
                 context_summary = EXCLUDED.context_summary, \
                 recommended_actions = EXCLUDED.recommended_actions, \
                 report_subject = EXCLUDED.report_subject, \
                 report_body = EXCLUDED.report_body, \
                 expires_at = EXCLUDED.expires_at, \
                 is_valid = TRUE",
        )
        .bind(tenant_id)
        .bind(signature)
        .bind(&payload.detection_type)
        .bind(&payload.severity)
        .bind(payload.threat_detected)
        .bind(&payload.threat_type)
        .bind(payload.confidence_score)
        .bind(&payload.context_summary)
        .bind(&payload.recommended_actions)
        .bind(&payload.report_subject)
        .bind(&payload.report_body)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Invalidate one pattern.
    pub async fn invalidate_by_pattern(
        &self,
        tenant_id: Uuid,
        signature: &str,
    ) -> Result<u64, AiError> {
        let result = sqlx::query(
            "UPDATE ai_cache_entries SET is_valid = FALSE \
             WHERE tenant_id = $1 AND pattern_signature = $2",
        )
        .bind(tenant_id)
        .bind(signature)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Invalidate every cached pattern of a detection type. Required after
    /// any rule change that alters the type's semantics.
    pub async fn invalidate_by_type(
        &self,
        tenant_id: Uuid,
        detection_type: &str,
    ) -> Result<u64, AiError> {
        let result = sqlx::query(
            "UPDATE ai_cache_entries SET is_valid = FALSE \
             WHERE tenant_id = $1 AND detection_type = $2",
        )
        .bind(tenant_id)
        .bind(detection_type)
        .execute(&self.pool)
        .await?;
        let invalidated = result.rows_affected();
        if invalidated > 0 {
            info!(
                tenant_id = %tenant_id,
                detection_type,
                invalidated,
                "AI cache entries invalidated by type"
            );
        }
        Ok(invalidated)
    }

    /// Delete expired and invalidated rows. Safe to run on a daily schedule.
    pub async fn cleanup(&self) -> Result<u64, AiError> {
        let result =
            sqlx::query("DELETE FROM ai_cache_entries WHERE expires_at < now() OR is_valid = FALSE")
                .execute(&self.pool)
                .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, "AI cache cleanup removed rows");
        }
        Ok(deleted)
    }
}

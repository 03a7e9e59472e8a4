//! Rule evaluation against the normalized event store.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::schema::Rule;
use crate::RulesError;

/// Counters for one evaluation pass, for logs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvaluationSummary {
    pub groups_over_threshold: u64,
    pub detections_created: u64,
    pub detections_updated: u64,
}

/// One aggregated group at or over a rule's threshold.
#[derive(Debug, sqlx::FromRow)]
struct CandidateGroup {
    tenant_id: Uuid,
    site_id: Option<String>,
    source_id: Option<String>,
    group_key: String,
    event_count: i64,
    first_event_at: DateTime<Utc>,
    last_event_at: DateTime<Utc>,
    src_ips: Option<Vec<String>>,
    src_users: Option<Vec<String>>,
    event_ids: Vec<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct OpenDetection {
    id: Uuid,
    first_event_at: DateTime<Utc>,
    last_event_at: DateTime<Utc>,
}

pub struct RulesEngine {
    pool: PgPool,
    rules: Vec<Rule>,
}

impl RulesEngine {
    pub fn new(pool: PgPool, rules: Vec<Rule>) -> Self {
        Self { pool, rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Evaluate every rule over its window ending now.
    pub async fn evaluate_all(&self) -> Result<EvaluationSummary, RulesError> {
        let mut summary = EvaluationSummary::default();
        for rule in &self.rules {
            let rule_summary = self.evaluate_rule(rule).await?;
            summary.groups_over_threshold += rule_summary.groups_over_threshold;
            summary.detections_created += rule_summary.detections_created;
            summary.detections_updated += rule_summary.detections_updated;
        }
        if summary.detections_created > 0 || summary.detections_updated > 0 {
            info!(
                created = summary.detections_created,
                updated = summary.detections_updated,
                "rule evaluation produced detections"
            );
        }
        Ok(summary)
    }

    async fn evaluate_rule(&self, rule: &Rule) -> Result<EvaluationSummary, RulesError> {
        let window_start = Utc::now() - Duration::minutes(rule.window_minutes);
        let key_expr = rule.group_by.key_expr();

        // The grouping key expression is a compile-time constant per GroupBy
        // variant; all values are bound parameters.
        let sql = format!(
            "SELECT tenant_id, site_id, source_id, \
                    {key_expr} AS group_key, \
                    COUNT(*) AS event_count, \
                    MIN(ts) AS first_event_at, \
                    MAX(ts) AS last_event_at, \
                    ARRAY_AGG(DISTINCT src_ip) FILTER (WHERE src_ip IS NOT NULL) AS src_ips, \
                    ARRAY_AGG(DISTINCT src_user) FILTER (WHERE src_user IS NOT NULL) AS src_users, \
                    (ARRAY_AGG(id))[1:500] AS event_ids \
             FROM normalized_events \
             WHERE event_type = ANY($1) AND ts >= $2 AND {key_expr} IS NOT NULL \
             GROUP BY tenant_id, site_id, source_id, {key_expr} \
             HAVING COUNT(*) >= $3"
        );

        let candidates: Vec<CandidateGroup> = sqlx::query_as(&sql)
            .bind(&rule.event_types)
            .bind(window_start)
            .bind(rule.threshold)
            .fetch_all(&self.pool)
            .await?;

        let mut summary = EvaluationSummary {
            groups_over_threshold: candidates.len() as u64,
            ..Default::default()
        };

        for candidate in candidates {
            if self.upsert_detection(rule, &candidate).await? {
                summary.detections_created += 1;
            } else {
                summary.detections_updated += 1;
            }
        }
        Ok(summary)
    }

    /// Update-or-insert under the open-detection uniqueness constraint.
    /// Returns `true` when a new detection was inserted.
    async fn upsert_detection(
        &self,
        rule: &Rule,
        candidate: &CandidateGroup,
    ) -> Result<bool, RulesError> {
        let severity = rule.severity_for_count(candidate.event_count);
        let evidence = serde_json::json!({
            "rule": rule.name,
            "threshold": rule.threshold,
            "window_minutes": rule.window_minutes,
            "event_count": candidate.event_count,
            "distinct_src_ips": candidate.src_ips.clone().unwrap_or_default(),
            "distinct_src_users": candidate.src_users.clone().unwrap_or_default(),
            "first_event_at": candidate.first_event_at,
            "last_event_at": candidate.last_event_at,
        });

        let mut tx = self.pool.begin().await?;

        let open: Option<OpenDetection> = sqlx::query_as(
            "SELECT id, first_event_at, last_event_at FROM detections \
             WHERE tenant_id = $1 AND detection_type = $2 AND group_key = $3 \
               AND reported_digest_id IS NULL \
             FOR UPDATE",
        )
        .bind(candidate.tenant_id)
        .bind(&rule.name)
        .bind(&candidate.group_key)
        .fetch_optional(&mut *tx)
        .await?;

        let inserted = match open {
            Some(open) => {
                // Overlapping window: extend the open detection. A stale open
                // row (gap since its last event) is reset to the new window
                // rather than duplicated; the open-uniqueness index allows
                // only one open row per key.
                let first_event_at = if open.last_event_at >= candidate.first_event_at {
                    open.first_event_at.min(candidate.first_event_at)
                } else {
                    candidate.first_event_at
                };
                sqlx::query(
                    "UPDATE detections \
                     SET severity = $2, event_count = $3, first_event_at = $4, \
                         last_event_at = $5, evidence = $6, related_event_ids = $7 \
                     WHERE id = $1",
                )
                .bind(open.id)
                .bind(severity.as_str())
                .bind(candidate.event_count)
                .bind(first_event_at)
                .bind(candidate.last_event_at)
                .bind(&evidence)
                .bind(&candidate.event_ids)
                .execute(&mut *tx)
                .await?;
                debug!(
                    rule = rule.name,
                    group_key = %candidate.group_key,
                    event_count = candidate.event_count,
                    "open detection updated"
                );
                false
            }
            None => {
                sqlx::query(
                    "INSERT INTO detections \
                     (tenant_id, site_id, source_id, detection_type, severity, group_key, \
                      window_minutes, event_count, first_event_at, last_event_at, \
                      evidence, related_event_ids) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                )
                .bind(candidate.tenant_id)
                .bind(&candidate.site_id)
                .bind(&candidate.source_id)
                .bind(&rule.name)
                .bind(severity.as_str())
                .bind(&candidate.group_key)
                .bind(rule.window_minutes as i32)
                .bind(candidate.event_count)
                .bind(candidate.first_event_at)
                .bind(candidate.last_event_at)
                .bind(&evidence)
                .bind(&candidate.event_ids)
                .execute(&mut *tx)
                .await?;
                info!(
                    rule = rule.name,
                    tenant_id = %candidate.tenant_id,
                    group_key = %candidate.group_key,
                    severity = severity.as_str(),
                    event_count = candidate.event_count,
                    "detection created"
                );
                true
            }
        };

        tx.commit().await?;
        Ok(inserted)
    }
}

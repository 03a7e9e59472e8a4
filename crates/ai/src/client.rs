//! Orchestrator client: cache-check, fan-out call, persistence.

use std::time::Duration;

use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use centinela_core::config::AiConfig;
use centinela_core::{AiCacheEntry, Detection, NormalizedEvent, RawEvent, REPORT_GENERATED};

use crate::cache::{AiKnowledgeCache, CachePayload};
use crate::envelope::{
    DetectionEnvelope, OrchestrateRequest, OrchestrateResponse, RecommendedAction,
};
use crate::signature::signature_for_detection;
use crate::AiError;

/// Up to this many sample events of each kind ride along in the request.
const SAMPLE_EVENT_LIMIT: i64 = 10;

/// What happened for one detection.
#[derive(Debug)]
pub enum AiOutcome {
    /// Served from the knowledge cache; no downstream traffic.
    FromCache {
        report: Option<(String, String)>,
    },
    /// Orchestrator judged the pattern benign.
    NoThreat,
    /// Fresh analysis persisted.
    Analyzed {
        threat_detected: bool,
    },
}

pub struct AiClient {
    http: reqwest::Client,
    orchestrator_url: String,
    timeout: Duration,
    pool: PgPool,
    cache: AiKnowledgeCache,
}

impl AiClient {
    pub fn new(pool: PgPool, config: &AiConfig) -> Result<Self, AiError> {
        let orchestrator_url = config
            .orchestrator_url
            .clone()
            .ok_or(AiError::NotConfigured)?;
        let cache = AiKnowledgeCache::new(pool.clone(), config.cache_ttl_days);
        Ok(Self {
            http: reqwest::Client::new(),
            orchestrator_url: orchestrator_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.request_timeout_secs),
            pool,
            cache,
        })
    }

    pub fn cache(&self) -> &AiKnowledgeCache {
        &self.cache
    }

    /// Enrich one detection: cache first, orchestrator on miss.
    ///
    /// Errors (HTTP failure, timeout) propagate without touching the cache,
    /// so a flaky orchestrator can never poison future lookups.
    pub async fn analyze_detection(&self, detection: &Detection) -> Result<AiOutcome, AiError> {
        let signature = signature_for_detection(detection);

        if let Some(entry) = self.cache.lookup(detection.tenant_id, &signature).await? {
            self.persist_from_cache(detection, &entry).await?;
            let report = match (entry.report_subject, entry.report_body) {
                (Some(subject), Some(body)) => Some((subject, body)),
                _ => None,
            };
            return Ok(AiOutcome::FromCache { report });
        }

        let request = self.build_request(detection).await?;
        let response = self.call_orchestrator(&request).await?;

        if response.is_no_threat() {
            debug!(detection_id = %detection.id, "orchestrator found no threat");
            // Persisting the negative verdict keeps the scheduler from
            // re-enqueueing this detection every tick. No cache write.
            self.persist_analysis_row(detection, false, None, None, None, &[], None, None, None, false)
                .await?;
            return Ok(AiOutcome::NoThreat);
        }

        let judge_passed = response
            .judge
            .as_ref()
            .map(|verdict| verdict.is_pass())
            .unwrap_or(true);
        if !judge_passed {
            warn!(
                detection_id = %detection.id,
                reason = response
                    .judge
                    .as_ref()
                    .and_then(|v| v.reason.as_deref())
                    .unwrap_or("unspecified"),
                "judge rejected recommendations, stripping CLI commands"
            );
        }

        let threat_detected = self.persist_response(detection, &response, judge_passed).await?;

        // Cache the composed result for the next detection with this shape.
        let payload = compose_cache_payload(detection, &response, judge_passed);
        self.cache
            .upsert(detection.tenant_id, &signature, &payload)
            .await?;

        info!(
            detection_id = %detection.id,
            threat_detected,
            "AI analysis persisted and cached"
        );
        Ok(AiOutcome::Analyzed { threat_detected })
    }

    async fn build_request(&self, detection: &Detection) -> Result<OrchestrateRequest, AiError> {
        let normalized: Vec<NormalizedEvent> = sqlx::query_as(
            "SELECT * FROM normalized_events WHERE id = ANY($1) ORDER BY ts LIMIT $2",
        )
        .bind(&detection.related_event_ids)
        .bind(SAMPLE_EVENT_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let raw: Vec<RawEvent> = sqlx::query_as(
            "SELECT r.* FROM raw_events r \
             JOIN normalized_events n ON n.raw_event_id = r.id \
             WHERE n.id = ANY($1) ORDER BY r.received_at LIMIT $2",
        )
        .bind(&detection.related_event_ids)
        .bind(SAMPLE_EVENT_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(OrchestrateRequest {
            tenant_id: detection.tenant_id,
            site_id: detection.site_id.clone(),
            source_id: detection.source_id.clone(),
            detection: DetectionEnvelope {
                detection_type: detection.detection_type.clone(),
                severity: detection.severity.clone(),
                detected_at: detection.created_at,
                group_key: detection.group_key.clone(),
                evidence: detection.evidence.clone(),
            },
            raw_events: to_json_values(&raw),
            normalized_events: to_json_values(&normalized),
        })
    }

    async fn call_orchestrator(
        &self,
        request: &OrchestrateRequest,
    ) -> Result<OrchestrateResponse, AiError> {
        let response = self
            .http
            .post(format!("{}/v1/ata/orchestrate", self.orchestrator_url))
            .timeout(self.timeout)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AiError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    async fn persist_response(
        &self,
        detection: &Detection,
        response: &OrchestrateResponse,
        judge_passed: bool,
    ) -> Result<bool, AiError> {
        let (threat_detected, threat_type, confidence, severity, iocs, summary, model, tokens, latency) =
            match &response.analysis {
                Some(analysis) => (
                    analysis.threat_detected,
                    analysis.threat_type.clone(),
                    analysis.confidence_score,
                    analysis.severity.clone(),
                    analysis.iocs.clone(),
                    analysis.context_summary.clone(),
                    analysis.model_used.clone(),
                    analysis.tokens_used,
                    analysis.latency_ms,
                ),
                None => (false, None, None, None, Vec::new(), None, None, None, None),
            };

        self.persist_analysis_row(
            detection,
            threat_detected,
            threat_type,
            confidence,
            severity,
            &iocs,
            summary,
            model,
            tokens.zip(latency),
            false,
        )
        .await?;

        if let Some(recommendations) = &response.recommendations {
            if !recommendations.actions.is_empty() {
                let actions = sanitize_actions(&recommendations.actions, judge_passed);
                sqlx::query(
                    "INSERT INTO ai_recommendations \
                     (detection_id, tenant_id, urgency, actions, model_used, tokens_used, latency_ms) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(detection.id)
                .bind(detection.tenant_id)
                .bind(&recommendations.urgency)
                .bind(&actions)
                .bind(&recommendations.model_used)
                .bind(recommendations.tokens_used)
                .bind(recommendations.latency_ms)
                .execute(&self.pool)
                .await?;
            }
        }

        if let Some(report) = &response.report {
            let (judge_result, judge_reason) = match &response.judge {
                Some(verdict) => (Some(verdict.result.clone()), verdict.reason.clone()),
                None => (None, None),
            };
            sqlx::query(
                "INSERT INTO ai_reports \
                 (detection_id, tenant_id, subject, body, status, judge_result, judge_reason, \
                  model_used, tokens_used, latency_ms) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(detection.id)
            .bind(detection.tenant_id)
            .bind(&report.subject)
            .bind(&report.body)
            .bind(REPORT_GENERATED)
            .bind(&judge_result)
            .bind(&judge_reason)
            .bind(&report.model_used)
            .bind(report.tokens_used)
            .bind(report.latency_ms)
            .execute(&self.pool)
            .await?;
        }

        Ok(threat_detected)
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_analysis_row(
        &self,
        detection: &Detection,
        threat_detected: bool,
        threat_type: Option<String>,
        confidence: Option<f32>,
        severity: Option<String>,
        iocs: &[String],
        summary: Option<String>,
        model: Option<String>,
        tokens_latency: Option<(i32, i32)>,
        from_cache: bool,
    ) -> Result<(), AiError> {
        let (tokens, latency) = match tokens_latency {
            Some((tokens, latency)) => (Some(tokens), Some(latency)),
            None => (None, None),
        };
        sqlx::query(
            "INSERT INTO ai_analyses \
             (detection_id, tenant_id, threat_detected, threat_type, confidence_score, severity, \
              context_summary, iocs, model_used, tokens_used, latency_ms, from_cache) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (detection_id) DO NOTHING",
        )
        .bind(detection.id)
        .bind(detection.tenant_id)
        .bind(threat_detected)
        .bind(&threat_type)
        .bind(confidence)
        .bind(&severity)
        .bind(&summary)
        .bind(serde_json::json!(iocs))
        .bind(&model)
        .bind(tokens)
        .bind(latency)
        .bind(from_cache)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Materialize a cache hit into the per-detection AI tables.
    async fn persist_from_cache(
        &self,
        detection: &Detection,
        entry: &AiCacheEntry,
    ) -> Result<(), AiError> {
        self.persist_analysis_row(
            detection,
            entry.threat_detected,
            entry.threat_type.clone(),
            entry.confidence_score,
            Some(entry.severity.clone()),
            &[],
            entry.context_summary.clone(),
            None,
            None,
            true,
        )
        .await?;

        if let Some(actions) = &entry.recommended_actions {
            sqlx::query(
                "INSERT INTO ai_recommendations (detection_id, tenant_id, actions) \
                 VALUES ($1, $2, $3)",
            )
            .bind(detection.id)
            .bind(detection.tenant_id)
            .bind(actions)
            .execute(&self.pool)
            .await?;
        }

        if let (Some(subject), Some(body)) = (&entry.report_subject, &entry.report_body) {
            sqlx::query(
                "INSERT INTO ai_reports (detection_id, tenant_id, subject, body, status) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(detection.id)
            .bind(detection.tenant_id)
            .bind(subject)
            .bind(body)
            .bind(REPORT_GENERATED)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

/// Recommendations that failed the safety judge keep their prose but lose
/// their CLI commands; only verified content travels further.
pub fn sanitize_actions(actions: &[RecommendedAction], judge_passed: bool) -> serde_json::Value {
    if judge_passed {
        return serde_json::to_value(actions).unwrap_or_default();
    }
    let stripped: Vec<RecommendedAction> = actions
        .iter()
        .map(|action| RecommendedAction {
            cli_commands: Vec::new(),
            ..action.clone()
        })
        .collect();
    serde_json::to_value(stripped).unwrap_or_default()
}

fn compose_cache_payload(
    detection: &Detection,
    response: &OrchestrateResponse,
    judge_passed: bool,
) -> CachePayload {
    let mut payload = CachePayload {
        detection_type: detection.detection_type.clone(),
        severity: detection.severity.clone(),
        ..Default::default()
    };

    if let Some(analysis) = &response.analysis {
        payload.threat_detected = analysis.threat_detected;
        payload.threat_type = analysis.threat_type.clone();
        payload.confidence_score = analysis.confidence_score;
        payload.context_summary = analysis.context_summary.clone();
    }
    if let Some(recommendations) = &response.recommendations {
        if !recommendations.actions.is_empty() {
            payload.recommended_actions =
                Some(sanitize_actions(&recommendations.actions, judge_passed));
        }
    }
    if let Some(report) = &response.report {
        payload.report_subject = Some(report.subject.clone());
        payload.report_body = Some(report.body.clone());
    }
    payload
}

fn to_json_values<T: serde::Serialize>(rows: &[T]) -> Vec<serde_json::Value> {
    rows.iter()
        .filter_map(|row| serde_json::to_value(row).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(cli: &[&str]) -> RecommendedAction {
        RecommendedAction {
            priority: Some(1),
            action: "Block the source address".to_string(),
            cli_commands: cli.iter().map(|s| s.to_string()).collect(),
            risk_level: Some("low".to_string()),
            reversible: Some(true),
        }
    }

    #[test]
    fn sanitize_keeps_cli_when_judge_passes() {
        let actions = vec![action(&["config firewall address"])];
        let value = sanitize_actions(&actions, true);
        assert_eq!(value[0]["cli_commands"][0], "config firewall address");
    }

    #[test]
    fn sanitize_strips_cli_when_judge_fails() {
        let actions = vec![action(&["execute factoryreset"])];
        let value = sanitize_actions(&actions, false);
        assert_eq!(value[0]["cli_commands"].as_array().unwrap().len(), 0);
        // Prose survives.
        assert_eq!(value[0]["action"], "Block the source address");
    }
}

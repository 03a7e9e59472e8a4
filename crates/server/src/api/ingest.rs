//! Ingest endpoints: validate, enqueue, ACK 202.
//!
//! The front door never writes to PostgreSQL. Payloads are validated,
//! pushed onto the ingest queue, and acknowledged immediately; the ingest
//! workers do the persistence. Tenant identity comes exclusively from the
//! authenticated context; a tenant id in the body is ignored.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::state::AppState;

use super::{bad_request, internal_error, ApiResult};

pub const MAX_BULK_EVENTS: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct IngestEventBody {
    #[serde(default)]
    pub raw_message: Option<String>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub collector_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkBody {
    #[serde(default)]
    pub events: Vec<IngestEventBody>,
}

/// Validation outcome for one event body.
pub fn validate_event(event: &IngestEventBody) -> Result<(), String> {
    match event.raw_message.as_deref() {
        None => Err("raw_message is required".to_string()),
        Some(raw_message) if raw_message.trim().is_empty() => {
            Err("raw_message must be non-empty".to_string())
        }
        Some(_) => Ok(()),
    }
}

fn job_payload(
    auth: &AuthContext,
    event: &IngestEventBody,
    payload_sha256: Option<&str>,
) -> serde_json::Value {
    serde_json::json!({
        "tenant_id": auth.tenant_id,
        "raw_message": event.raw_message,
        "received_at": event.received_at.unwrap_or_else(Utc::now),
        "source_ip": event.source_ip,
        "site_id": event.site_id,
        "source_id": event.source_id,
        "collector_name": event.collector_name,
        "transport": "http",
        "payload_sha256": payload_sha256,
    })
}

fn payload_digest(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-payload-sha256")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// `POST /v1/ingest/syslog`
pub async fn ingest_syslog(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(body): Json<IngestEventBody>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    if let Err(reason) = validate_event(&body) {
        return Err(bad_request(
            "validation",
            Some(serde_json::json!([{"field": "raw_message", "reason": reason}])),
        ));
    }

    let digest = payload_digest(&headers);
    let job_id = state
        .ingest_queue
        .enqueue(job_payload(&auth, &body, digest.as_deref()))
        .await
        .map_err(internal_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"ok": true, "accepted": true, "job_id": job_id})),
    ))
}

/// `POST /v1/ingest/syslog/bulk`
///
/// The whole batch is validated before anything is enqueued; one invalid
/// entry rejects the entire request.
pub async fn ingest_syslog_bulk(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(body): Json<BulkBody>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    if body.events.is_empty() {
        return Err(bad_request(
            "validation",
            Some(serde_json::json!([{"field": "events", "reason": "events must contain 1-100 entries"}])),
        ));
    }
    if body.events.len() > MAX_BULK_EVENTS {
        return Err(bad_request(
            "validation",
            Some(serde_json::json!([{
                "field": "events",
                "reason": format!("events must contain at most {MAX_BULK_EVENTS} entries"),
            }])),
        ));
    }

    let mut failures = Vec::new();
    for (index, event) in body.events.iter().enumerate() {
        if let Err(reason) = validate_event(event) {
            failures.push(serde_json::json!({
                "index": index,
                "field": "raw_message",
                "reason": reason,
            }));
        }
    }
    if !failures.is_empty() {
        return Err(bad_request("validation", Some(serde_json::json!(failures))));
    }

    let digest = payload_digest(&headers);
    let mut job_ids: Vec<Uuid> = Vec::with_capacity(body.events.len());
    for event in &body.events {
        let job_id = state
            .ingest_queue
            .enqueue(job_payload(&auth, event, digest.as_deref()))
            .await
            .map_err(internal_error)?;
        job_ids.push(job_id);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "ok": true,
            "accepted": job_ids.len(),
            "job_ids": job_ids,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(raw: Option<&str>) -> IngestEventBody {
        IngestEventBody {
            raw_message: raw.map(String::from),
            received_at: None,
            source_ip: None,
            site_id: None,
            source_id: None,
            collector_name: None,
        }
    }

    #[test]
    fn missing_raw_message_rejected() {
        assert!(validate_event(&event(None)).is_err());
    }

    #[test]
    fn blank_raw_message_rejected() {
        assert!(validate_event(&event(Some("   "))).is_err());
    }

    #[test]
    fn valid_event_accepted() {
        assert!(validate_event(&event(Some("type=\"event\""))).is_ok());
    }

    #[test]
    fn job_payload_takes_tenant_from_auth_context_only() {
        let auth = AuthContext {
            tenant_id: Uuid::new_v4(),
            api_key_id: Uuid::new_v4(),
            plan_tier: "pro".to_string(),
        };
        let payload = job_payload(&auth, &event(Some("line")), Some("abc123"));
        assert_eq!(payload["tenant_id"], auth.tenant_id.to_string());
        assert_eq!(payload["transport"], "http");
        assert_eq!(payload["payload_sha256"], "abc123");
        assert!(payload["received_at"].is_string());
    }
}

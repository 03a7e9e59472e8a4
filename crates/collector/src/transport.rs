//! HTTPS upload transport to the cloud ingestion service.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

use centinela_core::CollectorConfig;

use crate::buffer::CollectedEvent;

const BULK_TIMEOUT: Duration = Duration::from_secs(30);
const SINGLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upload rejected with status {0}")]
    Status(u16),
}

/// Upload seam between the flush/retry loops and the wire. The loops only
/// ever see this trait; [`ApiClient`] is the production implementation.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload a batch to the bulk endpoint.
    async fn send_bulk(&self, events: &[CollectedEvent]) -> Result<(), TransportError>;

    /// Upload one event to the singular endpoint.
    async fn send_single(&self, event: &CollectedEvent) -> Result<(), TransportError>;
}

#[derive(Serialize)]
struct EventPayload<'a> {
    raw_message: &'a str,
    received_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_ip: Option<&'a str>,
    collector_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    site_id: Option<&'a str>,
}

#[derive(Serialize)]
struct BulkPayload<'a> {
    events: Vec<EventPayload<'a>>,
}

/// Authenticated client for the ingest API. Every request carries
/// `Authorization: Bearer` and a User-Agent identifying this collector.
pub struct ApiClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    collector_name: String,
    site_id: Option<String>,
}

impl ApiClient {
    pub fn new(config: &CollectorConfig) -> Result<Self, TransportError> {
        let user_agent = format!(
            "centinela-collector/{} ({})",
            env!("CARGO_PKG_VERSION"),
            config.collector_name
        );
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            collector_name: config.collector_name.clone(),
            site_id: config.site_id.clone(),
        })
    }

    fn payload<'a>(&'a self, event: &'a CollectedEvent) -> EventPayload<'a> {
        EventPayload {
            raw_message: &event.raw_message,
            received_at: event.received_at.to_rfc3339(),
            source_ip: event.source_ip.as_deref(),
            collector_name: &self.collector_name,
            site_id: self.site_id.as_deref(),
        }
    }
}

#[async_trait]
impl Uploader for ApiClient {
    /// 30 s budget for the whole batch.
    async fn send_bulk(&self, events: &[CollectedEvent]) -> Result<(), TransportError> {
        let body = BulkPayload {
            events: events.iter().map(|e| self.payload(e)).collect(),
        };
        let response = self
            .http
            .post(format!("{}/v1/ingest/syslog/bulk", self.api_url))
            .bearer_auth(&self.api_key)
            .timeout(BULK_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Status(response.status().as_u16()))
        }
    }

    /// 10 s budget. Carries an `x-payload-sha256` digest the backend may
    /// use for dedupe.
    async fn send_single(&self, event: &CollectedEvent) -> Result<(), TransportError> {
        let digest = hex::encode(Sha256::digest(event.raw_message.as_bytes()));
        let response = self
            .http
            .post(format!("{}/v1/ingest/syslog", self.api_url))
            .bearer_auth(&self.api_key)
            .header("x-payload-sha256", digest)
            .timeout(SINGLE_TIMEOUT)
            .json(&self.payload(event))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Status(response.status().as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serialization_matches_wire_format() {
        let event = CollectedEvent {
            raw_message: "type=\"event\" subtype=\"vpn\"".to_string(),
            received_at: chrono::DateTime::parse_from_rfc3339("2024-01-15T08:30:01Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
            source_ip: Some("10.0.0.5".to_string()),
        };
        let payload = EventPayload {
            raw_message: &event.raw_message,
            received_at: event.received_at.to_rfc3339(),
            source_ip: event.source_ip.as_deref(),
            collector_name: "edge-1",
            site_id: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["raw_message"], "type=\"event\" subtype=\"vpn\"");
        assert_eq!(json["received_at"], "2024-01-15T08:30:01+00:00");
        assert_eq!(json["source_ip"], "10.0.0.5");
        assert_eq!(json["collector_name"], "edge-1");
        // Absent optionals are omitted, not null.
        assert!(json.get("site_id").is_none());
    }
}

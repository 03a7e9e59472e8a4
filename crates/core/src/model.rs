//! Domain records shared across the pipeline.
//!
//! Rows are stored in PostgreSQL; enum-like columns (`severity`, `transport`,
//! delivery status) are TEXT in the schema and carried as `String` on the row
//! structs, with typed helpers ([`Severity`], [`Transport`]) used by the
//! pipeline logic.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::SeverityParseError;

// ── Severity ──────────────────────────────────────────────────

/// Event and detection severity. Ordering is semantic: `Info < Low < Medium
/// < High < Critical`, so `max()` picks the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Raise by `levels`, saturating at `Critical`.
    pub fn escalate(self, levels: u8) -> Severity {
        let mut current = self;
        for _ in 0..levels {
            current = match current {
                Severity::Info => Severity::Low,
                Severity::Low => Severity::Medium,
                Severity::Medium => Severity::High,
                Severity::High | Severity::Critical => Severity::Critical,
            };
        }
        current
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = SeverityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(SeverityParseError(other.to_string())),
        }
    }
}

// ── Transport ─────────────────────────────────────────────────

/// How a raw event reached the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
    Http,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
            Transport::Http => "http",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tenancy ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub plan_tier: String,
    pub default_locale: String,
    pub timezone: String,
    pub alert_recipient: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An API key row. Only the SHA-256 digest of the key is stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub key_hash: String,
    pub prefix: String,
    pub name: String,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ── Events ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RawEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub site_id: Option<String>,
    pub source_id: Option<String>,
    pub received_at: DateTime<Utc>,
    pub source_ip: Option<String>,
    pub transport: String,
    pub raw_message: String,
    pub collector_name: Option<String>,
    pub parsed: bool,
    pub parse_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Exactly one normalized row exists per successfully parsed raw event.
/// Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NormalizedEvent {
    pub id: Uuid,
    pub raw_event_id: Uuid,
    pub tenant_id: Uuid,
    pub site_id: Option<String>,
    pub source_id: Option<String>,
    pub ts: DateTime<Utc>,
    pub vendor: Option<String>,
    pub product: Option<String>,
    pub event_type: String,
    pub subtype: Option<String>,
    pub action: Option<String>,
    pub severity: String,
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub src_user: Option<String>,
    pub dst_user: Option<String>,
    pub src_port: Option<i32>,
    pub dst_port: Option<i32>,
    pub interface: Option<String>,
    pub vdom: Option<String>,
    pub policy_id: Option<String>,
    pub session_id: Option<String>,
    pub message: Option<String>,
    pub kv: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ── Detections & digests ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Detection {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub site_id: Option<String>,
    pub source_id: Option<String>,
    pub detection_type: String,
    pub severity: String,
    pub group_key: String,
    pub window_minutes: i32,
    pub event_count: i64,
    pub first_event_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub evidence: serde_json::Value,
    pub related_event_ids: Vec<Uuid>,
    pub reported_digest_id: Option<Uuid>,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

impl Detection {
    /// Open detections have not yet been folded into a digest and may still
    /// be updated by later rule matches.
    pub fn is_open(&self) -> bool {
        self.reported_digest_id.is_none()
    }

    pub fn severity_level(&self) -> Severity {
        Severity::from_str(&self.severity).unwrap_or(Severity::Info)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Digest {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub severity: String,
    pub detection_count: i32,
    pub event_count: i64,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub locale: String,
    pub created_at: DateTime<Utc>,
}

/// Delivery status values for [`EmailDelivery::status`].
pub const DELIVERY_PENDING: &str = "pending";
pub const DELIVERY_SENT: &str = "sent";
pub const DELIVERY_FAILED: &str = "failed";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmailDelivery {
    pub id: Uuid,
    pub digest_id: Uuid,
    pub tenant_id: Uuid,
    pub recipient: String,
    pub provider_message_id: Option<String>,
    pub status: String,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ── AI outputs ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AiAnalysis {
    pub id: Uuid,
    pub detection_id: Uuid,
    pub tenant_id: Uuid,
    pub threat_detected: bool,
    pub threat_type: Option<String>,
    pub confidence_score: Option<f32>,
    pub severity: Option<String>,
    pub context_summary: Option<String>,
    pub iocs: serde_json::Value,
    pub model_used: Option<String>,
    pub tokens_used: Option<i32>,
    pub latency_ms: Option<i32>,
    pub from_cache: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AiRecommendation {
    pub id: Uuid,
    pub detection_id: Uuid,
    pub tenant_id: Uuid,
    pub urgency: Option<String>,
    pub actions: serde_json::Value,
    pub model_used: Option<String>,
    pub tokens_used: Option<i32>,
    pub latency_ms: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Report status values for [`AiReport::status`].
pub const REPORT_GENERATED: &str = "generated";
pub const REPORT_SENT: &str = "sent";
pub const REPORT_FAILED: &str = "failed";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AiReport {
    pub id: Uuid,
    pub detection_id: Uuid,
    pub tenant_id: Uuid,
    pub subject: String,
    pub body: String,
    pub status: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub judge_result: Option<String>,
    pub judge_reason: Option<String>,
    pub model_used: Option<String>,
    pub tokens_used: Option<i32>,
    pub latency_ms: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AiCacheEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub pattern_signature: String,
    pub detection_type: String,
    pub severity: String,
    pub threat_detected: bool,
    pub threat_type: Option<String>,
    pub confidence_score: Option<f32>,
    pub context_summary: Option<String>,
    pub recommended_actions: Option<serde_json::Value>,
    pub report_subject: Option<String>,
    pub report_body: Option<String>,
    pub hit_count: i64,
    pub last_hit_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub is_valid: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_is_semantic() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Info);
        let worst = [Severity::Medium, Severity::Critical, Severity::Low]
            .into_iter()
            .max()
            .unwrap();
        assert_eq!(worst, Severity::Critical);
    }

    #[test]
    fn severity_roundtrip() {
        for severity in [
            Severity::Info,
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            assert_eq!(Severity::from_str(severity.as_str()).unwrap(), severity);
        }
        assert!(Severity::from_str("catastrophic").is_err());
    }

    #[test]
    fn severity_escalation_caps_at_critical() {
        assert_eq!(Severity::High.escalate(1), Severity::Critical);
        assert_eq!(Severity::High.escalate(2), Severity::Critical);
        assert_eq!(Severity::Medium.escalate(2), Severity::Critical);
        assert_eq!(Severity::Info.escalate(0), Severity::Info);
    }

    #[test]
    fn transport_as_str() {
        assert_eq!(Transport::Udp.as_str(), "udp");
        assert_eq!(Transport::Tcp.as_str(), "tcp");
        assert_eq!(Transport::Http.as_str(), "http");
    }
}

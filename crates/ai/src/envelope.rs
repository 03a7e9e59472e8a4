//! Request/response envelopes for the orchestration mesh.
//!
//! The orchestrator and the agents behind it (analyst, advisor, judge,
//! writer) are external collaborators; only these envelopes are ours.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Request ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct OrchestrateRequest {
    pub tenant_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub detection: DetectionEnvelope,
    pub raw_events: Vec<serde_json::Value>,
    pub normalized_events: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionEnvelope {
    pub detection_type: String,
    pub severity: String,
    pub detected_at: DateTime<Utc>,
    pub group_key: String,
    pub evidence: serde_json::Value,
}

// ── Response ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestrateResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub analysis: Option<Analysis>,
    #[serde(default)]
    pub recommendations: Option<Recommendations>,
    #[serde(default)]
    pub judge: Option<JudgeVerdict>,
    #[serde(default)]
    pub report: Option<Report>,
    #[serde(default)]
    pub latency_ms: Option<i64>,
}

impl OrchestrateResponse {
    pub fn is_no_threat(&self) -> bool {
        self.status.as_deref() == Some("no_threat_detected")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub threat_detected: bool,
    #[serde(default)]
    pub threat_type: Option<String>,
    #[serde(default)]
    pub confidence_score: Option<f32>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub context_summary: Option<String>,
    #[serde(default)]
    pub iocs: Vec<String>,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub tokens_used: Option<i32>,
    #[serde(default)]
    pub latency_ms: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendations {
    #[serde(default)]
    pub urgency: Option<String>,
    #[serde(default)]
    pub actions: Vec<RecommendedAction>,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub tokens_used: Option<i32>,
    #[serde(default)]
    pub latency_ms: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedAction {
    #[serde(default)]
    pub priority: Option<i32>,
    pub action: String,
    #[serde(default)]
    pub cli_commands: Vec<String>,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub reversible: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JudgeVerdict {
    pub result: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl JudgeVerdict {
    pub fn is_pass(&self) -> bool {
        self.result == "pass"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub tokens_used: Option<i32>,
    #[serde(default)]
    pub latency_ms: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_threat_response_parses() {
        let json = r#"{"status":"no_threat_detected","request_id":"req-1","latency_ms":420}"#;
        let response: OrchestrateResponse = serde_json::from_str(json).unwrap();
        assert!(response.is_no_threat());
        assert_eq!(response.request_id.as_deref(), Some("req-1"));
        assert!(response.analysis.is_none());
    }

    #[test]
    fn full_response_parses() {
        let json = r#"{
            "request_id": "req-2",
            "analysis": {
                "threat_detected": true,
                "threat_type": "credential_bruteforce",
                "confidence_score": 0.92,
                "severity": "high",
                "context_summary": "Repeated SSL VPN failures from one address.",
                "iocs": ["203.0.113.50"],
                "model_used": "analyst-v2",
                "tokens_used": 1511,
                "latency_ms": 2100
            },
            "recommendations": {
                "urgency": "high",
                "actions": [
                    {
                        "priority": 1,
                        "action": "Block the source address at the firewall",
                        "cli_commands": ["config firewall address"],
                        "risk_level": "low",
                        "reversible": true
                    }
                ],
                "model_used": "advisor-v2",
                "tokens_used": 833,
                "latency_ms": 1800
            },
            "judge": {"result": "pass", "reason": null},
            "report": {"subject": "VPN brute force detected", "body": "…", "model_used": "writer-v1"},
            "latency_ms": 6200
        }"#;
        let response: OrchestrateResponse = serde_json::from_str(json).unwrap();
        assert!(!response.is_no_threat());
        let analysis = response.analysis.unwrap();
        assert!(analysis.threat_detected);
        assert_eq!(analysis.iocs, vec!["203.0.113.50"]);
        let recommendations = response.recommendations.unwrap();
        assert_eq!(recommendations.actions.len(), 1);
        assert_eq!(recommendations.actions[0].cli_commands.len(), 1);
        assert!(response.judge.unwrap().is_pass());
        assert_eq!(response.report.unwrap().subject, "VPN brute force detected");
    }

    #[test]
    fn judge_fail_verdict() {
        let verdict: JudgeVerdict =
            serde_json::from_str(r#"{"result":"fail","reason":"destructive CLI"}"#).unwrap();
        assert!(!verdict.is_pass());
        assert_eq!(verdict.reason.as_deref(), Some("destructive CLI"));
    }

    #[test]
    fn request_serializes_without_null_optionals() {
        let request = OrchestrateRequest {
            tenant_id: Uuid::nil(),
            site_id: None,
            source_id: None,
            detection: DetectionEnvelope {
                detection_type: "vpn_bruteforce".to_string(),
                severity: "high".to_string(),
                detected_at: Utc::now(),
                group_key: "203.0.113.50".to_string(),
                evidence: serde_json::json!({"event_count": 6}),
            },
            raw_events: vec![],
            normalized_events: vec![],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("site_id").is_none());
        assert_eq!(value["detection"]["group_key"], "203.0.113.50");
    }
}

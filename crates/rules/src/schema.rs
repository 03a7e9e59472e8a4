//! Rule definitions.

use serde::{Deserialize, Serialize};

use centinela_core::Severity;

/// How matching events are grouped before the threshold check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    SrcIp,
    SrcUser,
    SrcIpUser,
}

impl GroupBy {
    /// SQL expression producing the group key. NULL keys are excluded from
    /// grouping; an event without the field cannot participate.
    pub fn key_expr(&self) -> &'static str {
        match self {
            GroupBy::SrcIp => "src_ip",
            GroupBy::SrcUser => "src_user",
            GroupBy::SrcIpUser => "(src_ip || '|' || src_user)",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Stable rule name; doubles as `detection_type` on produced detections.
    pub name: String,
    pub event_types: Vec<String>,
    /// Minimum matching events in the window to raise a detection.
    pub threshold: i64,
    pub window_minutes: i64,
    pub severity: Severity,
    pub group_by: GroupBy,
}

impl Rule {
    /// Detection severity for a given match count: base severity, raised by
    /// one level at 5× threshold and two at 20×, capped at critical.
    pub fn severity_for_count(&self, count: i64) -> Severity {
        if count >= self.threshold.saturating_mul(20) {
            self.severity.escalate(2)
        } else if count >= self.threshold.saturating_mul(5) {
            self.severity.escalate(1)
        } else {
            self.severity
        }
    }
}

/// The built-in MVP rule set.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "vpn_bruteforce".to_string(),
            event_types: vec!["vpn_login_fail".to_string()],
            threshold: 3,
            window_minutes: 15,
            severity: Severity::High,
            group_by: GroupBy::SrcIp,
        },
        Rule {
            name: "admin_bruteforce".to_string(),
            event_types: vec!["admin_login_fail".to_string()],
            threshold: 3,
            window_minutes: 15,
            severity: Severity::Critical,
            group_by: GroupBy::SrcIp,
        },
        Rule {
            name: "config_change_burst".to_string(),
            event_types: vec!["config_change".to_string()],
            threshold: 10,
            window_minutes: 5,
            severity: Severity::Medium,
            group_by: GroupBy::SrcUser,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_match_mvp_set() {
        let rules = default_rules();
        assert_eq!(rules.len(), 3);

        let vpn = &rules[0];
        assert_eq!(vpn.name, "vpn_bruteforce");
        assert_eq!(vpn.threshold, 3);
        assert_eq!(vpn.window_minutes, 15);
        assert_eq!(vpn.severity, Severity::High);
        assert_eq!(vpn.group_by, GroupBy::SrcIp);

        let admin = &rules[1];
        assert_eq!(admin.severity, Severity::Critical);

        let config = &rules[2];
        assert_eq!(config.threshold, 10);
        assert_eq!(config.window_minutes, 5);
        assert_eq!(config.group_by, GroupBy::SrcUser);
    }

    #[test]
    fn group_key_expressions() {
        assert_eq!(GroupBy::SrcIp.key_expr(), "src_ip");
        assert_eq!(GroupBy::SrcUser.key_expr(), "src_user");
        assert_eq!(GroupBy::SrcIpUser.key_expr(), "(src_ip || '|' || src_user)");
    }

    #[test]
    fn escalation_thresholds() {
        let rule = &default_rules()[0]; // high, threshold 3
        assert_eq!(rule.severity_for_count(3), Severity::High);
        assert_eq!(rule.severity_for_count(14), Severity::High);
        assert_eq!(rule.severity_for_count(15), Severity::Critical); // 5×
        assert_eq!(rule.severity_for_count(60), Severity::Critical); // 20×, capped
    }

    #[test]
    fn escalation_from_medium_reaches_critical_at_20x() {
        let rule = Rule {
            name: "config_change_burst".to_string(),
            event_types: vec!["config_change".to_string()],
            threshold: 10,
            window_minutes: 5,
            severity: Severity::Medium,
            group_by: GroupBy::SrcUser,
        };
        assert_eq!(rule.severity_for_count(49), Severity::Medium);
        assert_eq!(rule.severity_for_count(50), Severity::High);
        assert_eq!(rule.severity_for_count(200), Severity::Critical);
    }
}

//! Deterministic mappings from vendor fields to pipeline vocabulary.

use centinela_core::Severity;

/// Map `(type, subtype, action)` to the canonical event type the rules
/// engine matches on.
///
/// Known triples get a stable name; unknown combinations degrade to
/// `"<type>_<subtype>"`, and lines with neither field become `"unknown"`.
pub fn map_event_type(
    log_type: Option<&str>,
    subtype: Option<&str>,
    action: Option<&str>,
) -> String {
    let triple = (
        log_type.unwrap_or(""),
        subtype.unwrap_or(""),
        action.unwrap_or(""),
    );

    match triple {
        ("event", "vpn", "ssl-login-fail") => "vpn_login_fail".to_string(),
        ("event", "vpn", "ipsec-login-fail") => "vpn_login_fail".to_string(),
        ("event", "vpn", "ssl-login") => "vpn_login".to_string(),
        ("event", "vpn", "tunnel-up") => "vpn_tunnel_up".to_string(),
        ("event", "vpn", "tunnel-down") => "vpn_tunnel_down".to_string(),
        ("event", "system", "login-fail") => "admin_login_fail".to_string(),
        ("event", "admin", "login-fail") => "admin_login_fail".to_string(),
        ("event", "system", "login") => "admin_login".to_string(),
        ("event", "system", "edit") => "config_change".to_string(),
        ("event", "system", "add") => "config_change".to_string(),
        ("event", "system", "delete") => "config_change".to_string(),
        ("event", "system", "config-change") => "config_change".to_string(),
        ("event", "system", "reboot") => "system_reboot".to_string(),
        ("traffic", "forward", "deny") => "traffic_denied".to_string(),
        ("traffic", "forward", "accept") => "traffic_allowed".to_string(),
        ("utm", "ips", _) => "ips_alert".to_string(),
        ("utm", "virus", _) => "av_alert".to_string(),
        ("", "", _) => "unknown".to_string(),
        (log_type, "", _) => sanitize(log_type),
        ("", subtype, _) => sanitize(subtype),
        (log_type, subtype, _) => format!("{}_{}", sanitize(log_type), sanitize(subtype)),
    }
}

/// Map a vendor-native level to pipeline severity.
pub fn map_severity(level: Option<&str>) -> Severity {
    match level.unwrap_or("") {
        "emergency" | "alert" | "critical" => Severity::Critical,
        "error" => Severity::High,
        "warning" => Severity::Medium,
        "notice" => Severity::Low,
        _ => Severity::Info,
    }
}

fn sanitize(part: &str) -> String {
    part.to_ascii_lowercase().replace([' ', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_triples_map_to_stable_names() {
        assert_eq!(
            map_event_type(Some("event"), Some("vpn"), Some("ssl-login-fail")),
            "vpn_login_fail"
        );
        assert_eq!(
            map_event_type(Some("event"), Some("system"), Some("login-fail")),
            "admin_login_fail"
        );
        assert_eq!(
            map_event_type(Some("event"), Some("system"), Some("edit")),
            "config_change"
        );
    }

    #[test]
    fn unknown_triples_degrade_to_type_subtype() {
        assert_eq!(
            map_event_type(Some("event"), Some("wireless"), Some("assoc")),
            "event_wireless"
        );
        assert_eq!(map_event_type(Some("dns"), None, None), "dns");
        assert_eq!(map_event_type(None, None, Some("whatever")), "unknown");
    }

    #[test]
    fn severity_table() {
        assert_eq!(map_severity(Some("emergency")), Severity::Critical);
        assert_eq!(map_severity(Some("alert")), Severity::Critical);
        assert_eq!(map_severity(Some("critical")), Severity::Critical);
        assert_eq!(map_severity(Some("error")), Severity::High);
        assert_eq!(map_severity(Some("warning")), Severity::Medium);
        assert_eq!(map_severity(Some("notice")), Severity::Low);
        assert_eq!(map_severity(Some("information")), Severity::Info);
        assert_eq!(map_severity(None), Severity::Info);
    }
}

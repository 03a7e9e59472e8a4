//! Vendor log parsing behind a pluggable trait.
//!
//! The normalizer is vendor-agnostic: it hands each raw syslog line to a
//! [`LogParser`] and receives a [`ParsedEvent`]: a typed record plus a
//! free-form key/value side channel. The side channel is carried opaquely;
//! nothing downstream makes safety-critical decisions by introspecting it.
//!
//! The reference implementation is [`fortigate::FortiGateParser`] for
//! FortiGate key=value logs.

pub mod fortigate;
pub mod mapping;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fortigate::FortiGateParser;
pub use mapping::{map_event_type, map_severity};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty log line")]
    Empty,

    #[error("malformed log line: {0}")]
    Malformed(String),
}

/// Structured fields extracted from one raw log line.
///
/// Every field is optional: vendors disagree about what a log line carries,
/// and the normalizer has fallbacks for the ones it needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedEvent {
    pub vendor: Option<String>,
    pub product: Option<String>,
    /// Vendor log category (`type` in FortiGate logs).
    pub log_type: Option<String>,
    pub subtype: Option<String>,
    /// Canonical action, lowercased with status folded in
    /// (e.g. `login` + `status=failed` becomes `login-fail`).
    pub action: Option<String>,
    /// Vendor-native level string (`emergency` … `debug`).
    pub level: Option<String>,
    /// Event timestamp derived from the log's own date/time/tz fields.
    pub ts: Option<DateTime<Utc>>,
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
    /// Everything the line carried, verbatim.
    pub kv: HashMap<String, String>,
}

/// Parser seam. The pipeline owns a `Box<dyn LogParser>` and never knows
/// which vendor it is parsing.
pub trait LogParser: Send + Sync {
    /// Parse one raw syslog line.
    fn parse(&self, raw: &str) -> Result<ParsedEvent, ParseError>;

    /// Vendor name stamped on normalized events (e.g. `"Fortinet"`).
    fn vendor(&self) -> &str;
}

/// Pull an IP address out of a trailing `…(203.0.113.7)` UI pattern, the
/// form FortiGate uses in GUI-originated messages.
pub fn extract_parenthesized_ip(message: &str) -> Option<String> {
    let open = message.rfind('(')?;
    let close = message[open..].find(')')? + open;
    let candidate = message[open + 1..close].trim();
    candidate.parse::<std::net::IpAddr>().ok()?;
    Some(candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parenthesized_ip_extracted() {
        assert_eq!(
            extract_parenthesized_ip("Administrator admin logged in from GUI(203.0.113.50)"),
            Some("203.0.113.50".to_string())
        );
    }

    #[test]
    fn parenthesized_ipv6_extracted() {
        assert_eq!(
            extract_parenthesized_ip("login from ssh(2001:db8::1)"),
            Some("2001:db8::1".to_string())
        );
    }

    #[test]
    fn parenthesized_non_ip_ignored() {
        assert_eq!(extract_parenthesized_ip("session torn down (idle timeout)"), None);
        assert_eq!(extract_parenthesized_ip("no parens at all"), None);
    }

    #[test]
    fn last_parens_win() {
        assert_eq!(
            extract_parenthesized_ip("user (admin) from GUI(198.51.100.9)"),
            Some("198.51.100.9".to_string())
        );
    }
}

//! FortiGate key=value log parser.
//!
//! FortiGate emits syslog bodies as space-separated `key=value` pairs where
//! values may be double-quoted (`msg="SSL user failed to logged in"`). The
//! tokenizer here is tolerant: unquoted values run to the next space, quoted
//! values honor backslash escapes, and stray tokens without `=` are skipped.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::{LogParser, ParseError, ParsedEvent};

pub struct FortiGateParser;

impl FortiGateParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FortiGateParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser for FortiGateParser {
    fn parse(&self, raw: &str) -> Result<ParsedEvent, ParseError> {
        let line = strip_syslog_prefix(raw.trim());
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let kv = tokenize(line);
        if kv.is_empty() {
            return Err(ParseError::Malformed(
                "no key=value pairs found".to_string(),
            ));
        }

        let get = |key: &str| kv.get(key).cloned();

        let mut event = ParsedEvent {
            vendor: Some("Fortinet".to_string()),
            product: Some("FortiGate".to_string()),
            log_type: get("type"),
            subtype: get("subtype"),
            action: canonical_action(&kv),
            level: get("level").map(|l| l.to_ascii_lowercase()),
            ts: derive_timestamp(&kv),
            src_ip: get("srcip").or_else(|| get("remip")),
            dst_ip: get("dstip").or_else(|| get("locip")),
            src_user: get("user").or_else(|| get("srcuser")),
            dst_user: get("dstuser"),
            src_port: get("srcport").or_else(|| get("remport")).and_then(|p| p.parse().ok()),
            dst_port: get("dstport").or_else(|| get("locport")).and_then(|p| p.parse().ok()),
            interface: get("srcintf").or_else(|| get("intf")),
            vdom: get("vd"),
            policy_id: get("policyid"),
            session_id: get("sessionid"),
            message: get("msg").or_else(|| get("logdesc")),
            kv: HashMap::new(),
        };
        event.kv = kv;
        Ok(event)
    }

    fn vendor(&self) -> &str {
        "Fortinet"
    }
}

/// Drop a leading RFC 3164 priority tag (`<190>`) and anything before the
/// first `key=` token, so lines relayed with a syslog header still parse.
fn strip_syslog_prefix(line: &str) -> &str {
    let line = if line.starts_with('<') {
        match line.find('>') {
            Some(pos) => &line[pos + 1..],
            None => line,
        }
    } else {
        line
    };

    // The body starts at the first token containing '='; anything before it
    // is relay header (timestamp, hostname).
    let mut rest = line.trim_start();
    loop {
        let token_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        if token_end == rest.len() || rest[..token_end].contains('=') {
            return rest;
        }
        rest = rest[token_end..].trim_start();
    }
}

/// Split a line into key=value pairs, honoring double quotes and backslash
/// escapes inside quoted values.
fn tokenize(line: &str) -> HashMap<String, String> {
    let mut pairs = HashMap::new();
    let mut chars = line.chars().peekable();

    while chars.peek().is_some() {
        // Skip whitespace between tokens.
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        let mut key = String::new();
        let mut found_eq = false;
        for c in chars.by_ref() {
            if c == '=' {
                found_eq = true;
                break;
            }
            if c.is_whitespace() {
                break;
            }
            key.push(c);
        }
        if !found_eq || key.is_empty() {
            continue;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut escaped = false;
            for c in chars.by_ref() {
                if escaped {
                    value.push(c);
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    break;
                } else {
                    value.push(c);
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        pairs.insert(key, value);
    }

    pairs
}

/// Canonical action string: lowercase the vendor action, and fold a failed
/// `status` into it so `action=login status=failed` reads `login-fail`.
fn canonical_action(kv: &HashMap<String, String>) -> Option<String> {
    let action = kv.get("action")?.to_ascii_lowercase().replace('_', "-");
    match kv.get("status").map(|s| s.to_ascii_lowercase()) {
        Some(status) if status == "failed" || status == "failure" => {
            if action.ends_with("-fail") || action.ends_with("-failed") {
                Some(action)
            } else {
                Some(format!("{action}-fail"))
            }
        }
        _ => Some(action),
    }
}

/// Derive the event timestamp from `date` + `time` (+ optional `tz`), falling
/// back to epoch `eventtime` (seconds or nanoseconds).
fn derive_timestamp(kv: &HashMap<String, String>) -> Option<DateTime<Utc>> {
    if let (Some(date), Some(time)) = (kv.get("date"), kv.get("time")) {
        let naive_date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok();
        let naive_time = NaiveTime::parse_from_str(time, "%H:%M:%S").ok();
        if let (Some(d), Some(t)) = (naive_date, naive_time) {
            let naive = NaiveDateTime::new(d, t);
            if let Some(offset) = kv.get("tz").and_then(|tz| parse_tz_offset(tz)) {
                if let Some(local) = offset.from_local_datetime(&naive).single() {
                    return Some(local.with_timezone(&Utc));
                }
            }
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    let raw = kv.get("eventtime")?;
    let epoch: i64 = raw.parse().ok()?;
    // eventtime is nanoseconds on recent FortiOS, seconds on older releases.
    if epoch > 100_000_000_000_000 {
        DateTime::from_timestamp(epoch / 1_000_000_000, (epoch % 1_000_000_000) as u32)
    } else {
        DateTime::from_timestamp(epoch, 0)
    }
}

/// Parse a `+0100` / `-0530` offset string.
fn parse_tz_offset(tz: &str) -> Option<FixedOffset> {
    let tz = tz.trim();
    if tz.len() != 5 {
        return None;
    }
    let sign = match tz.as_bytes()[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let hours: i32 = tz[1..3].parse().ok()?;
    let minutes: i32 = tz[3..5].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

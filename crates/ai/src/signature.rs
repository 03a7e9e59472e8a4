//! Pattern signatures.
//!
//! A signature is the SHA-256 of a canonical serialization of
//! `{detection_type, severity, count_buckets}`. Numeric evidence is
//! discretized into ranges so similar-but-not-identical incidents share a
//! cached response: 17 failed logins and 20 failed logins are the same
//! pattern; 2 and 200 are not.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use centinela_core::Detection;

/// Discretize a count into its bucket label.
pub fn bucketize_count(count: i64) -> &'static str {
    match count {
        i64::MIN..=1 => "1",
        2..=5 => "2-5",
        6..=10 => "6-10",
        11..=25 => "11-25",
        26..=50 => "26-50",
        51..=100 => "51-100",
        _ => "100+",
    }
}

/// Compute the signature for a detection shape. `counts` holds the numeric
/// evidence fields by name; a `BTreeMap` keeps the serialization canonical
/// regardless of insertion order.
pub fn compute_signature(
    detection_type: &str,
    severity: &str,
    counts: &[(&str, i64)],
) -> String {
    let buckets: BTreeMap<&str, &str> = counts
        .iter()
        .map(|(name, count)| (*name, bucketize_count(*count)))
        .collect();

    let canonical = serde_json::json!({
        "detection_type": detection_type,
        "severity": severity,
        "count_buckets": buckets,
    });

    // BTreeMap ordering plus serde_json's stable field order make this
    // serialization deterministic.
    let serialized = canonical.to_string();
    hex::encode(Sha256::digest(serialized.as_bytes()))
}

/// Signature for a stored detection: event count plus the distinct source
/// IP/user counts from its evidence.
pub fn signature_for_detection(detection: &Detection) -> String {
    let distinct_ips = evidence_array_len(&detection.evidence, "distinct_src_ips");
    let distinct_users = evidence_array_len(&detection.evidence, "distinct_src_users");
    compute_signature(
        &detection.detection_type,
        &detection.severity,
        &[
            ("event_count", detection.event_count),
            ("distinct_src_ips", distinct_ips),
            ("distinct_src_users", distinct_users),
        ],
    )
}

fn evidence_array_len(evidence: &serde_json::Value, field: &str) -> i64 {
    evidence
        .get(field)
        .and_then(|v| v.as_array())
        .map(|a| a.len() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_boundaries() {
        assert_eq!(bucketize_count(0), "1");
        assert_eq!(bucketize_count(1), "1");
        assert_eq!(bucketize_count(2), "2-5");
        assert_eq!(bucketize_count(5), "2-5");
        assert_eq!(bucketize_count(6), "6-10");
        assert_eq!(bucketize_count(10), "6-10");
        assert_eq!(bucketize_count(11), "11-25");
        assert_eq!(bucketize_count(25), "11-25");
        assert_eq!(bucketize_count(26), "26-50");
        assert_eq!(bucketize_count(50), "26-50");
        assert_eq!(bucketize_count(51), "51-100");
        assert_eq!(bucketize_count(100), "51-100");
        assert_eq!(bucketize_count(101), "100+");
        assert_eq!(bucketize_count(1_000_000), "100+");
    }

    #[test]
    fn same_bucket_same_signature() {
        let a = compute_signature("vpn_bruteforce", "high", &[("event_count", 12)]);
        let b = compute_signature("vpn_bruteforce", "high", &[("event_count", 25)]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_bucket_different_signature() {
        let a = compute_signature("vpn_bruteforce", "high", &[("event_count", 12)]);
        let b = compute_signature("vpn_bruteforce", "high", &[("event_count", 26)]);
        assert_ne!(a, b);
    }

    #[test]
    fn type_and_severity_are_part_of_the_pattern() {
        let base = compute_signature("vpn_bruteforce", "high", &[("event_count", 4)]);
        assert_ne!(
            base,
            compute_signature("admin_bruteforce", "high", &[("event_count", 4)])
        );
        assert_ne!(
            base,
            compute_signature("vpn_bruteforce", "critical", &[("event_count", 4)])
        );
    }

    #[test]
    fn count_order_does_not_matter() {
        let a = compute_signature("x", "low", &[("a", 1), ("b", 7)]);
        let b = compute_signature("x", "low", &[("b", 7), ("a", 1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn signature_is_a_sha256_hex() {
        let sig = compute_signature("x", "low", &[]);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

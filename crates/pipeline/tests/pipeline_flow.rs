//! End-to-end pipeline tests against a real PostgreSQL.
//!
//! These need `DATABASE_URL` pointing at a scratch database and are
//! `#[ignore]`d for CI; run with `cargo test -p centinela-pipeline -- --ignored`.
//! Every test creates its own tenant and scopes all assertions to it, so
//! repeated runs against the same database stay independent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use centinela_ai::{AiKnowledgeCache, CachePayload};
use centinela_notify::{DigestSender, NotifyError, OutboundEmail};
use centinela_parser::FortiGateParser;
use centinela_pipeline::{Batcher, EmailDispatcher, Normalizer};
use centinela_rules::{default_rules, RulesEngine};

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch database");
    let pool = PgPool::connect(&url).await.expect("connect");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}

async fn create_tenant(pool: &PgPool, recipient: Option<&str>) -> Uuid {
    let (id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO tenants (name, plan_tier, default_locale, alert_recipient) \
         VALUES ($1, 'pro', 'en', $2) RETURNING id",
    )
    .bind(format!("test-{}", Uuid::new_v4()))
    .bind(recipient)
    .fetch_one(pool)
    .await
    .expect("insert tenant");
    id
}

/// A recent FortiGate SSL VPN login failure from `src_ip`, varying the user.
fn vpn_fail_line(src_ip: &str, user_index: usize) -> String {
    let now = Utc::now();
    format!(
        "date={} time={} devname=\"FGT60E\" logid=\"0101039426\" type=\"event\" \
         subtype=\"vpn\" level=\"alert\" vd=\"root\" action=\"ssl-login-fail\" \
         remip={} user=\"user{}\" reason=\"sslvpn_login_unknown_user\" \
         msg=\"SSL user failed to logged in\"",
        now.format("%Y-%m-%d"),
        now.format("%H:%M:%S"),
        src_ip,
        user_index
    )
}

async fn insert_raw(pool: &PgPool, tenant_id: Uuid, raw_message: &str) {
    sqlx::query(
        "INSERT INTO raw_events (tenant_id, received_at, source_ip, transport, raw_message) \
         VALUES ($1, now(), '10.0.0.1', 'udp', $2)",
    )
    .bind(tenant_id)
    .bind(raw_message)
    .execute(pool)
    .await
    .expect("insert raw event");
}

async fn count_scalar(pool: &PgPool, sql: &str, tenant_id: Uuid) -> i64 {
    let (count,): (i64,) = sqlx::query_as(sql)
        .bind(tenant_id)
        .fetch_one(pool)
        .await
        .expect("count query");
    count
}

struct MockSender {
    sends: AtomicUsize,
}

#[async_trait::async_trait]
impl DigestSender for MockSender {
    async fn send(&self, _email: &OutboundEmail) -> Result<String, NotifyError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok("mock-message-id".to_string())
    }
}

/// Seed scenarios 1-3 plus the replay/idempotence properties, end to end:
/// normalize → detect → dedupe on replay → digest → send → no-op re-run.
#[tokio::test]
#[ignore]
async fn vpn_bruteforce_flow_end_to_end() {
    let pool = test_pool().await;
    let tenant_id = create_tenant(&pool, Some("soc@example.com")).await;
    let src_ip = "192.168.100.50";

    // 6 failures from one address within seconds.
    for n in 0..6 {
        insert_raw(&pool, tenant_id, &vpn_fail_line(src_ip, n)).await;
    }

    let normalizer = Normalizer::new(pool.clone(), Box::new(FortiGateParser::new()));
    assert_eq!(normalizer.normalize_batch(500).await.unwrap(), 6);
    assert_eq!(
        count_scalar(
            &pool,
            "SELECT COUNT(*) FROM normalized_events \
             WHERE tenant_id = $1 AND event_type = 'vpn_login_fail'",
            tenant_id,
        )
        .await,
        6
    );

    // Scenario 1: exactly one detection, grouped by source ip.
    let engine = RulesEngine::new(pool.clone(), default_rules());
    engine.evaluate_all().await.unwrap();

    let detections: Vec<(String, String, String, i64)> = sqlx::query_as(
        "SELECT detection_type, severity, group_key, event_count FROM detections \
         WHERE tenant_id = $1 AND reported_digest_id IS NULL",
    )
    .bind(tenant_id)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(detections.len(), 1);
    let (detection_type, severity, group_key, event_count) = &detections[0];
    assert_eq!(detection_type, "vpn_bruteforce");
    assert_eq!(severity, "high");
    assert_eq!(group_key, src_ip);
    assert_eq!(*event_count, 6);

    // Scenario 2: replay the same six events. Raw and normalized double,
    // the open detection does not.
    for n in 0..6 {
        insert_raw(&pool, tenant_id, &vpn_fail_line(src_ip, n)).await;
    }
    assert_eq!(normalizer.normalize_batch(500).await.unwrap(), 6);
    engine.evaluate_all().await.unwrap();

    assert_eq!(
        count_scalar(&pool, "SELECT COUNT(*) FROM raw_events WHERE tenant_id = $1", tenant_id).await,
        12
    );
    assert_eq!(
        count_scalar(
            &pool,
            "SELECT COUNT(*) FROM normalized_events WHERE tenant_id = $1",
            tenant_id,
        )
        .await,
        12
    );
    let open: Vec<(i64,)> = sqlx::query_as(
        "SELECT event_count FROM detections \
         WHERE tenant_id = $1 AND reported_digest_id IS NULL",
    )
    .bind(tenant_id)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(open.len(), 1, "replay must update, not insert");
    assert_eq!(open[0].0, 12);

    // Scenario 3: batching folds the open detections into one digest.
    let batcher = Batcher::new(pool.clone());
    let summary = batcher.run().await.unwrap();
    assert!(summary.digests_created >= 1);

    let digests: Vec<(String, i32, i64)> = sqlx::query_as(
        "SELECT severity, detection_count, event_count FROM digests WHERE tenant_id = $1",
    )
    .bind(tenant_id)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(digests.len(), 1);
    assert_eq!(digests[0].0, "high");
    assert_eq!(digests[0].1, 1);
    assert_eq!(digests[0].2, 12);
    assert_eq!(
        count_scalar(
            &pool,
            "SELECT COUNT(*) FROM detections \
             WHERE tenant_id = $1 AND reported_digest_id IS NULL",
            tenant_id,
        )
        .await,
        0,
        "batched detections are frozen"
    );

    // Send: one delivery row, and a second dispatcher pass sends nothing.
    let sender = Arc::new(MockSender {
        sends: AtomicUsize::new(0),
    });
    let dispatcher = EmailDispatcher::new(pool.clone(), sender.clone(), None);
    let dispatch = dispatcher.run().await.unwrap();
    assert!(dispatch.sent >= 1);
    let first_round = sender.sends.load(Ordering::SeqCst);
    assert!(first_round >= 1);

    dispatcher.run().await.unwrap();
    let tenant_sends: i64 = count_scalar(
        &pool,
        "SELECT COUNT(*) FROM email_deliveries \
         WHERE tenant_id = $1 AND status = 'sent'",
        tenant_id,
    )
    .await;
    assert_eq!(tenant_sends, 1, "a delivered digest is never re-sent");

    // Idempotence: with no new events the whole pipeline is a no-op.
    assert_eq!(normalizer.normalize_batch(500).await.unwrap(), 0);
    engine.evaluate_all().await.unwrap();
    let summary = batcher.run().await.unwrap();
    assert_eq!(summary.digests_created, 0);
}

/// Two detections of different severity produce one digest at the max
/// severity with summed counts.
#[tokio::test]
#[ignore]
async fn digest_aggregates_mixed_severities() {
    let pool = test_pool().await;
    let tenant_id = create_tenant(&pool, Some("soc@example.com")).await;

    for (detection_type, severity, group_key, event_count) in [
        ("admin_bruteforce", "critical", "198.51.100.7", 5i64),
        ("config_change_burst", "medium", "jsmith", 11i64),
    ] {
        sqlx::query(
            "INSERT INTO detections \
             (tenant_id, detection_type, severity, group_key, window_minutes, event_count, \
              first_event_at, last_event_at) \
             VALUES ($1, $2, $3, $4, 15, $5, now() - interval '10 minutes', now())",
        )
        .bind(tenant_id)
        .bind(detection_type)
        .bind(severity)
        .bind(group_key)
        .bind(event_count)
        .execute(&pool)
        .await
        .unwrap();
    }

    Batcher::new(pool.clone()).run().await.unwrap();

    let (severity, detection_count, event_count): (String, i32, i64) = sqlx::query_as(
        "SELECT severity, detection_count, event_count FROM digests WHERE tenant_id = $1",
    )
    .bind(tenant_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(severity, "critical");
    assert_eq!(detection_count, 2);
    assert_eq!(event_count, 16);
}

/// AI cache operations: upsert, hit-touch on lookup, type invalidation,
/// cleanup.
#[tokio::test]
#[ignore]
async fn ai_cache_lifecycle() {
    let pool = test_pool().await;
    let tenant_id = create_tenant(&pool, None).await;
    let cache = AiKnowledgeCache::new(pool.clone(), 30);
    let signature = centinela_ai::compute_signature(
        "vpn_bruteforce",
        "high",
        &[("event_count", 12)],
    );

    assert!(cache.lookup(tenant_id, &signature).await.unwrap().is_none());

    cache
        .upsert(
            tenant_id,
            &signature,
            &CachePayload {
                detection_type: "vpn_bruteforce".to_string(),
                severity: "high".to_string(),
                threat_detected: true,
                context_summary: Some("Repeated VPN failures.".to_string()),
                report_subject: Some("VPN brute force".to_string()),
                report_body: Some("Details…".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let hit = cache.lookup(tenant_id, &signature).await.unwrap().unwrap();
    assert!(hit.threat_detected);
    assert_eq!(hit.hit_count, 1);
    let hit = cache.lookup(tenant_id, &signature).await.unwrap().unwrap();
    assert_eq!(hit.hit_count, 2);

    // Rule semantics changed for this type: everything cached is stale.
    let invalidated = cache
        .invalidate_by_type(tenant_id, "vpn_bruteforce")
        .await
        .unwrap();
    assert_eq!(invalidated, 1);
    assert!(cache.lookup(tenant_id, &signature).await.unwrap().is_none());

    let deleted = cache.cleanup().await.unwrap();
    assert!(deleted >= 1);
}

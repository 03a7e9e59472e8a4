//! Backend health endpoint.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct QueueStatus {
    pub depth: u64,
    pub recent_failures: usize,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub db: bool,
    pub redis: bool,
    pub ingest_queue: Option<QueueStatus>,
    pub rate_limit_fail_open: u64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let db = sqlx::query("SELECT 1")
        .execute(&state.pool)
        .await
        .is_ok();
    let redis = {
        let mut conn = state.redis.clone();
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    };

    let ingest_queue = if redis {
        let depth = state.ingest_queue.depth().await.unwrap_or(0);
        let recent_failures = state
            .ingest_queue
            .failed_jobs(20)
            .await
            .map(|jobs| jobs.len())
            .unwrap_or(0);
        Some(QueueStatus {
            depth,
            recent_failures,
        })
    } else {
        None
    };

    Json(HealthResponse {
        status: if db && redis { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        db,
        redis,
        ingest_queue,
        rate_limit_fail_open: state.rate_limit_fail_open.load(Ordering::Relaxed),
    })
}

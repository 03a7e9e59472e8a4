//! Health and metrics HTTP endpoints.
//!
//! `/healthz` answers whenever the process is up; `/readyz` reflects buffer
//! and DLQ pressure; `/metrics` serves the full counters snapshot;
//! `/status` is the terse classification for dashboards.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::watch;
use tracing::info;

use centinela_core::CollectorConfig;

use crate::buffer::EventBuffer;
use crate::metrics::Metrics;
use crate::retry::RetryQueue;

/// Readiness thresholds: above these the collector reports unready.
const READY_MAX_BUFFER_PERCENT: f64 = 90.0;
const READY_MAX_DLQ: usize = 100;

pub struct HealthState {
    pub config: CollectorConfig,
    pub metrics: Arc<Metrics>,
    pub buffer: Arc<EventBuffer>,
    pub retry: Arc<RetryQueue>,
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .with_state(state)
}

pub async fn serve(
    state: Arc<HealthState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let port = state.config.health_port;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "health server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

fn is_ready(state: &HealthState) -> (bool, f64, usize) {
    let usage = state.buffer.usage_percent();
    let dlq = state.retry.dlq_len();
    (
        usage <= READY_MAX_BUFFER_PERCENT && dlq <= READY_MAX_DLQ,
        usage,
        dlq,
    )
}

async fn readyz(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let (ready, usage, dlq) = is_ready(&state);
    let body = serde_json::json!({
        "ready": ready,
        "buffer_usage_percent": usage,
        "retry": {
            "queued": state.retry.len(),
            "dlq": dlq,
            "success": state.metrics.retry_success.load(Ordering::Relaxed),
        },
    });
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

async fn metrics(State(state): State<Arc<HealthState>>) -> Json<serde_json::Value> {
    Json(state.metrics.snapshot(
        &state.config,
        state.buffer.len(),
        state.retry.len(),
    ))
}

async fn status(State(state): State<Arc<HealthState>>) -> Json<serde_json::Value> {
    let (ready, usage, dlq) = is_ready(&state);
    let classification = if !ready {
        "unhealthy"
    } else if usage > 50.0 || dlq > 0 {
        "degraded"
    } else {
        "healthy"
    };
    Json(serde_json::json!({"status": classification}))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(buffer_max: usize) -> HealthState {
        HealthState {
            config: CollectorConfig {
                api_url: "http://localhost:3000".to_string(),
                api_key: "k".to_string(),
                udp_enabled: true,
                udp_port: 5514,
                udp_bind: "0.0.0.0".to_string(),
                tcp_enabled: true,
                tcp_port: 5514,
                tcp_bind: "0.0.0.0".to_string(),
                health_port: 0,
                batch_size: 10,
                flush_interval_ms: 1000,
                max_buffer_size: buffer_max,
                max_retries: 2,
                retry_base_delay_ms: 100,
                retry_max_delay_ms: 1000,
                retry_check_interval_ms: 100,
                collector_name: "test".to_string(),
                site_id: None,
                log_level: "info".to_string(),
            },
            metrics: Arc::new(Metrics::new()),
            buffer: Arc::new(EventBuffer::new(buffer_max)),
            retry: Arc::new(RetryQueue::new(100, 1000, 2)),
        }
    }

    #[test]
    fn ready_when_buffer_low_and_dlq_empty() {
        let state = state(10);
        let (ready, usage, dlq) = is_ready(&state);
        assert!(ready);
        assert_eq!(usage, 0.0);
        assert_eq!(dlq, 0);
    }

    #[test]
    fn unready_when_buffer_over_90_percent() {
        let state = state(10);
        for n in 0..10 {
            state
                .buffer
                .push(crate::buffer::CollectedEvent::new(format!("e{n}"), None));
        }
        let (ready, usage, _) = is_ready(&state);
        assert!(!ready);
        assert_eq!(usage, 100.0);
    }

    #[test]
    fn unready_when_dlq_exceeds_limit() {
        let state = state(10);
        for n in 0..=READY_MAX_DLQ {
            state
                .retry
                .dead_letter(crate::buffer::CollectedEvent::new(format!("e{n}"), None));
        }
        let (ready, _, dlq) = is_ready(&state);
        assert!(!ready);
        assert_eq!(dlq, READY_MAX_DLQ + 1);
    }
}

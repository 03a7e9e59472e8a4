//! In-process metrics registry.
//!
//! A single struct of atomic counters shared by every loop in the collector.
//! The conservation property `received == sent + failed + dropped + pending`
//! holds at all times: each received event is in exactly one terminal or
//! pending state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use centinela_core::CollectorConfig;

pub struct Metrics {
    started: Instant,

    pub received: AtomicU64,
    pub sent: AtomicU64,
    /// Events that exhausted their retry budget (DLQ'd).
    pub failed: AtomicU64,
    /// Events refused by the saturated buffer.
    pub dropped: AtomicU64,

    pub retry_queued: AtomicU64,
    pub retry_success: AtomicU64,
    pub retry_dlq: AtomicU64,

    latency_total_us: AtomicU64,
    latency_samples: AtomicU64,
    latency_last_us: AtomicU64,

    /// Currently open TCP connections (gauge).
    pub tcp_connections: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            received: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            retry_queued: AtomicU64::new(0),
            retry_success: AtomicU64::new(0),
            retry_dlq: AtomicU64::new(0),
            latency_total_us: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
            latency_last_us: AtomicU64::new(0),
            tcp_connections: AtomicU64::new(0),
        }
    }

    pub fn record_upload_latency(&self, elapsed: std::time::Duration) {
        let micros = elapsed.as_micros() as u64;
        self.latency_total_us.fetch_add(micros, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.latency_last_us.store(micros, Ordering::Relaxed);
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Events currently buffered or awaiting retry.
    pub fn pending(&self, buffer_len: usize, retry_len: usize) -> u64 {
        (buffer_len + retry_len) as u64
    }

    /// Full counters snapshot with the fixed field layout served by
    /// `GET /metrics`.
    pub fn snapshot(
        &self,
        config: &CollectorConfig,
        buffer_len: usize,
        retry_len: usize,
    ) -> serde_json::Value {
        let uptime_ms = self.uptime_ms();
        let received = self.received.load(Ordering::Relaxed);
        let sent = self.sent.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let dropped = self.dropped.load(Ordering::Relaxed);

        let samples = self.latency_samples.load(Ordering::Relaxed);
        let avg_ms = if samples > 0 {
            (self.latency_total_us.load(Ordering::Relaxed) as f64 / samples as f64) / 1000.0
        } else {
            0.0
        };
        let last_ms = self.latency_last_us.load(Ordering::Relaxed) as f64 / 1000.0;

        let uptime_secs = uptime_ms as f64 / 1000.0;
        let events_per_second = if uptime_secs > 0.0 {
            received as f64 / uptime_secs
        } else {
            0.0
        };
        let attempted = sent + failed;
        let success_rate = if attempted > 0 {
            sent as f64 / attempted as f64
        } else {
            1.0
        };

        serde_json::json!({
            "uptime_ms": uptime_ms,
            "uptime_human": format_uptime(uptime_ms),
            "events": {
                "received": received,
                "sent": sent,
                "failed": failed,
                "dropped": dropped,
                "pending": self.pending(buffer_len, retry_len),
            },
            "retries": {
                "queued": self.retry_queued.load(Ordering::Relaxed),
                "success": self.retry_success.load(Ordering::Relaxed),
                "dlq": self.retry_dlq.load(Ordering::Relaxed),
            },
            "latency": {
                "avg_ms": avg_ms,
                "last_ms": last_ms,
            },
            "rates": {
                "events_per_second": events_per_second,
                "success_rate": success_rate,
            },
            "buffer": {
                "size": buffer_len,
                "max": config.max_buffer_size,
                "dropped": dropped,
            },
            "connections": {
                "tcp": self.tcp_connections.load(Ordering::Relaxed),
            },
            "config": {
                "batch_size": config.batch_size,
                "flush_interval_ms": config.flush_interval_ms,
                "max_retries": config.max_retries,
            },
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn format_uptime(uptime_ms: u64) -> String {
    let total_secs = uptime_ms / 1000;
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

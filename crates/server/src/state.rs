use std::sync::atomic::AtomicU64;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use centinela_core::Config;
use centinela_queue::JobQueue;

pub struct AppState {
    pub config: Config,
    pub pool: PgPool,
    pub redis: ConnectionManager,
    pub ingest_queue: JobQueue,
    /// Requests allowed because the rate limiter itself failed (fail-open).
    pub rate_limit_fail_open: AtomicU64,
}

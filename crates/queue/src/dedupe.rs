//! Short-lived exact-duplicate suppression keyed by payload digest.
//!
//! The collector stamps uploads with `x-payload-sha256`; the ingest worker
//! may claim that digest here to drop byte-identical replays within the
//! window. Best effort only; a claim failure never blocks ingestion.

use redis::aio::ConnectionManager;

use crate::error::QueueError;

pub struct DedupeSet {
    conn: ConnectionManager,
    window_secs: u64,
}

impl DedupeSet {
    pub fn new(conn: ConnectionManager, window_secs: u64) -> Self {
        Self { conn, window_secs }
    }

    /// Claim a digest. Returns `true` the first time within the window,
    /// `false` for a duplicate.
    pub async fn try_claim(&self, tenant_id: &str, digest: &str) -> Result<bool, QueueError> {
        let key = format!("centinela:dedupe:{tenant_id}:{digest}");
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.window_secs)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

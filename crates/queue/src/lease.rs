//! Single-instance lease over Redis.
//!
//! The pipeline scheduler must never run two overlapping ticks, even with
//! several backend replicas. `SET NX PX` gives us a TTL'd lock; the holder
//! token keeps one instance from releasing another's lease.

use redis::aio::ConnectionManager;

use crate::error::QueueError;

pub struct Lease {
    conn: ConnectionManager,
    key: String,
    ttl_ms: u64,
}

impl Lease {
    pub fn new(conn: ConnectionManager, key: impl Into<String>, ttl_ms: u64) -> Self {
        Self {
            conn,
            key: key.into(),
            ttl_ms,
        }
    }

    /// Try to take the lease. Returns `false` if another holder has it.
    pub async fn try_acquire(&self, holder: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    /// Release the lease if we still hold it. A lease that expired and was
    /// re-acquired by someone else is left alone.
    pub async fn release(&self, holder: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        // Compare-and-delete in one round trip.
        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            end
            return 0
            "#,
        );
        let _: i64 = script
            .key(&self.key)
            .arg(holder)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}

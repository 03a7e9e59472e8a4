//! The Redis list + sorted-set queue implementation.

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::QueueError;
use crate::job::Job;

/// Handle to one named queue. Cheap to clone; all clones share the
/// underlying multiplexed connection.
#[derive(Clone)]
pub struct JobQueue {
    conn: ConnectionManager,
    name: String,
}

impl JobQueue {
    pub fn new(conn: ConnectionManager, name: impl Into<String>) -> Self {
        Self {
            conn,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn list_key(&self) -> String {
        format!("centinela:queue:{}", self.name)
    }

    fn delayed_key(&self) -> String {
        format!("centinela:queue:{}:delayed", self.name)
    }

    fn failed_key(&self) -> String {
        format!("centinela:queue:{}:failed", self.name)
    }

    /// Enqueue a fresh job; returns its id for the caller's ACK.
    pub async fn enqueue(&self, payload: serde_json::Value) -> Result<Uuid, QueueError> {
        let job = Job::new(payload);
        self.push_job(&job).await?;
        Ok(job.id)
    }

    async fn push_job(&self, job: &Job) -> Result<(), QueueError> {
        let encoded = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(self.list_key(), encoded).await?;
        Ok(())
    }

    /// Blocking pop with a timeout. Promotes due delayed retries first so
    /// they are not starved by a busy main list.
    pub async fn dequeue(&self, timeout_secs: f64) -> Result<Option<Job>, QueueError> {
        self.promote_due().await?;

        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn.brpop(self.list_key(), timeout_secs).await?;
        match popped {
            Some((_, encoded)) => Ok(Some(serde_json::from_str(&encoded)?)),
            None => Ok(None),
        }
    }

    /// Schedule a job for another attempt after `delay`.
    pub async fn retry_later(
        &self,
        mut job: Job,
        delay: std::time::Duration,
    ) -> Result<(), QueueError> {
        job.attempts += 1;
        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let encoded = serde_json::to_string(&job)?;
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(self.delayed_key(), encoded, ready_at).await?;
        Ok(())
    }

    /// Record a job that exhausted its attempts.
    pub async fn fail(&self, job: &Job, error: &str) -> Result<(), QueueError> {
        let record = serde_json::json!({
            "job": job,
            "error": error,
            "failed_at": Utc::now(),
        });
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(self.failed_key(), record.to_string()).await?;
        Ok(())
    }

    /// Move delayed entries whose ready time has passed onto the main list.
    async fn promote_due(&self) -> Result<(), QueueError> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();
        let due: Vec<String> = conn
            .zrangebyscore_limit(self.delayed_key(), "-inf", now, 0, 100)
            .await?;
        for encoded in due {
            // ZREM first: with several workers promoting concurrently, only
            // the one that removes the member gets to push it.
            let removed: i64 = conn.zrem(self.delayed_key(), &encoded).await?;
            if removed > 0 {
                let _: () = conn.lpush(self.list_key(), encoded).await?;
            }
        }
        Ok(())
    }

    /// Jobs waiting on the main list.
    pub async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(self.list_key()).await?)
    }

    /// Most recent failed-job records, newest first.
    pub async fn failed_jobs(&self, limit: isize) -> Result<Vec<serde_json::Value>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(self.failed_key(), 0, limit - 1).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }
}

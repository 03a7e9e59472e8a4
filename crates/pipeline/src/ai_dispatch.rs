//! Enqueue high-severity detections for AI enrichment.

use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use centinela_queue::{DedupeSet, JobQueue};

use crate::PipelineError;

/// Claim TTL while a detection's AI job sits in the queue; prevents the
/// next tick from enqueueing the same detection twice.
const ENQUEUE_CLAIM_SECS: u64 = 600;

pub struct AiDispatcher {
    pool: PgPool,
    queue: JobQueue,
    claims: DedupeSet,
}

impl AiDispatcher {
    pub fn new(pool: PgPool, queue: JobQueue, claims: DedupeSet) -> Self {
        Self { pool, queue, claims }
    }

    pub fn claim_ttl_secs() -> u64 {
        ENQUEUE_CLAIM_SECS
    }

    /// Queue every high/critical detection that has no AI analysis yet.
    pub async fn enqueue_pending(&self) -> Result<u64, PipelineError> {
        let detection_ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT d.id FROM detections d \
             WHERE d.severity IN ('high', 'critical') \
               AND NOT EXISTS (SELECT 1 FROM ai_analyses a WHERE a.detection_id = d.id) \
             ORDER BY d.created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut enqueued = 0u64;
        for (detection_id,) in detection_ids {
            // At-least-once is fine; the claim just avoids obvious repeats
            // while a job is still queued.
            if !self
                .claims
                .try_claim("ai-dispatch", &detection_id.to_string())
                .await?
            {
                continue;
            }
            self.queue
                .enqueue(serde_json::json!({"detection_id": detection_id}))
                .await?;
            enqueued += 1;
        }

        if enqueued > 0 {
            info!(enqueued, "detections queued for AI analysis");
        }
        Ok(enqueued)
    }
}

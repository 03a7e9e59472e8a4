//! AI queue worker: enrich one detection per job.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use centinela_ai::AiClient;
use centinela_core::Detection;
use centinela_queue::{Job, JobHandler};

#[derive(Debug, Deserialize)]
struct AiJobPayload {
    detection_id: Uuid,
}

pub struct AiJobHandler {
    pool: PgPool,
    client: Arc<AiClient>,
}

impl AiJobHandler {
    pub fn new(pool: PgPool, client: Arc<AiClient>) -> Self {
        Self { pool, client }
    }
}

#[async_trait]
impl JobHandler for AiJobHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let payload: AiJobPayload = serde_json::from_value(job.payload.clone())?;

        let detection: Option<Detection> =
            sqlx::query_as("SELECT * FROM detections WHERE id = $1")
                .bind(payload.detection_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(detection) = detection else {
            debug!(detection_id = %payload.detection_id, "detection gone, skipping AI job");
            return Ok(());
        };

        // At-least-once delivery: a second job for the same detection is a
        // no-op once the analysis row exists.
        let (already_analyzed,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM ai_analyses WHERE detection_id = $1)",
        )
        .bind(detection.id)
        .fetch_one(&self.pool)
        .await?;
        if already_analyzed {
            debug!(detection_id = %detection.id, "analysis already present, skipping");
            return Ok(());
        }

        self.client.analyze_detection(&detection).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "ai"
    }
}

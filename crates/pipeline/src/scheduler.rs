//! The ticking pipeline scheduler.
//!
//! Every `worker_interval_ms` one tick runs the stages in order:
//! Normalize → Detect → Enqueue-AI → Batch → Send. A stage failure aborts
//! the rest of that tick (logged, never propagated); the next tick starts
//! from the top. A Redis lease keeps ticks from overlapping across backend
//! replicas.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use centinela_ai::AiKnowledgeCache;
use centinela_core::config::PipelineConfig;
use centinela_queue::Lease;
use centinela_rules::RulesEngine;

use crate::{AiDispatcher, Batcher, EmailDispatcher, Normalizer};

/// Daily housekeeping interval (cache cleanup, raw event retention).
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct PipelineScheduler {
    pool: PgPool,
    config: PipelineConfig,
    normalizer: Normalizer,
    engine: RulesEngine,
    ai_dispatcher: Option<AiDispatcher>,
    batcher: Batcher,
    email_dispatcher: Option<EmailDispatcher>,
    ai_cache: Option<AiKnowledgeCache>,
    lease: Lease,
    instance_id: String,
    last_maintenance: Mutex<Option<Instant>>,
}

impl PipelineScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        config: PipelineConfig,
        normalizer: Normalizer,
        engine: RulesEngine,
        ai_dispatcher: Option<AiDispatcher>,
        batcher: Batcher,
        email_dispatcher: Option<EmailDispatcher>,
        ai_cache: Option<AiKnowledgeCache>,
        lease: Lease,
    ) -> Self {
        Self {
            pool,
            config,
            normalizer,
            engine,
            ai_dispatcher,
            batcher,
            email_dispatcher,
            ai_cache,
            lease,
            instance_id: Uuid::new_v4().to_string(),
            last_maintenance: Mutex::new(None),
        }
    }

    /// Run until shutdown. Ticks that fail to take the lease are skipped;
    /// another replica is already mid-tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.worker_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_ms = self.config.worker_interval_ms,
            "pipeline scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("pipeline scheduler stopping (shutdown)");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One full pipeline pass.
    pub async fn tick(&self) {
        match self.lease.try_acquire(&self.instance_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("pipeline lease held elsewhere, skipping tick");
                return;
            }
            Err(e) => {
                // Unlike the rate limiter, the pipeline fails closed: running
                // a tick without the lease risks overlapping with a replica.
                warn!(error = %e, "pipeline lease check failed, skipping tick");
                return;
            }
        }

        let started = Instant::now();

        if let Err((stage, e)) = self.run_stages().await {
            error!(stage, error = %e, "pipeline tick aborted");
        } else {
            debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "pipeline tick complete"
            );
        }

        self.maybe_run_maintenance().await;

        if let Err(e) = self.lease.release(&self.instance_id).await {
            warn!(error = %e, "pipeline lease release failed (will expire on its own)");
        }
    }

    /// The ordered stages. The first failure aborts the remainder of this
    /// tick; everything it skipped is picked up by the next tick.
    async fn run_stages(&self) -> Result<(), (&'static str, crate::PipelineError)> {
        let normalized = self
            .normalizer
            .normalize_batch(self.config.normalize_batch_size)
            .await
            .map_err(|e| ("normalize", e))?;
        if normalized > 0 {
            debug!(normalized, "normalize stage done");
        }

        let detect = self
            .engine
            .evaluate_all()
            .await
            .map_err(|e| ("detect", crate::PipelineError::from(e)))?;
        if detect.detections_created > 0 || detect.detections_updated > 0 {
            debug!(
                created = detect.detections_created,
                updated = detect.detections_updated,
                "detect stage done"
            );
        }

        if let Some(dispatcher) = &self.ai_dispatcher {
            dispatcher
                .enqueue_pending()
                .await
                .map_err(|e| ("ai_dispatch", e))?;
        }

        let batch = self.batcher.run().await.map_err(|e| ("batch", e))?;
        if batch.digests_created > 0 {
            debug!(digests = batch.digests_created, "batch stage done");
        }

        if let Some(dispatcher) = &self.email_dispatcher {
            dispatcher.run().await.map_err(|e| ("send", e))?;
        }

        Ok(())
    }

    /// Daily cleanup: drop expired AI cache rows and raw events past the
    /// retention window.
    async fn maybe_run_maintenance(&self) {
        {
            let mut last = self.last_maintenance.lock().unwrap();
            match *last {
                Some(at) if at.elapsed() < MAINTENANCE_INTERVAL => return,
                _ => *last = Some(Instant::now()),
            }
        }

        if let Some(cache) = &self.ai_cache {
            if let Err(e) = cache.cleanup().await {
                warn!(error = %e, "AI cache cleanup failed");
            }
        }

        let cutoff = chrono::Utc::now() - chrono::Duration::days(self.config.raw_retention_days);
        match sqlx::query("DELETE FROM raw_events WHERE received_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
        {
            Ok(result) if result.rows_affected() > 0 => {
                info!(
                    deleted = result.rows_affected(),
                    retention_days = self.config.raw_retention_days,
                    "raw event retention sweep"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "raw event retention sweep failed"),
        }
    }
}

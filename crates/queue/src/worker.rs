//! Queue worker pool.
//!
//! `run_workers` spawns N consumer loops over one queue. A handler error
//! sends the job back through the delayed set with exponential backoff;
//! after the attempt budget is spent the job lands in the failed list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::job::Job;
use crate::redis_queue::JobQueue;

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one job. An `Err` triggers queue-level retry.
    async fn handle(&self, job: &Job) -> anyhow::Result<()>;

    /// Worker name for logs (e.g. `"ingest"`).
    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Backoff before attempt `attempts + 1`: `base · 2^attempts`.
pub fn retry_delay(base: Duration, attempts: u32) -> Duration {
    base * 2u32.saturating_pow(attempts.min(16))
}

/// Spawn `options.concurrency` workers into the returned `JoinSet`.
/// Workers drain in-flight jobs and exit when `shutdown` flips.
pub fn run_workers(
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    options: WorkerOptions,
    shutdown: watch::Receiver<bool>,
) -> JoinSet<()> {
    let mut tasks = JoinSet::new();
    info!(
        queue = queue.name(),
        worker = handler.name(),
        concurrency = options.concurrency,
        "starting queue workers"
    );
    for worker_id in 0..options.concurrency {
        let queue = queue.clone();
        let handler = handler.clone();
        let options = options.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(worker_loop(queue, handler, options, shutdown, worker_id));
    }
    tasks
}

async fn worker_loop(
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    options: WorkerOptions,
    shutdown: watch::Receiver<bool>,
    worker_id: usize,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        // The 1 s dequeue timeout doubles as the shutdown poll interval.
        // Waiting out the pop rather than cancelling it means a popped job
        // is never dropped on the floor at shutdown.
        let job = match queue.dequeue(1.0).await {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(e) => {
                warn!(
                    queue = queue.name(),
                    worker_id,
                    error = %e,
                    "dequeue failed, backing off"
                );
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        match handler.handle(&job).await {
            Ok(()) => {
                debug!(queue = queue.name(), job_id = %job.id, "job done");
            }
            Err(e) => {
                let next_attempt = job.attempts + 1;
                if next_attempt >= options.max_attempts {
                    error!(
                        queue = queue.name(),
                        job_id = %job.id,
                        attempts = next_attempt,
                        error = %e,
                        "job failed permanently"
                    );
                    if let Err(fail_err) = queue.fail(&job, &e.to_string()).await {
                        error!(error = %fail_err, "could not record failed job");
                    }
                } else {
                    let delay = retry_delay(options.retry_base_delay, job.attempts);
                    warn!(
                        queue = queue.name(),
                        job_id = %job.id,
                        attempt = next_attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "job failed, scheduling retry"
                    );
                    if let Err(retry_err) = queue.retry_later(job, delay).await {
                        error!(error = %retry_err, "could not schedule retry");
                    }
                }
            }
        }
    }
    debug!(queue = queue.name(), worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_per_attempt() {
        let base = Duration::from_secs(1);
        assert_eq!(retry_delay(base, 0), Duration::from_secs(1));
        assert_eq!(retry_delay(base, 1), Duration::from_secs(2));
        assert_eq!(retry_delay(base, 2), Duration::from_secs(4));
    }

    #[test]
    fn retry_delay_is_bounded_for_large_attempts() {
        let base = Duration::from_secs(1);
        assert_eq!(retry_delay(base, 100), Duration::from_secs(65_536));
    }

    #[test]
    fn default_options_match_queue_contract() {
        let options = WorkerOptions::default();
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.retry_base_delay, Duration::from_secs(1));
    }
}

//! Flush and retry loops.
//!
//! One cooperative loop per concern: the flush loop drains the buffer in
//! batches, the retry loop replays scheduled failures. Neither loop ever
//! aborts on upload failure; events either land, go back to the retry
//! queue, or end in the DLQ.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::buffer::{CollectedEvent, EventBuffer};
use crate::metrics::Metrics;
use crate::retry::{EnqueueOutcome, RetryQueue};
use crate::transport::Uploader;

/// Drain one batch from the buffer and upload it.
///
/// Bulk first; on any bulk failure, fall back to individual uploads so a
/// single poison event cannot hold the whole batch hostage. Individual
/// failures enter the retry queue.
pub async fn flush_once(
    buffer: &EventBuffer,
    client: &dyn Uploader,
    retry: &RetryQueue,
    metrics: &Metrics,
    batch_size: usize,
) {
    let batch = buffer.pop_batch(batch_size);
    if batch.is_empty() {
        return;
    }

    let start = Instant::now();
    match client.send_bulk(&batch).await {
        Ok(()) => {
            metrics.record_upload_latency(start.elapsed());
            metrics.sent.fetch_add(batch.len() as u64, Ordering::Relaxed);
            debug!(count = batch.len(), "bulk upload ok");
        }
        Err(e) => {
            warn!(
                error = %e,
                count = batch.len(),
                "bulk upload failed, falling back to single uploads"
            );
            for event in batch {
                match client.send_single(&event).await {
                    Ok(()) => {
                        metrics.sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        debug!(error = %e, "single upload failed, scheduling retry");
                        schedule_retry(event, 1, retry, metrics);
                    }
                }
            }
        }
    }
}

pub fn schedule_retry(
    event: CollectedEvent,
    attempts: u32,
    retry: &RetryQueue,
    metrics: &Metrics,
) {
    match retry.enqueue(event, attempts) {
        EnqueueOutcome::Scheduled(at) => {
            metrics.retry_queued.fetch_add(1, Ordering::Relaxed);
            debug!(attempts, next_retry_at = %at, "event scheduled for retry");
        }
        EnqueueOutcome::DeadLettered => {
            metrics.retry_dlq.fetch_add(1, Ordering::Relaxed);
            metrics.failed.fetch_add(1, Ordering::Relaxed);
            warn!(attempts, "event moved to DLQ after exhausting retries");
        }
    }
}

pub async fn run_flush_loop(
    buffer: Arc<EventBuffer>,
    client: Arc<dyn Uploader>,
    retry: Arc<RetryQueue>,
    metrics: Arc<Metrics>,
    batch_size: usize,
    interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("flush loop stopping (shutdown)");
                return;
            }
            _ = ticker.tick() => {
                flush_once(buffer.as_ref(), client.as_ref(), &retry, &metrics, batch_size).await;
            }
        }
    }
}

/// Process every retry entry whose time has come.
///
/// `in_progress` is the reentrancy guard: if a previous pass is still
/// running (slow remote), this tick is skipped instead of overlapping.
pub async fn process_ready_retries(
    client: &dyn Uploader,
    retry: &RetryQueue,
    metrics: &Metrics,
    in_progress: &AtomicBool,
) {
    if in_progress
        .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
    {
        debug!("retry pass already in progress, skipping tick");
        return;
    }

    let ready = retry.get_ready();
    if !ready.is_empty() {
        debug!(count = ready.len(), "processing ready retries");
    }
    for entry in ready {
        match client.send_single(&entry.event).await {
            Ok(()) => {
                metrics.retry_success.fetch_add(1, Ordering::Relaxed);
                metrics.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                debug!(error = %e, attempts = entry.attempts, "retry attempt failed");
                schedule_retry(entry.event, entry.attempts + 1, retry, metrics);
            }
        }
    }

    in_progress.store(false, Ordering::Release);
}

pub async fn run_retry_loop(
    client: Arc<dyn Uploader>,
    retry: Arc<RetryQueue>,
    metrics: Arc<Metrics>,
    check_interval_ms: u64,
    in_progress: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(check_interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("retry loop stopping (shutdown)");
                return;
            }
            _ = ticker.tick() => {
                process_ready_retries(client.as_ref(), &retry, &metrics, &in_progress).await;
            }
        }
    }
}

/// Shutdown drain: flush the whole buffer, then give every queued retry one
/// final attempt. Failures are dead-lettered so nothing is silently lost.
pub async fn drain_for_shutdown(
    buffer: &EventBuffer,
    client: &dyn Uploader,
    retry: &RetryQueue,
    metrics: &Metrics,
    batch_size: usize,
) {
    info!(
        buffered = buffer.len(),
        retrying = retry.len(),
        "draining before shutdown"
    );

    while !buffer.is_empty() {
        flush_once(buffer, client, retry, metrics, batch_size).await;
    }

    for entry in retry.drain_all() {
        match client.send_single(&entry.event).await {
            Ok(()) => {
                metrics.retry_success.fetch_add(1, Ordering::Relaxed);
                metrics.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(error = %e, "final retry failed, dead-lettering");
                retry.dead_letter(entry.event);
                metrics.retry_dlq.fetch_add(1, Ordering::Relaxed);
                metrics.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::transport::TransportError;

    /// Scriptable uploader: bulk always fails with the given status; single
    /// uploads fail until `succeed_after_singles` calls have happened.
    struct MockUploader {
        bulk_calls: AtomicUsize,
        single_calls: AtomicUsize,
        bulk_status: Option<u16>,
        succeed_after_singles: usize,
    }

    impl MockUploader {
        fn failing(status: u16) -> Self {
            Self {
                bulk_calls: AtomicUsize::new(0),
                single_calls: AtomicUsize::new(0),
                bulk_status: Some(status),
                succeed_after_singles: usize::MAX,
            }
        }

        fn healthy() -> Self {
            Self {
                bulk_calls: AtomicUsize::new(0),
                single_calls: AtomicUsize::new(0),
                bulk_status: None,
                succeed_after_singles: 0,
            }
        }
    }

    #[async_trait::async_trait]
    impl Uploader for MockUploader {
        async fn send_bulk(&self, _events: &[CollectedEvent]) -> Result<(), TransportError> {
            self.bulk_calls.fetch_add(1, Ordering::SeqCst);
            match self.bulk_status {
                Some(status) => Err(TransportError::Status(status)),
                None => Ok(()),
            }
        }

        async fn send_single(&self, _event: &CollectedEvent) -> Result<(), TransportError> {
            let n = self.single_calls.fetch_add(1, Ordering::SeqCst);
            if n >= self.succeed_after_singles {
                Ok(())
            } else {
                Err(TransportError::Status(500))
            }
        }
    }

    fn received(metrics: &Metrics, n: u64) {
        metrics.received.fetch_add(n, Ordering::Relaxed);
    }

    #[tokio::test]
    async fn bulk_success_counts_sent() {
        let buffer = EventBuffer::new(100);
        let metrics = Metrics::new();
        let retry = RetryQueue::new(10, 100, 2);
        let uploader = MockUploader::healthy();

        for n in 0..5 {
            buffer.push(CollectedEvent::new(format!("e{n}"), None));
        }
        received(&metrics, 5);

        flush_once(&buffer, &uploader, &retry, &metrics, 100).await;

        assert_eq!(metrics.sent.load(Ordering::Relaxed), 5);
        assert_eq!(uploader.bulk_calls.load(Ordering::SeqCst), 1);
        assert_eq!(uploader.single_calls.load(Ordering::SeqCst), 0);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn bulk_failure_falls_back_to_singles() {
        let buffer = EventBuffer::new(100);
        let metrics = Metrics::new();
        let retry = RetryQueue::new(10, 100, 2);
        let mut uploader = MockUploader::failing(500);
        uploader.succeed_after_singles = 0; // singles succeed

        for n in 0..3 {
            buffer.push(CollectedEvent::new(format!("e{n}"), None));
        }
        received(&metrics, 3);

        flush_once(&buffer, &uploader, &retry, &metrics, 100).await;

        assert_eq!(uploader.bulk_calls.load(Ordering::SeqCst), 1);
        assert_eq!(uploader.single_calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.sent.load(Ordering::Relaxed), 3);
        assert!(retry.is_empty());
    }

    /// With `max_retries = 2` and a remote that always returns 500, one
    /// event takes three attempts and lands in the DLQ; the buffer ends
    /// empty and the counters balance.
    #[tokio::test]
    async fn dead_remote_moves_event_to_dlq_after_retries() {
        let buffer = EventBuffer::new(100);
        let metrics = Metrics::new();
        // Tiny delays so the test runs in milliseconds.
        let retry = RetryQueue::new(1, 4, 2);
        let uploader = MockUploader::failing(500);
        let guard = AtomicBool::new(false);

        buffer.push(CollectedEvent::new("doomed".to_string(), None));
        received(&metrics, 1);

        // Attempt 1 (flush): bulk fails, single fails, scheduled as retry.
        flush_once(&buffer, &uploader, &retry, &metrics, 100).await;
        assert_eq!(retry.len(), 1);
        assert_eq!(metrics.retry_queued.load(Ordering::Relaxed), 1);

        // Attempts 2 and 3 via the retry path; afterwards the budget
        // (max_retries = 2) is spent and the event is dead-lettered.
        for _ in 0..2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            process_ready_retries(&uploader, &retry, &metrics, &guard).await;
        }

        assert_eq!(retry.dlq_len(), 1);
        assert_eq!(metrics.retry_dlq.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.failed.load(Ordering::Relaxed), 1);
        assert!(buffer.is_empty());
        assert!(retry.is_empty());

        // received == sent + failed + dropped + pending
        assert_eq!(metrics.received.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.sent.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.pending(buffer.len(), retry.len()), 0);
    }

    #[tokio::test]
    async fn retry_success_counts_sent_and_retry_success() {
        let buffer = EventBuffer::new(100);
        let metrics = Metrics::new();
        let retry = RetryQueue::new(1, 4, 5);
        let mut uploader = MockUploader::failing(503);
        uploader.succeed_after_singles = 1; // first single fails, second works
        let guard = AtomicBool::new(false);

        buffer.push(CollectedEvent::new("eventually".to_string(), None));
        received(&metrics, 1);

        flush_once(&buffer, &uploader, &retry, &metrics, 100).await;
        assert_eq!(retry.len(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        process_ready_retries(&uploader, &retry, &metrics, &guard).await;

        assert_eq!(metrics.retry_success.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.sent.load(Ordering::Relaxed), 1);
        assert!(retry.is_empty());
        assert_eq!(retry.dlq_len(), 0);
    }

    #[tokio::test]
    async fn reentrancy_guard_skips_overlapping_pass() {
        let metrics = Metrics::new();
        let retry = RetryQueue::new(1, 4, 2);
        let uploader = MockUploader::healthy();
        let guard = AtomicBool::new(true); // pretend a pass is running

        retry.enqueue(CollectedEvent::new("waiting".to_string(), None), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;

        process_ready_retries(&uploader, &retry, &metrics, &guard).await;
        // Nothing was processed: the entry is still queued.
        assert_eq!(retry.len(), 1);
        assert_eq!(uploader.single_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_drain_flushes_buffer_and_dead_letters_failures() {
        let buffer = EventBuffer::new(100);
        let metrics = Metrics::new();
        let retry = RetryQueue::new(1, 4, 2);
        let uploader = MockUploader::failing(500);

        for n in 0..3 {
            buffer.push(CollectedEvent::new(format!("e{n}"), None));
        }
        received(&metrics, 3);

        drain_for_shutdown(&buffer, &uploader, &retry, &metrics, 2).await;

        assert!(buffer.is_empty());
        assert!(retry.is_empty());
        // Everything ended in the DLQ; nothing pending at shutdown end.
        assert_eq!(retry.dlq_len(), 3);
        assert_eq!(metrics.pending(buffer.len(), retry.len()), 0);
        assert_eq!(
            metrics.received.load(Ordering::Relaxed),
            metrics.sent.load(Ordering::Relaxed)
                + metrics.failed.load(Ordering::Relaxed)
                + metrics.dropped.load(Ordering::Relaxed)
        );
    }
}

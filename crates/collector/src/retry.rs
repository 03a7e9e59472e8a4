//! Retry queue with exponential backoff, jitter, and a dead letter queue.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::buffer::CollectedEvent;

/// An event awaiting its next upload attempt.
#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub event: CollectedEvent,
    /// Number of failed attempts so far.
    pub attempts: u32,
    pub next_retry_at: DateTime<Utc>,
}

/// Outcome of [`RetryQueue::enqueue`].
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Scheduled for another attempt.
    Scheduled(DateTime<Utc>),
    /// Retry budget exhausted; the event moved to the DLQ.
    DeadLettered,
}

struct RetryState {
    entries: Vec<RetryEntry>,
    dlq: Vec<CollectedEvent>,
}

pub struct RetryQueue {
    state: Mutex<RetryState>,
    base_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
}

impl RetryQueue {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, max_retries: u32) -> Self {
        Self {
            state: Mutex::new(RetryState {
                entries: Vec::new(),
                dlq: Vec::new(),
            }),
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            max_retries,
        }
    }

    /// Schedule an event after its `attempts`-th failure, or dead-letter it
    /// once the budget is spent.
    ///
    /// Delay is `min(base · 2^(attempts−1), max)` with ±20% jitter.
    pub fn enqueue(&self, event: CollectedEvent, attempts: u32) -> EnqueueOutcome {
        let mut state = self.state.lock().unwrap();
        if attempts > self.max_retries {
            state.dlq.push(event);
            return EnqueueOutcome::DeadLettered;
        }

        let delay = self.backoff_delay(attempts);
        let next_retry_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        state.entries.push(RetryEntry {
            event,
            attempts,
            next_retry_at,
        });
        EnqueueOutcome::Scheduled(next_retry_at)
    }

    /// Backoff for the given attempt count, jittered ±20%.
    fn backoff_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        let raw_ms = (self.base_delay.as_millis() as u64).saturating_mul(1u64 << exponent);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as u64);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_millis((capped_ms as f64 * jitter) as u64)
    }

    /// Atomically extract every entry whose retry time has come.
    pub fn get_ready(&self) -> Vec<RetryEntry> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let (ready, waiting): (Vec<_>, Vec<_>) = state
            .entries
            .drain(..)
            .partition(|entry| entry.next_retry_at <= now);
        state.entries = waiting;
        ready
    }

    /// Extract everything still queued, ready or not. Used by the final
    /// shutdown pass.
    pub fn drain_all(&self) -> Vec<RetryEntry> {
        let mut state = self.state.lock().unwrap();
        std::mem::take(&mut state.entries)
    }

    /// Move an event straight to the DLQ (shutdown path).
    pub fn dead_letter(&self, event: CollectedEvent) {
        self.state.lock().unwrap().dlq.push(event);
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dlq_len(&self) -> usize {
        self.state.lock().unwrap().dlq.len()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(msg: &str) -> CollectedEvent {
        CollectedEvent::new(msg.to_string(), None)
    }

    fn queue() -> RetryQueue {
        RetryQueue::new(1000, 60_000, 2)
    }

    #[test]
    fn enqueue_schedules_with_jittered_backoff() {
        let retry = queue();
        let before = Utc::now();
        let outcome = retry.enqueue(event("a"), 1);
        let EnqueueOutcome::Scheduled(at) = outcome else {
            panic!("expected Scheduled, got {outcome:?}");
        };
        // attempt 1: base 1000ms ±20% → 800..=1200ms out.
        let delta_ms = (at - before).num_milliseconds();
        assert!((700..=1300).contains(&delta_ms), "delta was {delta_ms}ms");
        assert_eq!(retry.len(), 1);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let retry = RetryQueue::new(1000, 3000, 10);
        // attempt 2: 2000ms ±20% → within [1600, 2400]
        let d2 = retry.backoff_delay(2).as_millis() as i64;
        assert!((1600..=2400).contains(&d2), "attempt 2 delay {d2}");
        // attempt 4 would be 8000ms raw but caps at 3000 ±20%.
        let d4 = retry.backoff_delay(4).as_millis() as i64;
        assert!((2400..=3600).contains(&d4), "attempt 4 delay {d4}");
    }

    #[test]
    fn exceeding_max_retries_dead_letters() {
        let retry = queue();
        assert_eq!(retry.enqueue(event("a"), 3), EnqueueOutcome::DeadLettered);
        assert_eq!(retry.len(), 0);
        assert_eq!(retry.dlq_len(), 1);
    }

    #[test]
    fn get_ready_extracts_only_due_entries() {
        let retry = queue();
        retry.enqueue(event("later"), 1);
        // Force an immediately-due entry.
        {
            let mut state = retry.state.lock().unwrap();
            state.entries.push(RetryEntry {
                event: event("now"),
                attempts: 1,
                next_retry_at: Utc::now() - chrono::Duration::seconds(1),
            });
        }

        let ready = retry.get_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].event.raw_message, "now");
        // The not-yet-due entry is still queued.
        assert_eq!(retry.len(), 1);
    }

    #[test]
    fn drain_all_empties_the_queue() {
        let retry = queue();
        retry.enqueue(event("a"), 1);
        retry.enqueue(event("b"), 2);
        assert_eq!(retry.drain_all().len(), 2);
        assert!(retry.is_empty());
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let retry = RetryQueue::new(1000, 60_000, 100);
        let delay = retry.backoff_delay(90);
        assert!(delay <= Duration::from_millis(72_000));
    }
}

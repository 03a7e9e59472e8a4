//! Bounded in-memory FIFO of received events.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One syslog line as received at the edge, before upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectedEvent {
    pub raw_message: String,
    pub received_at: DateTime<Utc>,
    pub source_ip: Option<String>,
}

impl CollectedEvent {
    pub fn new(raw_message: String, source_ip: Option<String>) -> Self {
        Self {
            raw_message,
            received_at: Utc::now(),
            source_ip,
        }
    }
}

/// Bounded FIFO with tail-drop. When full, `push` refuses the newest event
/// rather than evicting buffered ones.
pub struct EventBuffer {
    inner: Mutex<VecDeque<CollectedEvent>>,
    max_size: usize,
}

impl EventBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(max_size.min(4096))),
            max_size,
        }
    }

    /// Returns `false` when the buffer is saturated (the event is dropped).
    pub fn push(&self, event: CollectedEvent) -> bool {
        let mut queue = self.inner.lock().unwrap();
        if queue.len() >= self.max_size {
            return false;
        }
        queue.push_back(event);
        true
    }

    /// Remove and return up to `n` oldest events.
    pub fn pop_batch(&self, n: usize) -> Vec<CollectedEvent> {
        let mut queue = self.inner.lock().unwrap();
        let take = n.min(queue.len());
        queue.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Fill level as a percentage of capacity.
    pub fn usage_percent(&self) -> f64 {
        if self.max_size == 0 {
            return 100.0;
        }
        (self.len() as f64 / self.max_size as f64) * 100.0
    }
}

//! Redis-backed job queues.
//!
//! Each queue is a Redis list (LPUSH/BRPOP) plus two side structures: a
//! sorted set of delayed retries (score = ready time) and a list of jobs
//! that exhausted their attempts. Workers consume with bounded concurrency
//! and push transient failures back through the delayed set.

pub mod dedupe;
pub mod error;
pub mod job;
pub mod lease;
pub mod redis_queue;
pub mod worker;

pub use dedupe::DedupeSet;
pub use error::QueueError;
pub use job::Job;
pub use lease::Lease;
pub use redis_queue::JobQueue;
pub use worker::{run_workers, JobHandler, WorkerOptions};

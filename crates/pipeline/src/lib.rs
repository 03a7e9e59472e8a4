//! The back-end pipeline: normalize → detect → AI dispatch → batch → send.
//!
//! Stages run in order on every scheduler tick. A stage failure aborts only
//! that tick; the next tick proceeds. A Redis lease guarantees two ticks
//! never overlap, even with several backend replicas.

pub mod ai_dispatch;
pub mod batcher;
pub mod email_dispatch;
pub mod normalizer;
pub mod scheduler;

pub use ai_dispatch::AiDispatcher;
pub use batcher::Batcher;
pub use email_dispatch::EmailDispatcher;
pub use normalizer::Normalizer;
pub use scheduler::PipelineScheduler;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue error: {0}")]
    Queue(#[from] centinela_queue::QueueError),

    #[error("rules error: {0}")]
    Rules(#[from] centinela_rules::RulesError),

    #[error("AI error: {0}")]
    Ai(#[from] centinela_ai::AiError),

    #[error("notify error: {0}")]
    Notify(#[from] centinela_notify::NotifyError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

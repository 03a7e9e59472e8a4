//! AI enrichment: the knowledge cache and the orchestrator client.
//!
//! High-severity detections are enriched by an external orchestration mesh
//! (analyst, advisor, judge, writer agents behind one HTTP endpoint). The
//! response for a given incident *shape* is cached by pattern signature so
//! similar incidents never pay for a second round trip.

pub mod cache;
pub mod client;
pub mod envelope;
pub mod signature;

pub use cache::{AiKnowledgeCache, CachePayload};
pub use client::{AiClient, AiOutcome};
pub use envelope::{
    Analysis, JudgeVerdict, OrchestrateRequest, OrchestrateResponse, RecommendedAction,
    Recommendations, Report,
};
pub use signature::{bucketize_count, compute_signature, signature_for_detection};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("orchestrator request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("orchestrator returned status {0}")]
    Status(u16),

    #[error("orchestrator not configured")]
    NotConfigured,
}

//! Windowed detection rules.
//!
//! A rule names a set of event types, a threshold, a time window, and a
//! grouping key. On every pipeline tick the engine aggregates recent
//! normalized events per `(tenant, site, source, group key)` and converts
//! each group at or over threshold into a detection, updating the open
//! detection for that key when one exists, inserting otherwise.

pub mod engine;
pub mod schema;

pub use engine::{EvaluationSummary, RulesEngine};
pub use schema::{default_rules, GroupBy, Rule};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RulesError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("evidence serialization failed: {0}")]
    Evidence(#[from] serde_json::Error),
}

//! Error types for self-healing.

use std::path::PathBuf;

use mend_core::HealingStatus;
use thiserror::Error;

/// Result type alias for healing operations.
pub type HealResult<T> = Result<T, HealError>;

/// Errors that end a healing attempt or a scheduling pass.
#[derive(Error, Debug)]
pub enum HealError {
    #[error("Spec file not found for {key} (tried {} locations)", .tried.len())]
    SpecNotFound { key: String, tried: Vec<PathBuf> },

    #[error("Repair timed out after {0} ms")]
    RepairTimeout(u64),

    #[error("Repair service error: {0}")]
    RepairService(String),

    #[error("Failed to write patched spec {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid attempt transition: {from} -> {to}")]
    InvalidTransition { from: HealingStatus, to: HealingStatus },

    #[error("Store error: {0}")]
    Store(#[from] mend_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] mend_queue::QueueError),

    #[error("Runner error: {0}")]
    Runner(#[from] mend_runner::RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HealError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

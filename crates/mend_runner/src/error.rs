//! Error types for the runner module.

use thiserror::Error;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur while executing a run.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Test executor not available: {0}")]
    ExecutorUnavailable(String),

    #[error("Test execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Test execution timed out after {0} ms")]
    Timeout(u64),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] mend_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] mend_queue::QueueError),

    #[error("Core error: {0}")]
    Core(#[from] mend_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

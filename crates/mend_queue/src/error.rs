//! Error types for the queue module.

use thiserror::Error;

/// Result type alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur while enqueueing or consuming tasks.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue is closed: {0}")]
    Closed(String),

    #[error("Invalid enqueue options: {0}")]
    InvalidOptions(String),

    #[error("Timed out waiting for queues to go idle after {0} ms")]
    DrainTimeout(u64),

    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

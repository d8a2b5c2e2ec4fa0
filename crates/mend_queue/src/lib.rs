//! # mend_queue
//!
//! Work queues for testmend.
//!
//! Producers enqueue JSON payloads on named queues through the [`WorkQueue`]
//! trait. Consumers register a [`TaskHandler`] with a fixed number of
//! workers; a handler error schedules a retry according to the task's
//! `attempts` and [`Backoff`].
//!
//! Queue instances are constructed explicitly at startup and passed to the
//! components that need them, then drained and closed at shutdown.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use mend_queue::{EnqueueOptions, MemoryQueue, QueuedTask, TaskHandler, WorkQueue};
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl TaskHandler for Printer {
//!     async fn handle(&self, task: &QueuedTask) -> anyhow::Result<()> {
//!         println!("{}", task.payload);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue = MemoryQueue::new();
//!     let consumer = queue.consume("jobs", Arc::new(Printer), 2);
//!
//!     queue.enqueue("jobs", serde_json::json!({ "n": 1 }), EnqueueOptions::new()).await?;
//!
//!     queue.drain(Duration::from_secs(5)).await?;
//!     consumer.join().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use memory::{Consumer, FailedTask, MemoryQueue, QueueStats};
pub use queue::{Backoff, EnqueueOptions, QueuedTask, TaskHandler, TaskId, WorkQueue};

//! Queue contract: enqueue options, delivered tasks and handlers.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueueResult;

/// Identifier returned by [`WorkQueue::enqueue`].
pub type TaskId = String;

/// Delay between retries of a failed task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry
    Fixed { delay_ms: u64 },
    /// Delay doubles with every failed attempt
    Exponential { delay_ms: u64 },
}

impl Backoff {
    /// Delay before the retry that follows `failures` failed attempts.
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Exponential { delay_ms } => {
                let exponent = failures.saturating_sub(1).min(16);
                Duration::from_millis(delay_ms.saturating_mul(1u64 << exponent))
            }
        }
    }
}

/// Options accepted by [`WorkQueue::enqueue`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnqueueOptions {
    /// Higher runs first
    pub priority: i32,
    /// Tasks sharing a key while one is pending or active are merged
    pub dedupe_key: Option<String>,
    /// Total delivery attempts, including the first
    pub attempts: u32,
    pub backoff: Option<Backoff>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            dedupe_key: None,
            attempts: 1,
            backoff: None,
        }
    }
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }
}

/// A task as delivered to a handler.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub id: TaskId,
    pub queue: String,
    pub payload: Value,
    /// 1-based delivery attempt
    pub attempt: u32,
    pub max_attempts: u32,
}

impl QueuedTask {
    /// Decode the payload into a typed task.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> QueueResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Producer side of a work queue.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Add a task to the named queue.
    async fn enqueue(&self, queue: &str, payload: Value, options: EnqueueOptions)
        -> QueueResult<TaskId>;
}

/// Consumer callback. An `Err` schedules a retry while attempts remain.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &QueuedTask) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delays() {
        let fixed = Backoff::Fixed { delay_ms: 500 };
        assert_eq!(fixed.delay(3), Duration::from_millis(500));

        let exp = Backoff::Exponential { delay_ms: 30_000 };
        assert_eq!(exp.delay(1), Duration::from_secs(30));
        assert_eq!(exp.delay(2), Duration::from_secs(60));
        assert_eq!(exp.delay(3), Duration::from_secs(120));
    }

    #[test]
    fn test_decode_payload() {
        #[derive(serde::Deserialize)]
        struct Payload {
            run_id: String,
        }

        let task = QueuedTask {
            id: "t1".into(),
            queue: "test-runs".into(),
            payload: serde_json::json!({ "run_id": "r1" }),
            attempt: 1,
            max_attempts: 3,
        };
        let payload: Payload = task.decode().unwrap();
        assert_eq!(payload.run_id, "r1");
        assert!(!task.is_last_attempt());
    }
}

//! Mock test executor for testing.
//!
//! Returns scripted outcomes and records every request, so run-worker and
//! healing tests can drive whole pipelines without a browser.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{RunnerError, RunnerResult};
use crate::executor::{ExecutionOutcome, ExecutionRequest, TestExecutor};

/// Predefined outcome for one execution.
#[derive(Debug, Clone)]
pub struct MockOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub report: Option<Value>,
    pub duration_ms: u64,
}

impl MockOutcome {
    /// A passing run with the given report.
    pub fn passed(report: Value) -> Self {
        Self {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            report: Some(report),
            duration_ms: 100,
        }
    }

    /// A failing run with the given report.
    pub fn failed(report: Value) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: String::new(),
            report: Some(report),
            duration_ms: 100,
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }
}

/// Mock executor.
#[derive(Clone, Default)]
pub struct MockExecutor {
    /// Scripted outcomes, cycled through in order
    outcomes: Arc<RwLock<Vec<MockOutcome>>>,
    next: Arc<AtomicUsize>,
    /// Requests received, in order
    requests: Arc<RwLock<Vec<ExecutionRequest>>>,
    /// Error to return instead of an outcome
    simulate_failure: Arc<RwLock<Option<String>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an outcome for the next execution.
    pub fn add_outcome(self, outcome: MockOutcome) -> Self {
        self.outcomes.write().push(outcome);
        self
    }

    /// Set a failure to simulate.
    pub fn simulate_failure(self, message: impl Into<String>) -> Self {
        *self.simulate_failure.write() = Some(message.into());
        self
    }

    /// All requests received.
    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.read().len()
    }

    fn next_outcome(&self) -> MockOutcome {
        let outcomes = self.outcomes.read();
        if outcomes.is_empty() {
            return MockOutcome::passed(serde_json::json!({ "suites": [] }));
        }
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        outcomes[index % outcomes.len()].clone()
    }
}

#[async_trait]
impl TestExecutor for MockExecutor {
    fn framework(&self) -> &str {
        "playwright"
    }

    async fn execute(&self, request: &ExecutionRequest) -> RunnerResult<ExecutionOutcome> {
        self.requests.write().push(request.clone());

        if let Some(message) = self.simulate_failure.read().clone() {
            return Err(RunnerError::ExecutionFailed(message));
        }

        let outcome = self.next_outcome();
        Ok(ExecutionOutcome {
            ok: outcome.exit_code == 0,
            exit_code: Some(outcome.exit_code),
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            report: outcome.report,
            duration_ms: outcome.duration_ms,
        })
    }
}

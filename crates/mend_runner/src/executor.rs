//! Test executor trait and types.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RunnerResult;

/// What to run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRequest {
    /// Directory the test command runs in
    pub workdir: PathBuf,
    /// Spec files to run; empty runs the whole suite
    pub files: Vec<String>,
    /// Title filter
    pub grep: Option<String>,
    pub headed: bool,
    pub base_url: Option<String>,
    /// Wall-clock bound for the whole command
    pub timeout_ms: u64,
    /// Where the JSON report is written
    pub report_path: PathBuf,
    /// Extra environment variables
    pub env: HashMap<String, String>,
}

impl ExecutionRequest {
    pub fn new(workdir: impl Into<PathBuf>, report_path: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            files: Vec::new(),
            grep: None,
            headed: false,
            base_url: None,
            timeout_ms: 10 * 60 * 1000,
            report_path: report_path.into(),
            env: HashMap::new(),
        }
    }

    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.files.push(file.into());
        self
    }

    pub fn grep(mut self, grep: impl Into<String>) -> Self {
        self.grep = Some(grep.into());
        self
    }

    pub fn headed(mut self, headed: bool) -> Self {
        self.headed = headed;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Result of running a test command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionOutcome {
    /// Whether the command exited successfully
    pub ok: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Parsed JSON report, when one was produced
    pub report: Option<Value>,
    pub duration_ms: u64,
}

/// Runs browser test suites and reports structured results.
#[async_trait]
pub trait TestExecutor: Send + Sync {
    /// Short name recorded in run summaries.
    fn framework(&self) -> &str;

    async fn execute(&self, request: &ExecutionRequest) -> RunnerResult<ExecutionOutcome>;
}

//! Payloads carried by the work queues.

use serde::{Deserialize, Serialize};

/// Queue consumed by the execution worker.
pub const RUN_QUEUE: &str = "test-runs";

/// Queue consumed by the healing worker.
pub const HEAL_QUEUE: &str = "self-heal";

/// What the execution worker needs to run a set of specs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunPayload {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grep: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl RunPayload {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }
}

/// A run-execution task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunTask {
    pub run_id: String,
    pub payload: RunPayload,
}

/// A healing task referencing one queued attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealTask {
    pub run_id: String,
    pub test_result_id: String,
    pub test_case_id: String,
    pub attempt_id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headed: Option<bool>,
    /// Number of failed results in the originating run
    pub total_failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_title: Option<String>,
}

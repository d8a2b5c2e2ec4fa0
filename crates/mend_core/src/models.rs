//! Persistent data model shared by the execution and healing subsystems.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::steps::TestStep;

/// Generate a fresh record identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Lifecycle of a test run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Check if the run has finished executing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::InvalidStatus {
                kind: "run status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a run to be created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    #[default]
    User,
    Ci,
    SelfHeal,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ci => "ci",
            Self::SelfHeal => "self-heal",
        }
    }
}

impl FromStr for TriggerKind {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "user" => Ok(Self::User),
            "ci" => Ok(Self::Ci),
            "self-heal" => Ok(Self::SelfHeal),
            other => Err(CoreError::InvalidStatus {
                kind: "trigger",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one test case within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }
}

impl FromStr for ResultStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "error" => Ok(Self::Error),
            other => Err(CoreError::InvalidStatus {
                kind: "result status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a single healing attempt.
///
/// `queued → running → {succeeded | failed}`. Only one attempt per test
/// result may be open (`queued` or `running`) at a time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealingStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl HealingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Check if the attempt still holds the per-result claim.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    /// Check if transition to the given status is valid.
    pub fn can_transition_to(&self, next: HealingStatus) -> bool {
        use HealingStatus::*;
        matches!(
            (self, next),
            (Queued, Running) | (Queued, Failed) | (Running, Succeeded) | (Running, Failed)
        )
    }
}

impl FromStr for HealingStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::InvalidStatus {
                kind: "healing status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for HealingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form run parameters, validated when decoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunParams {
    /// Spec file the run is scoped to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Title filter passed to the test runner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grep: Option<String>,
    /// Base URL override for the application under test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Whether the browser runs headed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headed: Option<bool>,
    /// Steps shared by every test in the run (e.g. a login preamble)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_steps: Vec<TestStep>,
}

impl RunParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn grep(mut self, grep: impl Into<String>) -> Self {
        self.grep = Some(grep.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn headed(mut self, headed: bool) -> Self {
        self.headed = Some(headed);
        self
    }

    pub fn shared_steps(mut self, steps: Vec<TestStep>) -> Self {
        self.shared_steps = steps;
        self
    }

    /// Decode stored parameters, rejecting malformed steps.
    pub fn from_json(value: &serde_json::Value) -> CoreResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let params: Self = serde_json::from_value(value.clone())?;
        for step in &params.shared_steps {
            step.validate()?;
        }
        Ok(params)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Parameters a rerun inherits from the run that caused it.
    pub fn carry_forward(&self) -> Self {
        Self {
            file: None,
            grep: None,
            base_url: self.base_url.clone(),
            headed: self.headed,
            shared_steps: self.shared_steps.clone(),
        }
    }
}

/// One execution attempt of a set of specs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestRun {
    pub id: String,
    pub project_id: String,
    pub status: RunStatus,
    pub trigger: TriggerKind,
    pub rerun_of_id: Option<String>,
    /// Identity of the repair that caused a self-heal rerun; unique per store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerun_key: Option<String>,
    pub params: RunParams,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TestRun {
    /// Create a queued run.
    pub fn new(project_id: impl Into<String>, trigger: TriggerKind) -> Self {
        Self {
            id: new_id(),
            project_id: project_id.into(),
            status: RunStatus::Queued,
            trigger,
            rerun_of_id: None,
            rerun_key: None,
            params: RunParams::default(),
            summary: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_params(mut self, params: RunParams) -> Self {
        self.params = params;
        self
    }

    /// Link this run to the run whose healing caused it.
    pub fn rerun_of(mut self, run_id: impl Into<String>) -> Self {
        self.rerun_of_id = Some(run_id.into());
        self
    }

    pub fn with_rerun_key(mut self, key: impl Into<String>) -> Self {
        self.rerun_key = Some(key.into());
        self
    }

    /// Mark the run as already picked up.
    pub fn started(mut self) -> Self {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self
    }

    pub fn is_self_heal(&self) -> bool {
        self.trigger == TriggerKind::SelfHeal
    }
}

/// A stable identity for a named test within a spec file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestCase {
    pub id: String,
    pub project_id: String,
    /// `<file path>#<full title>`
    pub key: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl TestCase {
    /// Longest key the store accepts.
    pub const MAX_KEY_LEN: usize = 255;

    pub fn new(project_id: impl Into<String>, key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            project_id: project_id.into(),
            key: key.into(),
            title: title.into(),
            created_at: Utc::now(),
        }
    }

    /// Build the key for a test, truncated to [`Self::MAX_KEY_LEN`] characters.
    pub fn make_key(file: &str, full_title: &str) -> String {
        format!("{}#{}", file, full_title)
            .chars()
            .take(Self::MAX_KEY_LEN)
            .collect()
    }

    /// The spec file portion of the key, with forward slashes.
    pub fn spec_file(&self) -> String {
        let file = self.key.split('#').next().unwrap_or(&self.key);
        let file = if file.is_empty() { &self.key } else { file };
        file.replace('\\', "/")
    }
}

/// One test-case outcome within a run. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
    pub id: String,
    pub run_id: String,
    pub test_case_id: String,
    pub status: ResultStatus,
    pub duration_ms: Option<u64>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TestResult {
    pub fn new(run_id: impl Into<String>, test_case_id: impl Into<String>, status: ResultStatus) -> Self {
        Self {
            id: new_id(),
            run_id: run_id.into(),
            test_case_id: test_case_id.into(),
            status,
            duration_ms: None,
            message: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }
}

/// One self-repair try for one failed test result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealingAttempt {
    pub id: String,
    pub run_id: String,
    pub test_result_id: String,
    pub test_case_id: String,
    /// 1-based sequence number per test result
    pub attempt: u32,
    pub status: HealingStatus,
    pub summary: Option<String>,
    /// Unified diff of the applied patch
    pub diff: Option<String>,
    /// Structured request sent to the repair model
    pub prompt: Option<serde_json::Value>,
    /// Raw model response or deterministic strategy marker
    pub response: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HealingAttempt {
    /// Create a queued attempt.
    pub fn queued(
        run_id: impl Into<String>,
        test_result_id: impl Into<String>,
        test_case_id: impl Into<String>,
        attempt: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            run_id: run_id.into(),
            test_result_id: test_result_id.into(),
            test_case_id: test_case_id.into(),
            attempt,
            status: HealingStatus::Queued,
            summary: None,
            diff: None,
            prompt: None,
            response: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            HealingStatus::Queued,
            HealingStatus::Running,
            HealingStatus::Succeeded,
            HealingStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<HealingStatus>().unwrap(), status);
        }
        assert!("done".parse::<RunStatus>().is_err());
        assert_eq!("self-heal".parse::<TriggerKind>().unwrap(), TriggerKind::SelfHeal);
    }

    #[test]
    fn test_healing_transitions() {
        assert!(HealingStatus::Queued.can_transition_to(HealingStatus::Running));
        assert!(HealingStatus::Running.can_transition_to(HealingStatus::Succeeded));
        assert!(!HealingStatus::Succeeded.can_transition_to(HealingStatus::Running));
        assert!(!HealingStatus::Failed.can_transition_to(HealingStatus::Queued));
    }

    #[test]
    fn test_case_key_and_spec_file() {
        let key = TestCase::make_key("tests\\login.spec.ts", "auth > logs in");
        let case = TestCase::new("p1", key, "auth > logs in");
        assert_eq!(case.spec_file(), "tests/login.spec.ts");

        let long = TestCase::make_key("a.spec.ts", &"x".repeat(400));
        assert_eq!(long.chars().count(), TestCase::MAX_KEY_LEN);
    }

    #[test]
    fn test_run_params_carry_forward_drops_scope() {
        let params = RunParams::new()
            .file("tests/a.spec.ts")
            .grep("logs in")
            .base_url("https://staging.example.com")
            .headed(true);

        let carried = params.carry_forward();
        assert_eq!(carried.file, None);
        assert_eq!(carried.grep, None);
        assert_eq!(carried.base_url.as_deref(), Some("https://staging.example.com"));
        assert_eq!(carried.headed, Some(true));
    }

    #[test]
    fn test_run_params_rejects_invalid_steps() {
        let value = serde_json::json!({
            "shared_steps": [{ "kind": "goto", "url": "" }]
        });
        assert!(RunParams::from_json(&value).is_err());
        assert_eq!(RunParams::from_json(&serde_json::Value::Null).unwrap(), RunParams::default());
    }
}

//! Store contract shared by the SQLite and in-memory backends.

use async_trait::async_trait;
use mend_core::{HealingAttempt, HealingStatus, TestCase, TestResult, TestRun};

use crate::error::StoreResult;

/// Selects healing attempts by run, result and status.
///
/// Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptFilter {
    pub run_id: Option<String>,
    pub test_result_id: Option<String>,
    /// Attempt status must be one of these (ignored when empty)
    pub status_in: Vec<HealingStatus>,
    /// Attempt status must differ from this
    pub status_not: Option<HealingStatus>,
}

impl AttemptFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All attempts of a run.
    pub fn for_run(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            ..Default::default()
        }
    }

    /// All attempts of a test result.
    pub fn for_result(test_result_id: impl Into<String>) -> Self {
        Self {
            test_result_id: Some(test_result_id.into()),
            ..Default::default()
        }
    }

    /// Restrict to attempts still holding the per-result claim.
    pub fn open(mut self) -> Self {
        self.status_in = vec![HealingStatus::Queued, HealingStatus::Running];
        self
    }

    pub fn status_in(mut self, statuses: Vec<HealingStatus>) -> Self {
        self.status_in = statuses;
        self
    }

    pub fn status_not(mut self, status: HealingStatus) -> Self {
        self.status_not = Some(status);
        self
    }

    /// Check whether an attempt passes the filter.
    pub fn matches(&self, attempt: &HealingAttempt) -> bool {
        if let Some(run_id) = &self.run_id {
            if &attempt.run_id != run_id {
                return false;
            }
        }
        if let Some(result_id) = &self.test_result_id {
            if &attempt.test_result_id != result_id {
                return false;
            }
        }
        if !self.status_in.is_empty() && !self.status_in.contains(&attempt.status) {
            return false;
        }
        if let Some(excluded) = self.status_not {
            if attempt.status == excluded {
                return false;
            }
        }
        true
    }
}

/// Caps applied atomically when claiming a new attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimLimits {
    /// Maximum attempts for one test result
    pub per_spec: u32,
    /// Maximum attempts for one run
    pub per_run: u32,
}

/// Result of trying to open a new healing attempt.
///
/// Only `Claimed` creates a row; the other variants are normal backpressure.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// A new queued attempt was created
    Claimed(HealingAttempt),
    /// Another attempt for the same result is queued or running
    InFlight,
    /// The result already used its attempt budget
    CapReached { prior: u32 },
    /// The run already used its attempt budget
    RunCapReached { total: u32 },
}

impl ClaimOutcome {
    pub fn claimed(&self) -> Option<&HealingAttempt> {
        match self {
            Self::Claimed(attempt) => Some(attempt),
            _ => None,
        }
    }
}

/// Durable store for runs, results, test cases and healing attempts.
#[async_trait]
pub trait Store: Send + Sync {
    // Runs

    async fn create_run(&self, run: &TestRun) -> StoreResult<()>;

    async fn get_run(&self, id: &str) -> StoreResult<Option<TestRun>>;

    /// Insert a rerun unless another run already holds its `rerun_key`.
    ///
    /// Returns the holder when there is one, `None` when `run` was inserted.
    /// Runs without a key are always inserted.
    async fn create_rerun(&self, run: &TestRun) -> StoreResult<Option<TestRun>>;

    /// Overwrite a run by id.
    async fn update_run(&self, run: &TestRun) -> StoreResult<()>;

    /// Runs that are queued or running, oldest first.
    async fn list_unfinished_runs(&self) -> StoreResult<Vec<TestRun>>;

    // Test cases

    /// Return the case for `(project_id, key)`, creating it on first sight.
    async fn upsert_test_case(&self, project_id: &str, key: &str, title: &str)
        -> StoreResult<TestCase>;

    async fn get_test_case(&self, id: &str) -> StoreResult<Option<TestCase>>;

    // Results

    async fn create_result(&self, result: &TestResult) -> StoreResult<()>;

    async fn get_result(&self, id: &str) -> StoreResult<Option<TestResult>>;

    /// Results of a run in creation order.
    async fn list_results(&self, run_id: &str) -> StoreResult<Vec<TestResult>>;

    // Healing attempts

    async fn create_attempt(&self, attempt: &HealingAttempt) -> StoreResult<()>;

    async fn get_attempt(&self, id: &str) -> StoreResult<Option<HealingAttempt>>;

    /// Overwrite an attempt by id.
    async fn update_attempt(&self, attempt: &HealingAttempt) -> StoreResult<()>;

    async fn count_attempts(&self, filter: &AttemptFilter) -> StoreResult<u32>;

    /// Oldest attempt matching the filter.
    async fn find_first_attempt(&self, filter: &AttemptFilter)
        -> StoreResult<Option<HealingAttempt>>;

    /// Attempts matching the filter in creation order.
    async fn list_attempts(&self, filter: &AttemptFilter) -> StoreResult<Vec<HealingAttempt>>;

    /// Check-no-open-attempt-then-create without a race window.
    ///
    /// The new attempt gets `attempt = prior + 1` and status `queued`.
    async fn claim_attempt(
        &self,
        run_id: &str,
        test_result_id: &str,
        test_case_id: &str,
        limits: ClaimLimits,
    ) -> StoreResult<ClaimOutcome>;
}

//! In-memory store used by tests and single-shot CLI runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mend_core::{HealingAttempt, TestCase, TestResult, TestRun};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{AttemptFilter, ClaimLimits, ClaimOutcome, Store};

#[derive(Default)]
struct MemoryState {
    runs: HashMap<String, TestRun>,
    cases: Vec<TestCase>,
    results: Vec<TestResult>,
    attempts: Vec<HealingAttempt>,
}

/// Store backed by process memory.
///
/// Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs stored.
    pub fn run_count(&self) -> usize {
        self.state.read().runs.len()
    }

    /// All runs, oldest first.
    pub fn runs(&self) -> Vec<TestRun> {
        let mut runs: Vec<TestRun> = self.state.read().runs.values().cloned().collect();
        runs.sort_by_key(|run| run.created_at);
        runs
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_run(&self, run: &TestRun) -> StoreResult<()> {
        self.state.write().runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, id: &str) -> StoreResult<Option<TestRun>> {
        Ok(self.state.read().runs.get(id).cloned())
    }

    async fn create_rerun(&self, run: &TestRun) -> StoreResult<Option<TestRun>> {
        let mut state = self.state.write();
        if let Some(key) = run.rerun_key.as_deref() {
            let holder = state
                .runs
                .values()
                .find(|r| r.rerun_key.as_deref() == Some(key));
            if let Some(holder) = holder {
                return Ok(Some(holder.clone()));
            }
        }
        state.runs.insert(run.id.clone(), run.clone());
        Ok(None)
    }

    async fn update_run(&self, run: &TestRun) -> StoreResult<()> {
        let mut state = self.state.write();
        match state.runs.get_mut(&run.id) {
            Some(existing) => {
                *existing = run.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("run", &run.id)),
        }
    }

    async fn list_unfinished_runs(&self) -> StoreResult<Vec<TestRun>> {
        Ok(self
            .runs()
            .into_iter()
            .filter(|run| !run.status.is_terminal())
            .collect())
    }

    async fn upsert_test_case(
        &self,
        project_id: &str,
        key: &str,
        title: &str,
    ) -> StoreResult<TestCase> {
        let mut state = self.state.write();
        if let Some(case) = state
            .cases
            .iter_mut()
            .find(|c| c.project_id == project_id && c.key == key)
        {
            case.title = title.to_string();
            return Ok(case.clone());
        }
        let case = TestCase::new(project_id, key, title);
        state.cases.push(case.clone());
        Ok(case)
    }

    async fn get_test_case(&self, id: &str) -> StoreResult<Option<TestCase>> {
        Ok(self.state.read().cases.iter().find(|c| c.id == id).cloned())
    }

    async fn create_result(&self, result: &TestResult) -> StoreResult<()> {
        self.state.write().results.push(result.clone());
        Ok(())
    }

    async fn get_result(&self, id: &str) -> StoreResult<Option<TestResult>> {
        Ok(self.state.read().results.iter().find(|r| r.id == id).cloned())
    }

    async fn list_results(&self, run_id: &str) -> StoreResult<Vec<TestResult>> {
        Ok(self
            .state
            .read()
            .results
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn create_attempt(&self, attempt: &HealingAttempt) -> StoreResult<()> {
        self.state.write().attempts.push(attempt.clone());
        Ok(())
    }

    async fn get_attempt(&self, id: &str) -> StoreResult<Option<HealingAttempt>> {
        Ok(self.state.read().attempts.iter().find(|a| a.id == id).cloned())
    }

    async fn update_attempt(&self, attempt: &HealingAttempt) -> StoreResult<()> {
        let mut state = self.state.write();
        match state.attempts.iter_mut().find(|a| a.id == attempt.id) {
            Some(existing) => {
                *existing = attempt.clone();
                existing.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::not_found("healing attempt", &attempt.id)),
        }
    }

    async fn count_attempts(&self, filter: &AttemptFilter) -> StoreResult<u32> {
        Ok(self
            .state
            .read()
            .attempts
            .iter()
            .filter(|a| filter.matches(a))
            .count() as u32)
    }

    async fn find_first_attempt(
        &self,
        filter: &AttemptFilter,
    ) -> StoreResult<Option<HealingAttempt>> {
        Ok(self
            .state
            .read()
            .attempts
            .iter()
            .find(|a| filter.matches(a))
            .cloned())
    }

    async fn list_attempts(&self, filter: &AttemptFilter) -> StoreResult<Vec<HealingAttempt>> {
        Ok(self
            .state
            .read()
            .attempts
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect())
    }

    async fn claim_attempt(
        &self,
        run_id: &str,
        test_result_id: &str,
        test_case_id: &str,
        limits: ClaimLimits,
    ) -> StoreResult<ClaimOutcome> {
        // The write lock covers the whole read-then-insert.
        let mut state = self.state.write();

        let total = state.attempts.iter().filter(|a| a.run_id == run_id).count() as u32;
        if total >= limits.per_run {
            return Ok(ClaimOutcome::RunCapReached { total });
        }

        let for_result: Vec<&HealingAttempt> = state
            .attempts
            .iter()
            .filter(|a| a.test_result_id == test_result_id)
            .collect();
        if for_result.iter().any(|a| a.status.is_open()) {
            return Ok(ClaimOutcome::InFlight);
        }
        let prior = for_result.len() as u32;
        if prior >= limits.per_spec {
            return Ok(ClaimOutcome::CapReached { prior });
        }

        let attempt = HealingAttempt::queued(run_id, test_result_id, test_case_id, prior + 1);
        debug!(
            "Claimed attempt {} (#{}) for result {}",
            attempt.id, attempt.attempt, test_result_id
        );
        state.attempts.push(attempt.clone());
        Ok(ClaimOutcome::Claimed(attempt))
    }
}

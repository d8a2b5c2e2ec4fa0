//! Healing attempt ledger.
//!
//! Every state change of a [`HealingAttempt`] goes through here so the
//! `queued → running → {succeeded | failed}` machine is enforced in one place.
//! Rows are never deleted.

use std::sync::Arc;

use chrono::Utc;
use mend_core::{HealingAttempt, HealingStatus};
use mend_store::{AttemptFilter, Store};
use serde_json::Value;
use tracing::info;

use crate::error::{HealError, HealResult};

/// Fields recorded when an attempt succeeds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptSuccess {
    pub summary: String,
    pub diff: String,
    pub prompt: Option<Value>,
    pub response: Option<Value>,
}

/// Access to the attempts stored for runs and results.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get(&self, attempt_id: &str) -> HealResult<HealingAttempt> {
        self.store
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| HealError::not_found("Healing attempt", attempt_id))
    }

    async fn transition<F>(
        &self,
        attempt: &mut HealingAttempt,
        next: HealingStatus,
        record: F,
    ) -> HealResult<()>
    where
        F: FnOnce(&mut HealingAttempt),
    {
        if !attempt.status.can_transition_to(next) {
            return Err(HealError::InvalidTransition {
                from: attempt.status,
                to: next,
            });
        }
        record(attempt);
        attempt.status = next;
        attempt.updated_at = Utc::now();
        self.store.update_attempt(attempt).await?;
        info!(
            "Healing attempt {} (#{} for result {}) is now {}",
            attempt.id, attempt.attempt, attempt.test_result_id, next
        );
        Ok(())
    }

    pub async fn mark_running(&self, attempt: &mut HealingAttempt) -> HealResult<()> {
        self.transition(attempt, HealingStatus::Running, |_| {}).await
    }

    pub async fn mark_succeeded(
        &self,
        attempt: &mut HealingAttempt,
        success: AttemptSuccess,
    ) -> HealResult<()> {
        self.transition(attempt, HealingStatus::Succeeded, |a| {
            a.summary = Some(success.summary);
            a.diff = Some(success.diff);
            a.prompt = success.prompt;
            a.response = success.response;
            a.error = None;
        })
        .await
    }

    pub async fn mark_failed(
        &self,
        attempt: &mut HealingAttempt,
        error: impl Into<String>,
    ) -> HealResult<()> {
        let error = error.into();
        self.transition(attempt, HealingStatus::Failed, |a| a.error = Some(error))
            .await
    }

    /// All attempts of a run, oldest first.
    pub async fn for_run(&self, run_id: &str) -> HealResult<Vec<HealingAttempt>> {
        Ok(self.store.list_attempts(&AttemptFilter::for_run(run_id)).await?)
    }

    /// All attempts of a test result, oldest first.
    pub async fn for_result(&self, test_result_id: &str) -> HealResult<Vec<HealingAttempt>> {
        Ok(self
            .store
            .list_attempts(&AttemptFilter::for_result(test_result_id))
            .await?)
    }

    /// Attempts of a run that have not succeeded.
    pub async fn outstanding(&self, run_id: &str) -> HealResult<u32> {
        Ok(self
            .store
            .count_attempts(&AttemptFilter::for_run(run_id).status_not(HealingStatus::Succeeded))
            .await?)
    }
}

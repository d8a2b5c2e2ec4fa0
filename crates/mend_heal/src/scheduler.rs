//! Scheduling of healing attempts for failed runs.

use std::sync::Arc;

use async_trait::async_trait;
use mend_core::{
    normalize_test_title, HealConfig, HealTask, HealingAttempt, ResultStatus, TestRun, HEAL_QUEUE,
};
use mend_queue::{Backoff, EnqueueOptions, WorkQueue};
use mend_runner::RunCompletionHook;
use mend_store::{AttemptFilter, ClaimLimits, ClaimOutcome, Store};
use tracing::{debug, error, info};

use crate::error::{HealError, HealResult};
use crate::ledger::Ledger;

/// Deliveries of a healing task before the queue gives up on it.
pub const HEAL_TASK_ATTEMPTS: u32 = 3;
const HEAL_TASK_BACKOFF_MS: u64 = 5_000;

/// What a scheduling pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleReport {
    /// Attempts created and enqueued
    pub scheduled: Vec<HealingAttempt>,
    /// Results skipped because an attempt is already open
    pub in_flight: usize,
    /// Results skipped because their attempt budget is used up
    pub capped: usize,
    /// The run-level cap stopped scheduling
    pub run_cap_reached: bool,
    /// Why nothing was considered, if the pass was skipped outright
    pub skipped: Option<&'static str>,
}

impl ScheduleReport {
    fn skipped(reason: &'static str) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }
}

/// Creates ledger entries and healing tasks for the failures of a run.
pub struct HealScheduler {
    store: Arc<dyn Store>,
    queue: Arc<dyn WorkQueue>,
    config: HealConfig,
}

impl HealScheduler {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn WorkQueue>, config: HealConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &HealConfig {
        &self.config
    }

    fn limits(&self) -> ClaimLimits {
        ClaimLimits {
            per_spec: self.config.max_attempts_per_spec,
            per_run: self.config.max_attempts_per_run,
        }
    }

    /// Schedule healing for every eligible failed result of a run.
    pub async fn schedule_run(&self, run_id: &str) -> HealResult<ScheduleReport> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| HealError::RunNotFound(run_id.to_string()))?;

        if run.is_self_heal() {
            debug!("Run {} is a self-heal rerun, not scheduling", run.id);
            return Ok(ScheduleReport::skipped("self-heal rerun"));
        }
        if !self.config.enabled {
            debug!("Self-healing disabled, not scheduling run {}", run.id);
            return Ok(ScheduleReport::skipped("disabled"));
        }

        let failed: Vec<_> = self
            .store
            .list_results(&run.id)
            .await?
            .into_iter()
            .filter(|r| r.status == ResultStatus::Failed)
            .collect();
        if failed.is_empty() {
            return Ok(ScheduleReport::skipped("no failures"));
        }

        let mut report = ScheduleReport::default();
        let total = self.store.count_attempts(&AttemptFilter::for_run(&run.id)).await?;
        if total >= self.config.max_attempts_per_run {
            debug!(
                "Run {} already has {} attempts (cap {})",
                run.id, total, self.config.max_attempts_per_run
            );
            report.run_cap_reached = true;
            return Ok(report);
        }

        for result in &failed {
            let outcome = self
                .store
                .claim_attempt(&run.id, &result.id, &result.test_case_id, self.limits())
                .await?;

            let attempt = match outcome {
                ClaimOutcome::Claimed(attempt) => attempt,
                ClaimOutcome::InFlight => {
                    debug!("Result {} already has an open attempt", result.id);
                    report.in_flight += 1;
                    continue;
                }
                ClaimOutcome::CapReached { prior } => {
                    debug!("Result {} used {} of {} attempts", result.id, prior, self.config.max_attempts_per_spec);
                    report.capped += 1;
                    continue;
                }
                ClaimOutcome::RunCapReached { total } => {
                    debug!("Run {} reached its attempt cap at {}", run.id, total);
                    report.run_cap_reached = true;
                    break;
                }
            };

            let task = heal_task(self.store.as_ref(), &run, &attempt, failed.len()).await?;
            if let Err(err) = enqueue_heal_task(self.queue.as_ref(), &task).await {
                error!("Failed to enqueue healing attempt {}: {}", attempt.id, err);
                let mut attempt = attempt;
                Ledger::new(self.store.clone())
                    .mark_failed(&mut attempt, format!("enqueue failed: {}", err))
                    .await?;
                return Err(err);
            }

            info!(
                "Scheduled healing attempt {} (#{}) for result {} of run {}",
                attempt.id, attempt.attempt, result.id, run.id
            );
            report.scheduled.push(attempt);
        }

        Ok(report)
    }
}

/// Build the healing task for a claimed attempt of `run`.
pub(crate) async fn heal_task(
    store: &dyn Store,
    run: &TestRun,
    attempt: &HealingAttempt,
    total_failed: usize,
) -> HealResult<HealTask> {
    let title = store
        .get_test_case(&attempt.test_case_id)
        .await?
        .and_then(|case| normalize_test_title(Some(&case.title)));
    Ok(HealTask {
        run_id: run.id.clone(),
        test_result_id: attempt.test_result_id.clone(),
        test_case_id: attempt.test_case_id.clone(),
        attempt_id: attempt.id.clone(),
        project_id: run.project_id.clone(),
        base_url: run.params.base_url.clone(),
        headed: run.params.headed,
        total_failed,
        test_title: title,
    })
}

/// Enqueue a healing task; a pending task for the same attempt absorbs it.
pub(crate) async fn enqueue_heal_task(queue: &dyn WorkQueue, task: &HealTask) -> HealResult<()> {
    let options = EnqueueOptions::new()
        .dedupe_key(format!("heal:{}", task.attempt_id))
        .attempts(HEAL_TASK_ATTEMPTS)
        .backoff(Backoff::Exponential {
            delay_ms: HEAL_TASK_BACKOFF_MS,
        });
    queue
        .enqueue(HEAL_QUEUE, serde_json::to_value(task)?, options)
        .await?;
    Ok(())
}

#[async_trait]
impl RunCompletionHook for HealScheduler {
    async fn on_run_failed(&self, run: &TestRun, failed: usize) -> anyhow::Result<()> {
        debug!("Run {} finished with {} failures", run.id, failed);
        let report = self.schedule_run(&run.id).await?;
        if !report.scheduled.is_empty() {
            info!("Scheduled {} healing attempts for run {}", report.scheduled.len(), run.id);
        }
        Ok(())
    }
}

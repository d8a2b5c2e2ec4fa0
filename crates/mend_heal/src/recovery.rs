//! Startup recovery of work that only lived in a previous process's queue.
//!
//! The store outlives the in-process queue. On startup, attempts still
//! `queued` get their healing task back, attempts left `running` are failed,
//! and unfinished runs are enqueued again.

use std::sync::Arc;

use mend_core::{HealConfig, HealingStatus, ResultStatus};
use mend_queue::WorkQueue;
use mend_runner::enqueue_run;
use mend_store::{AttemptFilter, Store};
use tracing::{info, warn};

use crate::error::HealResult;
use crate::ledger::Ledger;
use crate::rerun::payload_for;
use crate::scheduler::{enqueue_heal_task, heal_task};

/// Error recorded on attempts whose process exited mid-repair.
pub const INTERRUPTED: &str = "interrupted before completion";

/// What a recovery sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Queued attempts whose healing task was enqueued again
    pub requeued_attempts: usize,
    /// Running attempts marked failed
    pub interrupted_attempts: usize,
    /// Queued or running runs enqueued again
    pub requeued_runs: usize,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Re-enqueues stored work after a restart.
///
/// Run it once per process, before the consumers start, and only where no
/// other process is working the same store.
pub struct Recovery {
    store: Arc<dyn Store>,
    queue: Arc<dyn WorkQueue>,
    ledger: Ledger,
    heal_only: bool,
}

impl Recovery {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn WorkQueue>, config: &HealConfig) -> Self {
        Self {
            ledger: Ledger::new(store.clone()),
            store,
            queue,
            heal_only: config.heal_only,
        }
    }

    pub async fn sweep(&self) -> HealResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let running = AttemptFilter::new().status_in(vec![HealingStatus::Running]);
        for mut attempt in self.store.list_attempts(&running).await? {
            warn!(
                "Healing attempt {} was running when the last process stopped",
                attempt.id
            );
            self.ledger.mark_failed(&mut attempt, INTERRUPTED).await?;
            report.interrupted_attempts += 1;
        }

        let queued = AttemptFilter::new().status_in(vec![HealingStatus::Queued]);
        for mut attempt in self.store.list_attempts(&queued).await? {
            let Some(run) = self.store.get_run(&attempt.run_id).await? else {
                warn!("Healing attempt {} references missing run {}", attempt.id, attempt.run_id);
                let reason = format!("run {} not found", attempt.run_id);
                self.ledger.mark_failed(&mut attempt, reason).await?;
                continue;
            };
            let total_failed = self
                .store
                .list_results(&run.id)
                .await?
                .iter()
                .filter(|r| r.status == ResultStatus::Failed)
                .count();
            let task = heal_task(self.store.as_ref(), &run, &attempt, total_failed).await?;
            enqueue_heal_task(self.queue.as_ref(), &task).await?;
            report.requeued_attempts += 1;
        }

        for run in self.store.list_unfinished_runs().await? {
            if run.is_self_heal() && self.heal_only {
                continue;
            }
            enqueue_run(self.queue.as_ref(), &run.id, payload_for(&run)).await?;
            report.requeued_runs += 1;
        }

        if !report.is_empty() {
            info!(
                "Recovered {} queued attempt(s), failed {} interrupted attempt(s), requeued {} run(s)",
                report.requeued_attempts, report.interrupted_attempts, report.requeued_runs
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_core::{HealTask, RunStatus, RunTask, TestResult, TestRun, TriggerKind, HEAL_QUEUE, RUN_QUEUE};
    use mend_queue::MemoryQueue;
    use mend_store::{ClaimLimits, MemoryStore};

    const LIMITS: ClaimLimits = ClaimLimits {
        per_spec: 3,
        per_run: 10,
    };

    #[tokio::test]
    async fn test_sweep_requeues_and_fails_interrupted() {
        let store = Arc::new(MemoryStore::new());
        let mut run = TestRun::new("p1", TriggerKind::User);
        run.status = RunStatus::Failed;
        store.create_run(&run).await.unwrap();
        for case in ["tc1", "tc2"] {
            let result = TestResult::new(&run.id, case, ResultStatus::Failed);
            store.create_result(&result).await.unwrap();
            store.claim_attempt(&run.id, &result.id, case, LIMITS).await.unwrap();
        }
        let ledger = Ledger::new(store.clone());
        let mut running = store
            .find_first_attempt(&AttemptFilter::for_run(&run.id))
            .await
            .unwrap()
            .unwrap();
        ledger.mark_running(&mut running).await.unwrap();

        let pending = TestRun::new("p1", TriggerKind::Ci);
        store.create_run(&pending).await.unwrap();

        let queue = MemoryQueue::new();
        let report = Recovery::new(store.clone(), Arc::new(queue.clone()), &HealConfig::default())
            .sweep()
            .await
            .unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                requeued_attempts: 1,
                interrupted_attempts: 1,
                requeued_runs: 1,
            }
        );

        let failed = ledger.get(&running.id).await.unwrap();
        assert_eq!(failed.status, HealingStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some(INTERRUPTED));

        let task: HealTask = queue.pending_tasks(HEAL_QUEUE)[0].decode().unwrap();
        assert_ne!(task.attempt_id, running.id);
        assert_eq!(task.total_failed, 2);
        let run_task: RunTask = queue.pending_tasks(RUN_QUEUE)[0].decode().unwrap();
        assert_eq!(run_task.run_id, pending.id);
    }

    #[tokio::test]
    async fn test_heal_only_leaves_recorded_reruns() {
        let store = Arc::new(MemoryStore::new());
        let rerun = TestRun::new("p1", TriggerKind::SelfHeal).started();
        store.create_run(&rerun).await.unwrap();

        let queue = MemoryQueue::new();
        let report = Recovery::new(
            store.clone(),
            Arc::new(queue.clone()),
            &HealConfig::default().heal_only(true),
        )
        .sweep()
        .await
        .unwrap();
        assert!(report.is_empty());
        assert!(queue.pending_tasks(RUN_QUEUE).is_empty());
    }
}

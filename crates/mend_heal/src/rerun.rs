//! Reruns after a successful repair.

use std::sync::Arc;

use chrono::Utc;
use mend_core::{RunPayload, RunStatus, TestRun, TriggerKind};
use mend_queue::WorkQueue;
use mend_runner::enqueue_run;
use mend_store::Store;
use tracing::{debug, error, info};

use crate::error::HealResult;

/// What a rerun executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RerunScope {
    /// Only the repaired spec, optionally narrowed to one test title
    Spec { file: String, grep: Option<String> },
    /// Everything the original run executed
    Suite,
}

/// Creates self-heal reruns linked to the run they re-validate.
pub struct RerunTrigger {
    store: Arc<dyn Store>,
    queue: Arc<dyn WorkQueue>,
    heal_only: bool,
}

impl RerunTrigger {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn WorkQueue>) -> Self {
        Self {
            store,
            queue,
            heal_only: false,
        }
    }

    /// Record reruns without enqueueing them.
    pub fn heal_only(mut self, heal_only: bool) -> Self {
        self.heal_only = heal_only;
        self
    }

    /// Create the rerun record and, unless in heal-only mode, enqueue it.
    ///
    /// `key` names the repair that caused the rerun. A second trigger with
    /// the same key returns the run the first one created. A rerun whose
    /// enqueue fails is marked failed and releases its key.
    pub async fn trigger(
        &self,
        origin: &TestRun,
        scope: RerunScope,
        key: impl Into<String>,
    ) -> HealResult<TestRun> {
        let mut params = origin.params.carry_forward();
        if let RerunScope::Spec { file, grep } = &scope {
            params.file = Some(file.clone());
            params.grep = grep.clone();
        } else {
            params.file = origin.params.file.clone();
            params.grep = origin.params.grep.clone();
        }

        let mut rerun = TestRun::new(&origin.project_id, TriggerKind::SelfHeal)
            .rerun_of(&origin.id)
            .with_rerun_key(key)
            .with_params(params)
            .started();
        if let Some(existing) = self.store.create_rerun(&rerun).await? {
            debug!(
                "Rerun {} of run {} already exists for {}",
                existing.id,
                origin.id,
                existing.rerun_key.as_deref().unwrap_or_default()
            );
            return Ok(existing);
        }

        if self.heal_only {
            info!(
                "Heal-only mode: recorded rerun {} of run {} without executing it",
                rerun.id, origin.id
            );
            return Ok(rerun);
        }

        if let Err(err) = enqueue_run(self.queue.as_ref(), &rerun.id, payload_for(&rerun)).await {
            error!("Failed to enqueue rerun {} of run {}: {}", rerun.id, origin.id, err);
            rerun.status = RunStatus::Failed;
            rerun.finished_at = Some(Utc::now());
            rerun.error = Some(format!("enqueue failed: {}", err));
            rerun.rerun_key = None;
            self.store.update_run(&rerun).await?;
            return Err(err.into());
        }
        info!(
            "Queued rerun {} of run {} ({})",
            rerun.id,
            origin.id,
            match &scope {
                RerunScope::Spec { file, .. } => file.as_str(),
                RerunScope::Suite => "full suite",
            }
        );
        Ok(rerun)
    }
}

/// Execution payload for a stored run.
pub fn payload_for(run: &TestRun) -> RunPayload {
    RunPayload {
        project_id: run.project_id.clone(),
        file: run.params.file.clone(),
        grep: run.params.grep.clone(),
        headed: run.params.headed,
        base_url: run.params.base_url.clone(),
        timeout_ms: None,
    }
}

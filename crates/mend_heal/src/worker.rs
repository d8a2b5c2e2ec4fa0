//! Healing worker: repairs one failed result per task.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use mend_core::{HealConfig, HealTask, HealingAttempt, HealingStatus, PathsConfig, TestRun};
use mend_queue::{QueuedTask, TaskHandler, WorkQueue};
use mend_store::{AttemptFilter, Store};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::classify::{classify_failure, FailureTag};
use crate::context::{collect_failure_context, FailureContext};
use crate::diff::unified_diff;
use crate::error::{HealError, HealResult};
use crate::ledger::{AttemptSuccess, Ledger};
use crate::repair::{repair_with_timeout, RepairRequest, RepairService};
use crate::rerun::{RerunScope, RerunTrigger};
use crate::strategies::{PatchOutcome, Strategy};

/// Name recorded for repairs made by the repair service.
pub const AI_STRATEGY: &str = "ai";

/// Result of a processed healing task.
#[derive(Debug, Clone, PartialEq)]
pub struct HealOutcome {
    pub attempt: HealingAttempt,
    pub tag: FailureTag,
    /// Strategy that produced the patch
    pub strategy: String,
    pub rerun: Option<TestRun>,
}

/// A replacement spec and how it was obtained.
struct Repair {
    strategy: String,
    text: String,
    summary: String,
    prompt: Option<serde_json::Value>,
    response: serde_json::Value,
}

/// Deterministic strategies to try for a tag, in order.
///
/// The malformed-URL fix always runs first.
pub fn strategies_for(tag: FailureTag) -> Vec<Strategy> {
    let mut strategies = vec![Strategy::MalformedUrl];
    match tag {
        FailureTag::NavTimeout => strategies.push(Strategy::NavTimeout),
        FailureTag::StrictLocator => strategies.push(Strategy::StrictLocator),
        _ => {}
    }
    strategies
}

/// Consumes healing tasks.
pub struct HealWorker {
    store: Arc<dyn Store>,
    ledger: Ledger,
    repair: Arc<dyn RepairService>,
    reruns: RerunTrigger,
    config: HealConfig,
    paths: PathsConfig,
}

impl HealWorker {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn WorkQueue>,
        repair: Arc<dyn RepairService>,
        config: HealConfig,
        paths: PathsConfig,
    ) -> Self {
        Self {
            ledger: Ledger::new(store.clone()),
            reruns: RerunTrigger::new(store.clone(), queue).heal_only(config.heal_only),
            store,
            repair,
            config,
            paths,
        }
    }

    /// Run the healing algorithm for one task.
    ///
    /// A redelivered task for a succeeded attempt only re-triggers its rerun,
    /// which returns the existing rerun if one was created. Returns `None`
    /// for any other attempt that is no longer queued.
    pub async fn process(&self, task: &HealTask) -> HealResult<Option<HealOutcome>> {
        let mut attempt = self.ledger.get(&task.attempt_id).await?;
        let status = attempt.status;
        match status {
            HealingStatus::Queued => {}
            HealingStatus::Succeeded => return self.resume(task, attempt).await.map(Some),
            status => {
                debug!(
                    "Healing attempt {} is {}, ignoring redelivered task",
                    attempt.id, status
                );
                return Ok(None);
            }
        }
        self.ledger.mark_running(&mut attempt).await?;
        info!(
            "Starting healing attempt {} for run {} (result {})",
            attempt.id, task.run_id, task.test_result_id
        );

        let (tag, context, strategy) = match self.heal(task, &mut attempt).await {
            Ok(healed) => healed,
            Err(err) => {
                error!("Healing attempt {} failed: {}", attempt.id, err);
                self.ledger.mark_failed(&mut attempt, err.to_string()).await?;
                return Err(err);
            }
        };

        let rerun = self.trigger_rerun(task, &attempt, tag, &context).await?;
        Ok(Some(HealOutcome {
            attempt,
            tag,
            strategy,
            rerun,
        }))
    }

    /// Finish a succeeded attempt whose rerun may not have been triggered.
    async fn resume(&self, task: &HealTask, attempt: HealingAttempt) -> HealResult<HealOutcome> {
        debug!("Healing attempt {} already succeeded, re-triggering rerun", attempt.id);
        let context = collect_failure_context(self.store.as_ref(), &self.paths, task).await?;
        let tag = classify_failure(context.message.as_deref().unwrap_or_default());
        let strategy = attempt
            .response
            .as_ref()
            .and_then(|r| r.get("strategy"))
            .and_then(|s| s.as_str())
            .unwrap_or(AI_STRATEGY)
            .to_string();

        let rerun = self.trigger_rerun(task, &attempt, tag, &context).await?;
        Ok(HealOutcome {
            attempt,
            tag,
            strategy,
            rerun,
        })
    }

    async fn heal(
        &self,
        task: &HealTask,
        attempt: &mut HealingAttempt,
    ) -> HealResult<(FailureTag, FailureContext, String)> {
        let context = collect_failure_context(self.store.as_ref(), &self.paths, task).await?;
        let message = context.message.clone().unwrap_or_default();
        let tag = classify_failure(&message);
        debug!("Attempt {} classified as {}", attempt.id, tag);

        let repair = self.find_repair(&context, &message, tag).await?;
        write_spec(&context.spec_path, &repair.text).await?;
        let diff = unified_diff(&context.relative_path, &context.spec_text, &repair.text);

        self.ledger
            .mark_succeeded(
                attempt,
                AttemptSuccess {
                    summary: repair.summary,
                    diff,
                    prompt: repair.prompt,
                    response: Some(repair.response),
                },
            )
            .await?;
        info!(
            "Healing attempt {} patched {} with {}",
            attempt.id, context.relative_path, repair.strategy
        );
        Ok((tag, context, repair.strategy))
    }

    async fn find_repair(
        &self,
        context: &FailureContext,
        message: &str,
        tag: FailureTag,
    ) -> HealResult<Repair> {
        for strategy in strategies_for(tag) {
            if let PatchOutcome::Patched { text, summary } = strategy.apply(&context.spec_text, message) {
                return Ok(Repair {
                    strategy: strategy.name().to_string(),
                    text,
                    summary,
                    prompt: None,
                    response: json!({ "strategy": strategy.name() }),
                });
            }
            debug!("Strategy {} did not match {}", strategy, context.relative_path);
        }

        let request = RepairRequest::from_context(context, self.config.log_tail_bytes);
        let response =
            repair_with_timeout(self.repair.as_ref(), &request, self.config.repair_timeout_ms).await?;
        Ok(Repair {
            strategy: AI_STRATEGY.to_string(),
            text: response.updated_spec,
            summary: response.summary,
            prompt: Some(serde_json::to_value(&request)?),
            response: json!({ "raw": response.raw }),
        })
    }

    async fn trigger_rerun(
        &self,
        task: &HealTask,
        attempt: &HealingAttempt,
        tag: FailureTag,
        context: &FailureContext,
    ) -> HealResult<Option<TestRun>> {
        if tag == FailureTag::InfraError {
            info!(
                "Run {} failed on infrastructure, not rerunning after repair",
                task.run_id
            );
            return Ok(None);
        }

        let origin = self
            .store
            .get_run(&task.run_id)
            .await?
            .ok_or_else(|| HealError::RunNotFound(task.run_id.clone()))?;

        let (scope, key) = if task.total_failed <= 1 {
            let scope = RerunScope::Spec {
                file: context.relative_path.clone(),
                grep: context.test_title.clone().or_else(|| task.test_title.clone()),
            };
            (scope, format!("attempt:{}", attempt.id))
        } else {
            let outstanding = self.ledger.outstanding(&task.run_id).await?;
            if outstanding > 0 {
                debug!(
                    "Run {} still has {} unsucceeded attempts, deferring rerun",
                    task.run_id, outstanding
                );
                return Ok(None);
            }
            // Every sibling that sees the same settled ledger shares one key.
            let total = self
                .store
                .count_attempts(&AttemptFilter::for_run(&task.run_id))
                .await?;
            (RerunScope::Suite, format!("suite:{}:{}", task.run_id, total))
        };

        Ok(Some(self.reruns.trigger(&origin, scope, key).await?))
    }
}

/// Overwrite a spec file with its repaired text.
async fn write_spec(path: &Path, text: &str) -> HealResult<()> {
    let write = async {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, text).await
    };
    write.await.map_err(|source| HealError::WriteFailure {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl TaskHandler for HealWorker {
    async fn handle(&self, task: &QueuedTask) -> anyhow::Result<()> {
        let heal_task: HealTask = task.decode()?;
        let Err(err) = self.process(&heal_task).await else {
            return Ok(());
        };
        // A failed attempt is final in the ledger; redelivery cannot change it.
        let recorded = self
            .store
            .get_attempt(&heal_task.attempt_id)
            .await?
            .is_some_and(|a| a.status == HealingStatus::Failed);
        if recorded {
            warn!("Healing attempt {} failed: {}", heal_task.attempt_id, err);
            return Ok(());
        }
        Err(err.into())
    }
}

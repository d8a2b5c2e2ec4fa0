//! Run worker: executes queued runs and records their results.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mend_core::{
    PathsConfig, RunPayload, RunStatus, RunTask, TestCase, TestResult, TestRun, RUN_QUEUE,
};
use mend_queue::{Backoff, EnqueueOptions, QueuedTask, TaskHandler, TaskId, WorkQueue};
use mend_store::Store;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{RunnerError, RunnerResult};
use crate::executor::{ExecutionRequest, TestExecutor};
use crate::grep::resolve_grep;
use crate::hook::RunCompletionHook;
use crate::report::{filter_runner_error, parse_report, strip_ansi};

/// Delivery attempts for a run task.
pub const RUN_TASK_ATTEMPTS: u32 = 3;

/// Base delay of the exponential retry backoff for run tasks.
pub const RUN_TASK_BACKOFF_MS: u64 = 30_000;

/// Counters stored as the run summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub framework: String,
    pub parsed_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Enqueue execution of a stored run.
pub async fn enqueue_run(
    queue: &dyn WorkQueue,
    run_id: &str,
    payload: RunPayload,
) -> RunnerResult<TaskId> {
    let task = RunTask {
        run_id: run_id.to_string(),
        payload,
    };
    let options = EnqueueOptions::new()
        .dedupe_key(format!("run:{}", run_id))
        .attempts(RUN_TASK_ATTEMPTS)
        .backoff(Backoff::Exponential {
            delay_ms: RUN_TASK_BACKOFF_MS,
        });
    let id = queue
        .enqueue(RUN_QUEUE, serde_json::to_value(&task)?, options)
        .await?;
    debug!("Enqueued run {} as task {}", run_id, id);
    Ok(id)
}

/// Executes runs and persists their results.
pub struct RunWorker {
    store: Arc<dyn Store>,
    executor: Arc<dyn TestExecutor>,
    workdir: PathBuf,
    run_logs_dir: PathBuf,
    timeout_ms: u64,
    hook: Option<Arc<dyn RunCompletionHook>>,
}

impl RunWorker {
    pub fn new(store: Arc<dyn Store>, executor: Arc<dyn TestExecutor>, paths: &PathsConfig) -> Self {
        Self {
            store,
            executor,
            workdir: paths.repo_root.clone(),
            run_logs_dir: paths.run_logs_dir.clone(),
            timeout_ms: 10 * 60 * 1000,
            hook: None,
        }
    }

    /// Register the callback for failed runs.
    pub fn with_hook(mut self, hook: Arc<dyn RunCompletionHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Default bound for a test command when the payload sets none.
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    fn build_request(&self, run: &TestRun, payload: &RunPayload, log_dir: &Path) -> ExecutionRequest {
        let file = payload.file.clone().or_else(|| run.params.file.clone());
        let grep = resolve_grep(payload.grep.as_deref().or(run.params.grep.as_deref()));
        let base_url = payload.base_url.clone().or_else(|| run.params.base_url.clone());
        let headed = payload.headed.or(run.params.headed).unwrap_or(false);

        let mut request = ExecutionRequest::new(&self.workdir, log_dir.join("report.json"))
            .headed(headed)
            .timeout_ms(payload.timeout_ms.unwrap_or(self.timeout_ms));
        if let Some(file) = file {
            request = request.file(file);
        }
        if let Some(grep) = grep {
            request = request.grep(grep);
        }
        if let Some(base_url) = base_url {
            request = request.base_url(base_url);
        }
        request
    }

    async fn fail_run(&self, run: &mut TestRun, message: String) -> RunnerResult<()> {
        run.status = RunStatus::Failed;
        run.finished_at = Some(Utc::now());
        run.error = Some(message);
        self.store.update_run(run).await?;
        Ok(())
    }

    /// Execute one run task end to end.
    pub async fn process(&self, task: &RunTask) -> RunnerResult<TestRun> {
        let mut run = self
            .store
            .get_run(&task.run_id)
            .await?
            .ok_or_else(|| RunnerError::RunNotFound(task.run_id.clone()))?;

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        run.finished_at = None;
        self.store.update_run(&run).await?;
        info!("Run {} started ({})", run.id, run.trigger);

        let log_dir = self.run_logs_dir.join(&run.id);
        tokio::fs::create_dir_all(&log_dir).await?;
        let request = self.build_request(&run, &task.payload, &log_dir);

        let outcome = match self.executor.execute(&request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Run {} failed to execute: {}", run.id, err);
                self.fail_run(&mut run, strip_ansi(&err.to_string())).await?;
                return Err(err);
            }
        };

        let header = format!(
            "[worker] headful={} file={} grep={} baseUrl={}\n",
            request.headed,
            request.files.first().map(String::as_str).unwrap_or("all"),
            request.grep.as_deref().unwrap_or(""),
            request.base_url.as_deref().unwrap_or(""),
        );
        tokio::fs::write(log_dir.join("stdout.txt"), header + &outcome.stdout).await?;
        tokio::fs::write(log_dir.join("stderr.txt"), &outcome.stderr).await?;

        let cases = outcome.report.as_ref().map(parse_report).unwrap_or_default();
        let mut summary = RunSummary {
            framework: self.executor.framework().to_string(),
            ..Default::default()
        };

        for case in &cases {
            let key = TestCase::make_key(&case.file, &case.full_name);
            let test_case = self
                .store
                .upsert_test_case(&run.project_id, &key, &case.full_name)
                .await?;

            let mut result = TestResult::new(&run.id, &test_case.id, case.status.to_result_status());
            result.duration_ms = case.duration_ms;
            result.message = case.message.clone();
            self.store.create_result(&result).await?;

            summary.parsed_count += 1;
            if case.status.is_failure() {
                summary.failed += 1;
            } else if case.status == crate::report::CaseStatus::Passed {
                summary.passed += 1;
            } else {
                summary.skipped += 1;
            }
        }

        let ok = summary.failed == 0 && outcome.ok;
        run.status = if ok { RunStatus::Succeeded } else { RunStatus::Failed };
        run.finished_at = Some(Utc::now());
        run.summary = Some(serde_json::to_string(&summary)?);
        run.error = if ok {
            None
        } else {
            Some(filter_runner_error(&outcome.stderr).unwrap_or_else(|| "Test command failed".to_string()))
        };
        self.store.update_run(&run).await?;

        info!(
            "Run {} finished {}: {} passed, {} failed, {} skipped",
            run.id, run.status, summary.passed, summary.failed, summary.skipped
        );

        if !ok && summary.failed > 0 {
            if let Some(hook) = &self.hook {
                if let Err(err) = hook.on_run_failed(&run, summary.failed).await {
                    warn!("Failure hook for run {} errored: {:#}", run.id, err);
                }
            }
        }

        Ok(run)
    }
}

#[async_trait]
impl TaskHandler for RunWorker {
    async fn handle(&self, task: &QueuedTask) -> anyhow::Result<()> {
        let run_task: RunTask = task.decode()?;
        self.process(&run_task).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockExecutor, MockOutcome};
    use mend_core::{RunParams, TriggerKind};
    use mend_store::MemoryStore;
    use serde_json::json;

    fn worker(store: Arc<MemoryStore>, executor: MockExecutor, logs: &Path) -> RunWorker {
        let mut paths = PathsConfig::rooted(logs);
        paths.run_logs_dir = logs.join("runner-logs");
        RunWorker::new(store, Arc::new(executor), &paths)
    }

    #[tokio::test]
    async fn test_payload_overrides_run_params() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let executor = MockExecutor::new();
        let worker = worker(store.clone(), executor.clone(), dir.path());

        let run = TestRun::new("p1", TriggerKind::User)
            .with_params(RunParams::new().base_url("https://a.example.com").headed(true));
        store.create_run(&run).await.unwrap();

        let mut payload = RunPayload::new("p1");
        payload.grep = Some("logs in".into());
        payload.base_url = Some("https://b.example.com".into());
        worker
            .process(&RunTask {
                run_id: run.id.clone(),
                payload,
            })
            .await
            .unwrap();

        let request = &executor.requests()[0];
        assert_eq!(request.base_url.as_deref(), Some("https://b.example.com"));
        assert!(request.headed);
        assert_eq!(request.grep.as_deref(), Some("(?:^|\\s)logs in(?:$|\\s)"));
    }

    #[tokio::test]
    async fn test_empty_failure_falls_back_to_generic_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let executor = MockExecutor::new()
            .add_outcome(MockOutcome::failed(json!({ "suites": [] })).with_stderr("npm notice hi\n"));
        let worker = worker(store.clone(), executor, dir.path());

        let run = TestRun::new("p1", TriggerKind::Ci);
        store.create_run(&run).await.unwrap();

        let finished = worker
            .process(&RunTask {
                run_id: run.id.clone(),
                payload: RunPayload::new("p1"),
            })
            .await
            .unwrap();

        assert_eq!(finished.status, RunStatus::Failed);
        assert_eq!(finished.error.as_deref(), Some("Test command failed"));
    }

    #[tokio::test]
    async fn test_missing_run_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let worker = worker(store, MockExecutor::new(), dir.path());

        let err = worker
            .process(&RunTask {
                run_id: "nope".into(),
                payload: RunPayload::new("p1"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::RunNotFound(_)));
    }
}

//! Integration tests for self-healing.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mend_core::{
    HealConfig, HealTask, HealingAttempt, HealingStatus, PathsConfig, ResultStatus, RunPayload,
    RunStatus, RunTask, TestResult, TestRun, TriggerKind, HEAL_QUEUE, RUN_QUEUE,
};
use mend_heal::{
    FailureTag, HealError, HealResult, HealScheduler, HealWorker, Recovery, RepairRequest,
    RepairResponse, RepairService, AI_STRATEGY,
};
use mend_queue::{MemoryQueue, TaskHandler};
use mend_runner::{enqueue_run, MockExecutor, MockOutcome, RunWorker};
use mend_store::{AttemptFilter, MemoryStore, SqliteStore, Store};
use mockall::mock;
use serde_json::json;
use tempfile::TempDir;

mock! {
    pub Repairer {}

    #[async_trait]
    impl RepairService for Repairer {
        async fn repair(&self, request: &RepairRequest) -> HealResult<RepairResponse>;
    }
}

/// Repair service that never answers in time.
struct SlowRepairer;

#[async_trait]
impl RepairService for SlowRepairer {
    async fn repair(&self, _request: &RepairRequest) -> HealResult<RepairResponse> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(HealError::RepairService("unreachable".into()))
    }
}

fn unused_repairer() -> Arc<dyn RepairService> {
    let mut repairer = MockRepairer::new();
    repairer.expect_repair().times(0);
    Arc::new(repairer)
}

struct Harness {
    dir: TempDir,
    store: Arc<MemoryStore>,
    queue: MemoryQueue,
    paths: PathsConfig,
    config: HealConfig,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig::rooted(dir.path());
        Self {
            dir,
            store: Arc::new(MemoryStore::new()),
            queue: MemoryQueue::new(),
            paths,
            config: HealConfig::default(),
        }
    }

    fn spec_path(&self, name: &str) -> PathBuf {
        self.dir.path().join("testmend-generated").join("web").join(name)
    }

    fn write_spec(&self, name: &str, text: &str) {
        let path = self.spec_path(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    fn read_spec(&self, name: &str) -> String {
        std::fs::read_to_string(self.spec_path(name)).unwrap()
    }

    async fn run(&self) -> TestRun {
        let run = TestRun::new("web", TriggerKind::User);
        self.store.create_run(&run).await.unwrap();
        run
    }

    async fn failure(&self, run: &TestRun, spec: &str, title: &str, message: &str) -> TestResult {
        let key = format!("testmend-generated/web/{}#{}", spec, title);
        let case = self.store.upsert_test_case("web", &key, title).await.unwrap();
        let result = TestResult::new(&run.id, &case.id, ResultStatus::Failed).with_message(message);
        self.store.create_result(&result).await.unwrap();
        result
    }

    fn scheduler(&self) -> HealScheduler {
        HealScheduler::new(
            self.store.clone(),
            Arc::new(self.queue.clone()),
            self.config.clone(),
        )
    }

    fn worker(&self, repairer: Arc<dyn RepairService>) -> HealWorker {
        HealWorker::new(
            self.store.clone(),
            Arc::new(self.queue.clone()),
            repairer,
            self.config.clone(),
            self.paths.clone(),
        )
    }

    fn heal_tasks(&self) -> Vec<HealTask> {
        self.queue
            .pending_tasks(HEAL_QUEUE)
            .iter()
            .map(|t| t.decode().unwrap())
            .collect()
    }

    fn run_tasks(&self) -> Vec<RunTask> {
        self.queue
            .pending_tasks(RUN_QUEUE)
            .iter()
            .map(|t| t.decode().unwrap())
            .collect()
    }

    async fn open_attempts(&self, result_id: &str) -> u32 {
        self.store
            .count_attempts(&AttemptFilter::for_result(result_id).open())
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_scenario_a_nav_timeout() {
    let h = Harness::new();
    h.write_spec(
        "home.spec.ts",
        "test('opens home', async ({ page }) => {\n  const url = process.env.BASE_URL!;\n  await page.goto(url);\n});\n",
    );
    let run = h.run().await;
    h.failure(&run, "home.spec.ts", "Home > opens home", "page.goto: Timeout 5000ms exceeded").await;

    let report = h.scheduler().schedule_run(&run.id).await.unwrap();
    assert_eq!(report.scheduled.len(), 1);
    assert_eq!(report.scheduled[0].attempt, 1);

    let task = h.heal_tasks().remove(0);
    let outcome = h.worker(unused_repairer()).process(&task).await.unwrap().unwrap();

    assert_eq!(outcome.tag, FailureTag::NavTimeout);
    assert_eq!(outcome.strategy, "nav-timeout");
    assert_eq!(outcome.attempt.status, HealingStatus::Succeeded);
    assert!(h
        .read_spec("home.spec.ts")
        .contains("await page.goto(url, { waitUntil: \"domcontentloaded\", timeout: 20000 });"));

    let stored = h.store.get_attempt(&task.attempt_id).await.unwrap().unwrap();
    assert_eq!(stored.status, HealingStatus::Succeeded);
    assert_eq!(stored.response, Some(json!({ "strategy": "nav-timeout" })));
    assert!(stored.prompt.is_none());
    let diff = stored.diff.unwrap();
    assert!(diff.starts_with("--- a/testmend-generated/web/home.spec.ts"));
    assert!(diff.contains("-  await page.goto(url);"));

    let rerun = outcome.rerun.expect("single failure triggers a rerun");
    assert_eq!(rerun.rerun_of_id.as_deref(), Some(run.id.as_str()));
    assert_eq!(rerun.trigger, TriggerKind::SelfHeal);
    assert_eq!(rerun.status, RunStatus::Running);

    let run_tasks = h.run_tasks();
    assert_eq!(run_tasks.len(), 1);
    assert_eq!(run_tasks[0].run_id, rerun.id);
    assert_eq!(
        run_tasks[0].payload.file.as_deref(),
        Some("testmend-generated/web/home.spec.ts")
    );
    assert_eq!(run_tasks[0].payload.grep.as_deref(), Some("opens home"));
}

#[tokio::test]
async fn test_scenario_b_strict_locator() {
    let h = Harness::new();
    h.write_spec(
        "pricing.spec.ts",
        "test('opens pricing', async ({ page }) => {\n  await page.getByRole('link', { name: 'Pricing' }).click();\n});\n",
    );
    let run = h.run().await;
    h.failure(
        &run,
        "pricing.spec.ts",
        "opens pricing",
        "locator.click: Error: strict mode violation: getByRole('link', { name: 'Pricing' }) resolved to 2 elements:\n    1) <a href=\"/pricing\">Pricing</a>\n    2) <a href=\"/pricing\" class=\"footer\">Pricing</a>",
    )
    .await;

    h.scheduler().schedule_run(&run.id).await.unwrap();
    let task = h.heal_tasks().remove(0);
    let outcome = h.worker(unused_repairer()).process(&task).await.unwrap().unwrap();

    assert_eq!(outcome.tag, FailureTag::StrictLocator);
    assert_eq!(outcome.attempt.status, HealingStatus::Succeeded);
    assert!(h
        .read_spec("pricing.spec.ts")
        .contains("page.locator('a[href=\"/pricing\"]').first().click()"));
}

#[tokio::test]
async fn test_scenario_c_malformed_url() {
    let h = Harness::new();
    h.write_spec(
        "login.spec.ts",
        "test('logs in', async ({ page }) => {\n  await page.goto('https://app.example.com.com/login');\n});\n",
    );
    let run = h.run().await;
    h.failure(
        &run,
        "login.spec.ts",
        "logs in",
        "page.goto: net::ERR_NAME_NOT_RESOLVED at https://app.example.com.com/login",
    )
    .await;

    h.scheduler().schedule_run(&run.id).await.unwrap();
    let task = h.heal_tasks().remove(0);
    let outcome = h.worker(unused_repairer()).process(&task).await.unwrap().unwrap();

    assert_eq!(outcome.tag, FailureTag::MalformedUrl);
    assert_eq!(outcome.strategy, "malformed-url");
    let spec = h.read_spec("login.spec.ts");
    assert!(spec.contains("page.goto('https://app.example.com/login', { waitUntil: \"domcontentloaded\", timeout: 20000 })"));
    assert!(outcome.rerun.is_some());
    assert_eq!(h.run_tasks().len(), 1);
}

#[tokio::test]
async fn test_scenario_d_infra_error_heals_without_rerun() {
    let h = Harness::new();
    let original = "test('checkout', async ({ page }) => {\n  await page.goto('/checkout', { timeout: 30000 });\n});\n";
    h.write_spec("checkout.spec.ts", original);
    let run = h.run().await;
    h.failure(
        &run,
        "checkout.spec.ts",
        "checkout",
        "page.goto: net::ERR_CONNECTION_REFUSED at http://localhost:3000/checkout",
    )
    .await;

    let mut repairer = MockRepairer::new();
    repairer
        .expect_repair()
        .withf(|request: &RepairRequest| {
            request.spec_path == "testmend-generated/web/checkout.spec.ts"
                && request.failure_message.as_deref().map_or(false, |m| m.contains("ERR_CONNECTION_REFUSED"))
        })
        .times(1)
        .returning(|_| {
            Ok(RepairResponse {
                updated_spec: "test('checkout', async ({ page }) => {\n  await page.goto('/checkout', { timeout: 60000 });\n});\n".into(),
                summary: "Waited longer for checkout".into(),
                raw: "{\"summary\":\"Waited longer for checkout\"}".into(),
            })
        });

    h.scheduler().schedule_run(&run.id).await.unwrap();
    let task = h.heal_tasks().remove(0);
    let outcome = h.worker(Arc::new(repairer)).process(&task).await.unwrap().unwrap();

    assert_eq!(outcome.tag, FailureTag::InfraError);
    assert_eq!(outcome.strategy, AI_STRATEGY);
    assert_eq!(outcome.attempt.status, HealingStatus::Succeeded);
    assert!(outcome.rerun.is_none());
    assert!(h.run_tasks().is_empty());
    assert_eq!(h.store.run_count(), 1);
    assert!(h.read_spec("checkout.spec.ts").contains("timeout: 60000"));

    let stored = h.store.get_attempt(&task.attempt_id).await.unwrap().unwrap();
    assert_eq!(stored.summary.as_deref(), Some("Waited longer for checkout"));
    assert_eq!(stored.prompt.as_ref().unwrap()["specContent"], original);
    assert_eq!(
        stored.response,
        Some(json!({ "raw": "{\"summary\":\"Waited longer for checkout\"}" }))
    );
}

#[tokio::test]
async fn test_scenario_e_open_attempt_blocks_second() {
    let h = Harness::new();
    let run = h.run().await;
    let result = h.failure(&run, "a.spec.ts", "a", "expect failed").await;

    let first = h.scheduler().schedule_run(&run.id).await.unwrap();
    assert_eq!(first.scheduled.len(), 1);

    let second = h.scheduler().schedule_run(&run.id).await.unwrap();
    assert!(second.scheduled.is_empty());
    assert_eq!(second.in_flight, 1);

    assert_eq!(h.open_attempts(&result.id).await, 1);
    assert_eq!(
        h.store.count_attempts(&AttemptFilter::for_result(&result.id)).await.unwrap(),
        1
    );
    assert_eq!(h.heal_tasks().len(), 1);
}

#[tokio::test]
async fn test_scenario_f_spec_cap_skips_only_exhausted_result() {
    let h = Harness::new();
    let run = h.run().await;
    let exhausted = h.failure(&run, "a.spec.ts", "a", "expect failed").await;
    let fresh = h.failure(&run, "b.spec.ts", "b", "expect failed").await;

    for n in 1..=3 {
        let mut attempt = HealingAttempt::queued(&run.id, &exhausted.id, &exhausted.test_case_id, n);
        attempt.status = HealingStatus::Failed;
        h.store.create_attempt(&attempt).await.unwrap();
    }

    let report = h.scheduler().schedule_run(&run.id).await.unwrap();
    assert_eq!(report.capped, 1);
    assert_eq!(report.scheduled.len(), 1);
    assert_eq!(report.scheduled[0].test_result_id, fresh.id);
    assert_eq!(
        h.store.count_attempts(&AttemptFilter::for_result(&exhausted.id)).await.unwrap(),
        3
    );
}

#[tokio::test]
async fn test_next_attempt_number_follows_prior_count() {
    let h = Harness::new();
    let run = h.run().await;
    let result = h.failure(&run, "a.spec.ts", "a", "expect failed").await;

    let mut prior = HealingAttempt::queued(&run.id, &result.id, &result.test_case_id, 1);
    prior.status = HealingStatus::Failed;
    h.store.create_attempt(&prior).await.unwrap();

    let report = h.scheduler().schedule_run(&run.id).await.unwrap();
    assert_eq!(report.scheduled[0].attempt, 2);
    assert_eq!(report.scheduled[0].status, HealingStatus::Queued);
}

#[tokio::test]
async fn test_spec_not_found_fails_attempt() {
    let h = Harness::new();
    let run = h.run().await;
    h.failure(&run, "missing.spec.ts", "gone", "page.goto: Timeout 5000ms exceeded").await;

    h.scheduler().schedule_run(&run.id).await.unwrap();
    let task = h.heal_tasks().remove(0);
    let err = h.worker(unused_repairer()).process(&task).await.unwrap_err();
    assert!(matches!(err, HealError::SpecNotFound { .. }));

    let stored = h.store.get_attempt(&task.attempt_id).await.unwrap().unwrap();
    assert_eq!(stored.status, HealingStatus::Failed);
    assert!(stored.error.unwrap().contains("Spec file not found"));
    assert!(h.run_tasks().is_empty());
}

#[tokio::test]
async fn test_repair_timeout_leaves_spec_untouched() {
    let mut h = Harness::new();
    h.config = HealConfig::default().timeout_ms(50);
    let original = "test('a', async ({ page }) => {\n  await expect(page.getByText('Hi')).toBeVisible();\n});\n";
    h.write_spec("a.spec.ts", original);
    let run = h.run().await;
    h.failure(&run, "a.spec.ts", "a", "expect(locator).toBeVisible() failed").await;

    h.scheduler().schedule_run(&run.id).await.unwrap();
    let task = h.heal_tasks().remove(0);
    let err = h.worker(Arc::new(SlowRepairer)).process(&task).await.unwrap_err();
    assert!(matches!(err, HealError::RepairTimeout(50)));

    assert_eq!(h.read_spec("a.spec.ts"), original);
    let stored = h.store.get_attempt(&task.attempt_id).await.unwrap().unwrap();
    assert_eq!(stored.status, HealingStatus::Failed);
    assert!(stored.diff.is_none());
}

#[tokio::test]
async fn test_repair_service_error_fails_attempt() {
    let h = Harness::new();
    h.write_spec("a.spec.ts", "test('a', async () => {});\n");
    let run = h.run().await;
    h.failure(&run, "a.spec.ts", "a", "expect(received).toBe(expected)").await;

    let mut repairer = MockRepairer::new();
    repairer
        .expect_repair()
        .returning(|_| Err(HealError::RepairService("LLM did not return updatedSpec content".into())));

    h.scheduler().schedule_run(&run.id).await.unwrap();
    let task = h.heal_tasks().remove(0);
    assert!(h.worker(Arc::new(repairer)).process(&task).await.is_err());

    let stored = h.store.get_attempt(&task.attempt_id).await.unwrap().unwrap();
    assert_eq!(stored.status, HealingStatus::Failed);
    assert!(stored.error.unwrap().contains("updatedSpec"));
}

#[tokio::test]
async fn test_multi_failure_rerun_waits_for_all_attempts() {
    let h = Harness::new();
    h.write_spec("a.spec.ts", "await page.goto(url);\n");
    h.write_spec("b.spec.ts", "await page.goto(other);\n");
    let run = h.run().await;
    h.failure(&run, "a.spec.ts", "a", "page.goto: Timeout 5000ms exceeded").await;
    h.failure(&run, "b.spec.ts", "b", "page.goto: Timeout 5000ms exceeded").await;

    h.scheduler().schedule_run(&run.id).await.unwrap();
    let tasks = h.heal_tasks();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.total_failed == 2));

    let worker = h.worker(unused_repairer());
    let first = worker.process(&tasks[0]).await.unwrap().unwrap();
    assert!(first.rerun.is_none());
    assert!(h.run_tasks().is_empty());

    let second = worker.process(&tasks[1]).await.unwrap().unwrap();
    let rerun = second.rerun.expect("last attempt triggers the suite rerun");
    let run_tasks = h.run_tasks();
    assert_eq!(run_tasks.len(), 1);
    assert_eq!(run_tasks[0].run_id, rerun.id);
    assert!(run_tasks[0].payload.file.is_none());
    assert!(run_tasks[0].payload.grep.is_none());
}

#[tokio::test]
async fn test_heal_only_records_rerun_without_executing() {
    let mut h = Harness::new();
    h.config = HealConfig::default().heal_only(true);
    h.write_spec("a.spec.ts", "await page.goto(url);\n");
    let run = h.run().await;
    h.failure(&run, "a.spec.ts", "a", "page.goto: Timeout 5000ms exceeded").await;

    h.scheduler().schedule_run(&run.id).await.unwrap();
    let task = h.heal_tasks().remove(0);
    let outcome = h.worker(unused_repairer()).process(&task).await.unwrap().unwrap();

    let rerun = outcome.rerun.unwrap();
    assert!(h.store.get_run(&rerun.id).await.unwrap().is_some());
    assert!(h.run_tasks().is_empty());
}

#[tokio::test]
async fn test_redelivered_succeeded_task_returns_same_rerun() {
    let h = Harness::new();
    h.write_spec("a.spec.ts", "await page.goto(url);\n");
    let run = h.run().await;
    h.failure(&run, "a.spec.ts", "a", "page.goto: Timeout 5000ms exceeded").await;

    h.scheduler().schedule_run(&run.id).await.unwrap();
    let task = h.heal_tasks().remove(0);
    let worker = h.worker(unused_repairer());
    let first = worker.process(&task).await.unwrap().unwrap();
    let again = worker.process(&task).await.unwrap().unwrap();

    assert_eq!(again.strategy, "nav-timeout");
    assert_eq!(again.tag, FailureTag::NavTimeout);
    assert_eq!(again.rerun.unwrap().id, first.rerun.unwrap().id);
    assert_eq!(h.run_tasks().len(), 1);
    assert_eq!(h.store.run_count(), 2);
    assert_eq!(h.read_spec("a.spec.ts").matches("timeout: 20000").count(), 1);
}

#[tokio::test]
async fn test_redelivered_failed_task_is_ignored() {
    let h = Harness::new();
    let run = h.run().await;
    h.failure(&run, "missing.spec.ts", "gone", "page.goto: Timeout 5000ms exceeded").await;

    h.scheduler().schedule_run(&run.id).await.unwrap();
    let queued = h.queue.pending_tasks(HEAL_QUEUE).remove(0);
    let task: HealTask = queued.decode().unwrap();
    let worker = h.worker(unused_repairer());

    // The failure is recorded, so the queue is told not to retry.
    worker.handle(&queued).await.unwrap();
    let stored = h.store.get_attempt(&task.attempt_id).await.unwrap().unwrap();
    assert_eq!(stored.status, HealingStatus::Failed);
    assert!(worker.process(&task).await.unwrap().is_none());
}

#[tokio::test]
async fn test_lost_rerun_is_triggered_on_redelivery() {
    let h = Harness::new();
    h.write_spec("a.spec.ts", "await page.goto(url);\n");
    let run = h.run().await;
    h.failure(&run, "a.spec.ts", "a", "page.goto: Timeout 5000ms exceeded").await;

    h.scheduler().schedule_run(&run.id).await.unwrap();
    let queued = h.queue.pending_tasks(HEAL_QUEUE).remove(0);
    let task: HealTask = queued.decode().unwrap();

    let closed = MemoryQueue::new();
    closed.close();
    let broken = HealWorker::new(
        h.store.clone(),
        Arc::new(closed),
        unused_repairer(),
        h.config.clone(),
        h.paths.clone(),
    );
    assert!(broken.handle(&queued).await.is_err());

    let attempt = h.store.get_attempt(&task.attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.status, HealingStatus::Succeeded);
    let lost = h.store.runs().into_iter().find(|r| r.is_self_heal()).unwrap();
    assert_eq!(lost.status, RunStatus::Failed);
    assert!(lost.error.as_deref().unwrap().contains("enqueue failed"));
    assert!(h.run_tasks().is_empty());

    let outcome = h.worker(unused_repairer()).process(&task).await.unwrap().unwrap();
    let rerun = outcome.rerun.expect("redelivery triggers the lost rerun");
    assert_ne!(rerun.id, lost.id);
    assert_eq!(rerun.status, RunStatus::Running);
    let run_tasks = h.run_tasks();
    assert_eq!(run_tasks.len(), 1);
    assert_eq!(run_tasks[0].run_id, rerun.id);
    assert_eq!(h.read_spec("a.spec.ts").matches("timeout: 20000").count(), 1);
}

#[tokio::test]
async fn test_siblings_share_one_suite_rerun() {
    let h = Harness::new();
    h.write_spec("a.spec.ts", "await page.goto(url);\n");
    h.write_spec("b.spec.ts", "await page.goto(other);\n");
    let run = h.run().await;
    h.failure(&run, "a.spec.ts", "a", "page.goto: Timeout 5000ms exceeded").await;
    h.failure(&run, "b.spec.ts", "b", "page.goto: Timeout 5000ms exceeded").await;

    h.scheduler().schedule_run(&run.id).await.unwrap();
    let tasks = h.heal_tasks();
    let worker = h.worker(unused_repairer());
    assert!(worker.process(&tasks[0]).await.unwrap().unwrap().rerun.is_none());
    let last = worker.process(&tasks[1]).await.unwrap().unwrap().rerun.unwrap();

    // The first sibling now also sees a settled ledger.
    let sibling = worker.process(&tasks[0]).await.unwrap().unwrap().rerun.unwrap();
    assert_eq!(sibling.id, last.id);
    assert_eq!(h.run_tasks().len(), 1);
    assert_eq!(h.store.runs().iter().filter(|r| r.is_self_heal()).count(), 1);
}

#[tokio::test]
async fn test_queued_attempt_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("testmend.db");
    let paths = PathsConfig::rooted(dir.path());
    let config = HealConfig::default().heal_only(true);
    let spec = dir.path().join("testmend-generated/web/a.spec.ts");
    std::fs::create_dir_all(spec.parent().unwrap()).unwrap();
    std::fs::write(&spec, "await page.goto(url);\n").unwrap();

    let run_id = {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db).unwrap());
        let mut run = TestRun::new("web", TriggerKind::User);
        run.status = RunStatus::Failed;
        store.create_run(&run).await.unwrap();
        let case = store
            .upsert_test_case("web", "testmend-generated/web/a.spec.ts#a", "a")
            .await
            .unwrap();
        let result = TestResult::new(&run.id, &case.id, ResultStatus::Failed)
            .with_message("page.goto: Timeout 5000ms exceeded");
        store.create_result(&result).await.unwrap();

        let lost_queue = MemoryQueue::new();
        HealScheduler::new(store, Arc::new(lost_queue.clone()), config.clone())
            .schedule_run(&run.id)
            .await
            .unwrap();
        assert_eq!(lost_queue.pending_tasks(HEAL_QUEUE).len(), 1);
        run.id
    };

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db).unwrap());
    let queue = MemoryQueue::new();
    let report = Recovery::new(store.clone(), Arc::new(queue.clone()), &config)
        .sweep()
        .await
        .unwrap();
    assert_eq!(report.requeued_attempts, 1);

    let worker = HealWorker::new(
        store.clone(),
        Arc::new(queue.clone()),
        unused_repairer(),
        config.clone(),
        paths,
    );
    let consumer = queue.consume(HEAL_QUEUE, Arc::new(worker), 1);
    queue.drain(Duration::from_secs(5)).await.unwrap();
    consumer.join().await;

    let open = AttemptFilter::for_run(&run_id).open();
    assert_eq!(store.count_attempts(&open).await.unwrap(), 0);
    let attempts = store.list_attempts(&AttemptFilter::for_run(&run_id)).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, HealingStatus::Succeeded);
    assert!(std::fs::read_to_string(&spec).unwrap().contains("timeout: 20000"));

    let rescheduled = HealScheduler::new(store, Arc::new(MemoryQueue::new()), config)
        .schedule_run(&run_id)
        .await
        .unwrap();
    assert_eq!(rescheduled.scheduled.len(), 1);
    assert_eq!(rescheduled.scheduled[0].attempt, 2);
}

#[tokio::test]
async fn test_failing_run_is_healed_and_rerun_end_to_end() {
    let h = Harness::new();
    h.write_spec(
        "home.spec.ts",
        "test('opens home', async ({ page }) => {\n  await page.goto(url);\n});\n",
    );

    let report = |status: &str, result: &str, error: Option<&str>| {
        json!({
            "suites": [{
                "title": "home.spec.ts",
                "file": "testmend-generated/web/home.spec.ts",
                "specs": [{
                    "title": "opens home",
                    "file": "testmend-generated/web/home.spec.ts",
                    "tests": [{
                        "status": status,
                        "results": [{ "status": result, "error": error.map(|m| json!({ "message": m })) }]
                    }]
                }]
            }]
        })
    };
    let executor = MockExecutor::new()
        .add_outcome(MockOutcome::failed(report(
            "unexpected",
            "failed",
            Some("page.goto: Timeout 5000ms exceeded"),
        )))
        .add_outcome(MockOutcome::passed(report("expected", "passed", None)));

    let scheduler = Arc::new(h.scheduler());
    let run_worker = Arc::new(
        RunWorker::new(h.store.clone(), Arc::new(executor.clone()), &h.paths).with_hook(scheduler),
    );
    let heal_worker = Arc::new(h.worker(unused_repairer()));
    let runs = h.queue.consume(RUN_QUEUE, run_worker, 1);
    let heals = h.queue.consume(HEAL_QUEUE, heal_worker, 1);

    let run = h.run().await;
    enqueue_run(&h.queue, &run.id, RunPayload::new("web")).await.unwrap();
    h.queue.drain(Duration::from_secs(10)).await.unwrap();
    runs.join().await;
    heals.join().await;

    let original = h.store.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(original.status, RunStatus::Failed);

    let runs = h.store.runs();
    assert_eq!(runs.len(), 2);
    let rerun = runs.iter().find(|r| r.is_self_heal()).unwrap();
    assert_eq!(rerun.rerun_of_id.as_deref(), Some(run.id.as_str()));
    assert_eq!(rerun.status, RunStatus::Succeeded);

    let attempts = h.store.list_attempts(&AttemptFilter::for_run(&run.id)).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, HealingStatus::Succeeded);
    assert!(h.read_spec("home.spec.ts").contains("timeout: 20000"));

    let requests = executor.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].files, vec!["testmend-generated/web/home.spec.ts"]);
    assert_eq!(
        requests[1].grep.as_deref(),
        Some("(?:^|\\s)opens home(?:$|\\s)")
    );
}

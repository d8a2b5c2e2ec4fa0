//! # mend_runner
//!
//! Test execution for testmend.
//!
//! A [`RunWorker`] consumes run tasks, invokes a [`TestExecutor`] (the
//! Playwright CLI in production, [`MockExecutor`] in tests), parses the JSON
//! report into one stored result per test case and finalizes the run. Failed
//! runs are handed to an optional [`RunCompletionHook`], which is where the
//! self-healing scheduler plugs in.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mend_core::{PathsConfig, RunPayload, RunTask, TestRun, TriggerKind};
//! use mend_runner::{PlaywrightExecutor, RunWorker};
//! use mend_store::{MemoryStore, Store};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let worker = RunWorker::new(
//!         store.clone(),
//!         Arc::new(PlaywrightExecutor::new()),
//!         &PathsConfig::rooted("."),
//!     );
//!
//!     let run = TestRun::new("web", TriggerKind::User);
//!     store.create_run(&run).await?;
//!     let finished = worker
//!         .process(&RunTask { run_id: run.id.clone(), payload: RunPayload::new("web") })
//!         .await?;
//!     println!("{} -> {}", finished.id, finished.status);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod executor;
pub mod grep;
pub mod hook;
pub mod mock;
pub mod playwright;
pub mod report;
pub mod worker;

pub use error::{RunnerError, RunnerResult};
pub use executor::{ExecutionOutcome, ExecutionRequest, TestExecutor};
pub use grep::{build_loose_grep, is_regex_like, resolve_grep};
pub use hook::RunCompletionHook;
pub use mock::{MockExecutor, MockOutcome};
pub use playwright::PlaywrightExecutor;
pub use report::{
    extract_call_log, filter_runner_error, parse_report, strip_ansi, CaseStatus, ParsedCase,
};
pub use worker::{enqueue_run, RunSummary, RunWorker, RUN_TASK_ATTEMPTS, RUN_TASK_BACKOFF_MS};

//! Callback invoked when a run finishes with failures.

use async_trait::async_trait;
use mend_core::TestRun;

/// Receives failed runs from the run worker.
///
/// The self-healing scheduler implements this so the runner does not depend
/// on the healing crate.
#[async_trait]
pub trait RunCompletionHook: Send + Sync {
    async fn on_run_failed(&self, run: &TestRun, failed: usize) -> anyhow::Result<()>;
}

//! Run command - execute one run in the foreground.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use mend_core::{RunParams, RunPayload, RunStatus, TestRun, TriggerKind};
use mend_runner::{enqueue_run, RunSummary};
use mend_store::AttemptFilter;
use tracing::info;

use super::GlobalArgs;
use crate::services::Services;

#[derive(Args)]
pub struct RunArgs {
    /// Project the run belongs to
    #[arg(short, long)]
    pub project: String,

    /// Only run this spec file
    #[arg(short, long)]
    pub file: Option<String>,

    /// Only run tests whose title matches
    #[arg(short, long)]
    pub grep: Option<String>,

    /// Base URL passed to the tests
    #[arg(long)]
    pub base_url: Option<String>,

    /// Run browsers headed
    #[arg(long)]
    pub headed: bool,

    /// Record the run as CI-triggered
    #[arg(long)]
    pub ci: bool,

    /// Seconds to wait for the run, its healing and reruns
    #[arg(long, default_value = "1800")]
    pub timeout: u64,
}

pub async fn execute(global: &GlobalArgs, args: RunArgs) -> Result<()> {
    let services = Services::open(global)?;

    let mut params = RunParams::new().headed(args.headed);
    if let Some(file) = &args.file {
        params = params.file(file.clone());
    }
    if let Some(grep) = &args.grep {
        params = params.grep(grep.clone());
    }
    if let Some(base_url) = &args.base_url {
        params = params.base_url(base_url.clone());
    }

    let trigger = if args.ci { TriggerKind::Ci } else { TriggerKind::User };
    let run = TestRun::new(&args.project, trigger).with_params(params);
    services.store.create_run(&run).await?;
    enqueue_run(&services.queue, &run.id, RunPayload::new(&args.project)).await?;
    info!("Queued run {} for project {}", run.id, args.project);

    services
        .process_until_idle(Duration::from_secs(args.timeout))
        .await?;

    let run = services
        .store
        .get_run(&run.id)
        .await?
        .with_context(|| format!("Run {} disappeared", run.id))?;
    print_run(&run);

    let attempts = services
        .store
        .list_attempts(&AttemptFilter::for_run(&run.id))
        .await?;
    if !attempts.is_empty() {
        println!("Healing attempts:");
        for attempt in &attempts {
            println!(
                "  {} #{} {} {}",
                attempt.id,
                attempt.attempt,
                attempt.status,
                attempt.summary.as_deref().or(attempt.error.as_deref()).unwrap_or("")
            );
        }
    }

    if run.status != RunStatus::Succeeded {
        anyhow::bail!("Run {} finished {}", run.id, run.status);
    }
    Ok(())
}

fn print_run(run: &TestRun) {
    println!("Run {}: {}", run.id, run.status);
    let summary = run
        .summary
        .as_deref()
        .and_then(|s| serde_json::from_str::<RunSummary>(s).ok());
    if let Some(summary) = summary {
        println!(
            "  {} passed, {} failed, {} skipped",
            summary.passed, summary.failed, summary.skipped
        );
    }
    if let Some(error) = &run.error {
        println!("  {}", error);
    }
}

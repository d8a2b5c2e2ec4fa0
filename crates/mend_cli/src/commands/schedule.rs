//! Schedule command - heal a finished run.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::GlobalArgs;
use crate::services::Services;

#[derive(Args)]
pub struct ScheduleArgs {
    /// Run to schedule healing for
    run_id: String,

    /// Only record attempts; the next `mend serve` picks them up
    #[arg(long)]
    no_process: bool,

    /// Seconds to wait for healing and reruns
    #[arg(long, default_value = "1800")]
    timeout: u64,
}

pub async fn execute(global: &GlobalArgs, args: ScheduleArgs) -> Result<()> {
    let services = Services::open(global)?;
    let report = services.scheduler().schedule_run(&args.run_id).await?;

    if let Some(reason) = report.skipped {
        println!("Run {} not scheduled: {}", args.run_id, reason);
        return Ok(());
    }

    println!(
        "Scheduled {} attempt(s) for run {} ({} in flight, {} capped{})",
        report.scheduled.len(),
        args.run_id,
        report.in_flight,
        report.capped,
        if report.run_cap_reached { ", run cap reached" } else { "" }
    );
    for attempt in &report.scheduled {
        println!("  {} #{} result {}", attempt.id, attempt.attempt, attempt.test_result_id);
    }

    if args.no_process || report.scheduled.is_empty() {
        return Ok(());
    }

    info!("Processing healing for run {}", args.run_id);
    services
        .process_until_idle(Duration::from_secs(args.timeout))
        .await
}

//! Serve command - run the workers until interrupted.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use super::GlobalArgs;
use crate::services::Services;

#[derive(Args)]
pub struct ServeArgs {
    /// Concurrent test runs
    #[arg(long, default_value = "1")]
    run_concurrency: usize,

    /// Seconds to wait for in-flight work on shutdown
    #[arg(long, default_value = "60")]
    drain_timeout: u64,
}

pub async fn execute(global: &GlobalArgs, args: ServeArgs) -> Result<()> {
    let services = Services::open(global)?;
    info!(
        "Serving with healing {} (per spec {}, per run {}, {} worker(s){})",
        if services.config.heal.enabled { "enabled" } else { "disabled" },
        services.config.heal.max_attempts_per_spec,
        services.config.heal.max_attempts_per_run,
        services.config.heal.worker_concurrency,
        if services.config.heal.heal_only { ", heal-only" } else { "" }
    );

    services.recover().await?;
    let consumers = services.start_workers(args.run_concurrency);

    tokio::signal::ctrl_c()
        .await
        .with_context(|| "Failed to listen for Ctrl-C")?;
    info!("Shutting down, draining queues");

    let drained = services
        .queue
        .drain(Duration::from_secs(args.drain_timeout))
        .await;
    for consumer in consumers {
        consumer.join().await;
    }
    drained.with_context(|| "In-flight work did not finish before shutdown")?;

    info!("Stopped");
    Ok(())
}

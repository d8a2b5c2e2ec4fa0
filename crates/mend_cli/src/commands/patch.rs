//! Patch command - apply deterministic fixes without the queues.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use mend_heal::{
    classify_failure, context::relative_to, strategies_for, unified_diff, PatchOutcome,
};
use tracing::info;

use super::GlobalArgs;
use crate::services::load_config;

#[derive(Args)]
pub struct PatchArgs {
    /// Spec file to repair
    spec: PathBuf,

    /// Failure message the spec produced
    #[arg(short, long)]
    message: String,

    /// Write the patched spec back to disk
    #[arg(long)]
    write: bool,
}

pub async fn execute(global: &GlobalArgs, args: PatchArgs) -> Result<()> {
    let config = load_config(global)?;
    let before = tokio::fs::read_to_string(&args.spec)
        .await
        .with_context(|| format!("Failed to read {}", args.spec.display()))?;

    let tag = classify_failure(&args.message);
    let patched = strategies_for(tag).into_iter().find_map(|strategy| {
        match strategy.apply(&before, &args.message) {
            PatchOutcome::Patched { text, summary } => Some((strategy, text, summary)),
            PatchOutcome::NoMatch => None,
        }
    });

    let Some((strategy, after, summary)) = patched else {
        println!("No deterministic fix applies ({}); the repair model would handle it", tag);
        return Ok(());
    };

    let display = relative_to(&args.spec, &config.paths.repo_root);
    println!("{} ({}): {}", strategy, tag, summary);
    print!("{}", unified_diff(&display, &before, &after));

    if args.write {
        tokio::fs::write(&args.spec, &after)
            .await
            .with_context(|| format!("Failed to write {}", args.spec.display()))?;
        info!("Wrote {}", args.spec.display());
    }
    Ok(())
}

//! Ledger command - list healing attempts of a run.

use anyhow::Result;
use clap::Args;
use mend_heal::Ledger;

use super::GlobalArgs;
use crate::services::Services;

#[derive(Args)]
pub struct LedgerArgs {
    /// Run whose attempts to list
    run_id: String,

    /// Print attempts as JSON
    #[arg(long)]
    json: bool,

    /// Include diffs
    #[arg(long)]
    diff: bool,
}

pub async fn execute(global: &GlobalArgs, args: LedgerArgs) -> Result<()> {
    let services = Services::open(global)?;
    let attempts = Ledger::new(services.store.clone())
        .for_run(&args.run_id)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&attempts)?);
        return Ok(());
    }

    if attempts.is_empty() {
        println!("No healing attempts for run {}", args.run_id);
        return Ok(());
    }

    for attempt in &attempts {
        println!(
            "{}  #{}  {:<9}  result {}  {}",
            attempt.created_at.format("%Y-%m-%d %H:%M:%S"),
            attempt.attempt,
            attempt.status.as_str(),
            attempt.test_result_id,
            attempt.id
        );
        if let Some(summary) = &attempt.summary {
            println!("    {}", summary);
        }
        if let Some(error) = &attempt.error {
            println!("    error: {}", error);
        }
        if args.diff {
            if let Some(diff) = &attempt.diff {
                for line in diff.lines() {
                    println!("    {}", line);
                }
            }
        }
    }
    Ok(())
}

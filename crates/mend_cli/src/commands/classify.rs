//! Classify command.

use anyhow::Result;
use clap::Args;
use mend_heal::{classify_failure, strategies_for, AI_STRATEGY};

#[derive(Args)]
pub struct ClassifyArgs {
    /// Failure message as reported by the test runner
    message: String,
}

pub fn execute(args: ClassifyArgs) -> Result<()> {
    let tag = classify_failure(&args.message);
    let strategies: Vec<_> = strategies_for(tag).iter().map(|s| s.name()).collect();

    println!("{}", tag);
    println!("strategies: {}, then {}", strategies.join(", "), AI_STRATEGY);
    Ok(())
}

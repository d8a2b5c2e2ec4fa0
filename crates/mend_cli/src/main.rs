//! testmend CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Spec file not found
//! - 4: Store error

use std::process::ExitCode;

use clap::Parser;
use mend_core::CoreError;
use mend_heal::HealError;
use mend_store::StoreError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod services;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const SPEC_NOT_FOUND: u8 = 3;
    pub const STORE_ERROR: u8 = 4;
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "mend=debug,info" } else { "mend=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let fmt_layer = if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    // Ignore a second initialisation
    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.global.verbose, cli.global.json_logs);

    let global = cli.global;
    let result = match cli.command {
        Commands::Serve(args) => commands::serve::execute(&global, args).await,
        Commands::Run(args) => commands::run::execute(&global, args).await,
        Commands::Schedule(args) => commands::schedule::execute(&global, args).await,
        Commands::Classify(args) => commands::classify::execute(args),
        Commands::Patch(args) => commands::patch::execute(&global, args).await,
        Commands::Ledger(args) => commands::ledger::execute(&global, args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(categorize_error(&e))
        }
    }
}

/// Map an error to its exit code by walking the cause chain.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(HealError::SpecNotFound { .. }) = cause.downcast_ref::<HealError>() {
            return ExitCodes::SPEC_NOT_FOUND;
        }
        if cause.downcast_ref::<StoreError>().is_some() {
            return ExitCodes::STORE_ERROR;
        }
        if let Some(CoreError::InvalidConfig(_)) = cause.downcast_ref::<CoreError>() {
            return ExitCodes::INVALID_ARGS;
        }
    }
    ExitCodes::GENERAL_ERROR
}

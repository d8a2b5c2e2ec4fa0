//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub mod classify;
pub mod ledger;
pub mod patch;
pub mod run;
pub mod schedule;
pub mod serve;

/// testmend - self-healing test runs
#[derive(Parser)]
#[command(name = "mend")]
#[command(version, about = "testmend - run end-to-end tests and repair the ones that break")]
#[command(long_about = r#"
testmend executes Playwright specs, records their results, and repairs
failing specs automatically: known failure shapes are patched
deterministically, the rest are sent to a repair model. Every repair is
re-validated by a self-heal rerun.

COMMANDS:
  serve      → Run the execution and healing workers until Ctrl-C
  run        → Execute one run (healing included) and exit
  schedule   → Schedule healing for a finished run
  classify   → Print the failure tag of a message
  patch      → Apply deterministic fixes to a spec offline
  ledger     → Show the healing attempts of a run

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Spec file not found
  4 - Store error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// TOML configuration file with [heal] and [paths] tables
    #[arg(short, long, global = true, env = "MEND_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database (defaults to testmend.db in the repository root)
    #[arg(long, global = true, env = "MEND_DB")]
    pub db: Option<PathBuf>,

    /// Repository the specs live in
    #[arg(long, global = true, env = "MEND_REPO_ROOT")]
    pub repo_root: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the execution and healing workers
    Serve(serve::ServeArgs),

    /// Execute a run and process healing until idle
    Run(run::RunArgs),

    /// Schedule healing for the failures of a finished run
    Schedule(schedule::ScheduleArgs),

    /// Classify a failure message
    Classify(classify::ClassifyArgs),

    /// Apply deterministic fixes to a spec file
    Patch(patch::PatchArgs),

    /// Show the healing attempts of a run
    Ledger(ledger::LedgerArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_global_flags() {
        let cli = Cli::try_parse_from([
            "mend",
            "run",
            "--project",
            "web",
            "--grep",
            "opens pricing",
            "--headed",
            "--db",
            "/tmp/mend.db",
        ])
        .unwrap();

        assert_eq!(cli.global.db, Some(PathBuf::from("/tmp/mend.db")));
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.project, "web");
        assert_eq!(args.grep.as_deref(), Some("opens pricing"));
        assert!(args.headed);
    }

    #[test]
    fn test_patch_requires_message() {
        assert!(Cli::try_parse_from(["mend", "patch", "a.spec.ts"]).is_err());
        assert!(Cli::try_parse_from(["mend", "patch", "a.spec.ts", "--message", "Timeout"]).is_ok());
    }
}

//! # mend_heal
//!
//! Self-healing of failing specs.
//!
//! When a run finishes with failures, the [`HealScheduler`] (plugged into
//! the run worker as its [`mend_runner::RunCompletionHook`]) claims one
//! healing attempt per eligible failed result and enqueues a [`HealTask`].
//! The [`HealWorker`] then:
//!
//! 1. collects the failure context and locates the spec file on disk
//! 2. classifies the failure message into a [`FailureTag`]
//! 3. tries the deterministic [`Strategy`]s, falling back to the
//!    [`RepairService`] under a timeout
//! 4. writes the patched spec, records the diff in the [`Ledger`]
//! 5. triggers a self-heal rerun through the [`RerunTrigger`]
//!
//! Attempts are bounded per test result and per run; those caps and the
//! one-open-attempt-per-result rule are enforced by the store's atomic claim.
//! Each repair causes at most one rerun, keyed in the store, so a redelivered
//! task can re-trigger a lost rerun without duplicating it. The queue lives in
//! process memory; [`Recovery`] restores stored work after a restart.
//!
//! [`HealTask`]: mend_core::HealTask

pub mod classify;
pub mod context;
pub mod diff;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod recovery;
pub mod repair;
pub mod rerun;
pub mod scheduler;
pub mod strategies;
pub mod worker;

pub use classify::{classify_failure, FailureTag};
pub use context::{
    collect_failure_context, key_spec_path, resolve_spec_path, spec_path_candidates,
    FailureContext,
};
pub use diff::unified_diff;
pub use error::{HealError, HealResult};
pub use ledger::{AttemptSuccess, Ledger};
pub use llm::{LlmProvider, LlmRepairService};
pub use recovery::{Recovery, RecoveryReport};
pub use repair::{repair_with_timeout, RepairRequest, RepairResponse, RepairService};
pub use rerun::{payload_for, RerunScope, RerunTrigger};
pub use scheduler::{HealScheduler, ScheduleReport, HEAL_TASK_ATTEMPTS};
pub use strategies::{PatchOutcome, Strategy};
pub use worker::{strategies_for, HealOutcome, HealWorker, AI_STRATEGY};

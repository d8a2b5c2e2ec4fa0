//! # mend_core
//!
//! Shared vocabulary for testmend.
//!
//! This crate holds the persistent data model (runs, results, test cases and
//! healing attempts), the payloads carried by the work queues, the tagged
//! step variants shared between runs, and the layered configuration used by
//! every worker process.
//!
//! # Example
//!
//! ```rust
//! use mend_core::{HealingStatus, MendConfig, normalize_test_title};
//!
//! let config = MendConfig::default();
//! assert_eq!(config.heal.max_attempts_per_spec, 3);
//!
//! assert!(HealingStatus::Queued.is_open());
//! assert_eq!(
//!     normalize_test_title(Some("checkout › pays with card")).as_deref(),
//!     Some("pays with card"),
//! );
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod steps;
pub mod tasks;
pub mod title;

pub use config::{HealConfig, MendConfig, PathsConfig};
pub use error::{CoreError, CoreResult};
pub use models::{
    new_id, HealingAttempt, HealingStatus, ResultStatus, RunParams, RunStatus, TestCase,
    TestResult, TestRun, TriggerKind,
};
pub use steps::{parse_steps, TestStep};
pub use tasks::{HealTask, RunPayload, RunTask, HEAL_QUEUE, RUN_QUEUE};
pub use title::normalize_test_title;

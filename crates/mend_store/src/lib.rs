//! # mend_store
//!
//! Durable storage for testmend.
//!
//! The [`Store`] trait covers runs, test cases (upserted by project and key),
//! immutable test results and the healing-attempt ledger. Opening a new
//! healing attempt goes through [`Store::claim_attempt`], which checks the
//! per-result mutual exclusion and both attempt caps in the same transaction
//! that inserts the row. Self-heal reruns go through [`Store::create_rerun`],
//! which admits one run per `rerun_key`.
//!
//! Two backends are provided:
//!
//! - [`SqliteStore`]: a SQLite database (WAL mode), with a partial unique
//!   index that also enforces "one open attempt per result" at the schema level
//! - [`MemoryStore`]: process memory, for tests and single-shot runs

pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{AttemptFilter, ClaimLimits, ClaimOutcome, Store};

//! SQLite schema.

use rusqlite::Connection;
use tracing::debug;

use crate::error::StoreResult;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS test_runs (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    status TEXT NOT NULL,
    trigger_kind TEXT NOT NULL,
    rerun_of_id TEXT REFERENCES test_runs(id),
    params TEXT NOT NULL DEFAULT '{}',
    summary TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    rerun_key TEXT
);
CREATE INDEX IF NOT EXISTS idx_test_runs_project ON test_runs(project_id);
CREATE INDEX IF NOT EXISTS idx_test_runs_rerun_of ON test_runs(rerun_of_id);

CREATE TABLE IF NOT EXISTS test_cases (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    key TEXT NOT NULL,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (project_id, key)
);

CREATE TABLE IF NOT EXISTS test_results (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    run_id TEXT NOT NULL REFERENCES test_runs(id),
    test_case_id TEXT NOT NULL REFERENCES test_cases(id),
    status TEXT NOT NULL,
    duration_ms INTEGER,
    message TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_test_results_run ON test_results(run_id);

CREATE TABLE IF NOT EXISTS healing_attempts (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    run_id TEXT NOT NULL,
    test_result_id TEXT NOT NULL,
    test_case_id TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    status TEXT NOT NULL,
    summary TEXT,
    diff TEXT,
    prompt TEXT,
    response TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (test_result_id, attempt)
);
CREATE INDEX IF NOT EXISTS idx_healing_attempts_run ON healing_attempts(run_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_healing_attempts_open
    ON healing_attempts(test_result_id)
    WHERE status IN ('queued', 'running');
"#;

/// At most one run per repair that caused it.
const RERUN_KEY_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS idx_test_runs_rerun_key
    ON test_runs(rerun_key) WHERE rerun_key IS NOT NULL";

/// Create tables and indexes if they do not exist yet.
pub fn migrate(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(SCHEMA)?;
    if !has_column(conn, "test_runs", "rerun_key")? {
        conn.execute("ALTER TABLE test_runs ADD COLUMN rerun_key TEXT", [])?;
        debug!("Added test_runs.rerun_key");
    }
    conn.execute(RERUN_KEY_INDEX, [])?;
    debug!("Store schema initialized");
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

//! SQLite-backed store.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mend_core::{HealingAttempt, RunParams, TestCase, TestResult, TestRun};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::schema;
use crate::store::{AttemptFilter, ClaimLimits, ClaimOutcome, Store};

const RUN_COLUMNS: &str = "id, project_id, status, trigger_kind, rerun_of_id, params, summary, error, created_at, started_at, finished_at, rerun_key";
const CASE_COLUMNS: &str = "id, project_id, key, title, created_at";
const RESULT_COLUMNS: &str = "id, run_id, test_case_id, status, duration_ms, message, created_at";
const ATTEMPT_COLUMNS: &str = "id, run_id, test_result_id, test_case_id, attempt, status, summary, diff, prompt, response, error, created_at, updated_at";

/// Store persisted in a SQLite database file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::migrate(&conn)?;
        info!("Opened store at {:?}", path.as_ref());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn parse_ts(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", value, e)))
}

fn parse_opt_ts(value: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

fn parse_opt_json(value: Option<String>) -> StoreResult<Option<serde_json::Value>> {
    Ok(value.as_deref().map(serde_json::from_str).transpose()?)
}

fn opt_json(value: &Option<serde_json::Value>) -> StoreResult<Option<String>> {
    Ok(value.as_ref().map(serde_json::to_string).transpose()?)
}

struct RawRun {
    id: String,
    project_id: String,
    status: String,
    trigger: String,
    rerun_of_id: Option<String>,
    params: String,
    summary: Option<String>,
    error: Option<String>,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    rerun_key: Option<String>,
}

impl RawRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            status: row.get(2)?,
            trigger: row.get(3)?,
            rerun_of_id: row.get(4)?,
            params: row.get(5)?,
            summary: row.get(6)?,
            error: row.get(7)?,
            created_at: row.get(8)?,
            started_at: row.get(9)?,
            finished_at: row.get(10)?,
            rerun_key: row.get(11)?,
        })
    }

    fn into_run(self) -> StoreResult<TestRun> {
        let params: serde_json::Value = serde_json::from_str(&self.params)?;
        Ok(TestRun {
            id: self.id,
            project_id: self.project_id,
            status: self.status.parse()?,
            trigger: self.trigger.parse()?,
            rerun_of_id: self.rerun_of_id,
            rerun_key: self.rerun_key,
            params: RunParams::from_json(&params)?,
            summary: self.summary,
            error: self.error,
            created_at: parse_ts(&self.created_at)?,
            started_at: parse_opt_ts(self.started_at)?,
            finished_at: parse_opt_ts(self.finished_at)?,
        })
    }
}

struct RawCase {
    id: String,
    project_id: String,
    key: String,
    title: String,
    created_at: String,
}

impl RawCase {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            key: row.get(2)?,
            title: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_case(self) -> StoreResult<TestCase> {
        Ok(TestCase {
            id: self.id,
            project_id: self.project_id,
            key: self.key,
            title: self.title,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct RawResult {
    id: String,
    run_id: String,
    test_case_id: String,
    status: String,
    duration_ms: Option<i64>,
    message: Option<String>,
    created_at: String,
}

impl RawResult {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            test_case_id: row.get(2)?,
            status: row.get(3)?,
            duration_ms: row.get(4)?,
            message: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_result(self) -> StoreResult<TestResult> {
        Ok(TestResult {
            id: self.id,
            run_id: self.run_id,
            test_case_id: self.test_case_id,
            status: self.status.parse()?,
            duration_ms: self.duration_ms.map(|ms| ms.max(0) as u64),
            message: self.message,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct RawAttempt {
    id: String,
    run_id: String,
    test_result_id: String,
    test_case_id: String,
    attempt: u32,
    status: String,
    summary: Option<String>,
    diff: Option<String>,
    prompt: Option<String>,
    response: Option<String>,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawAttempt {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            test_result_id: row.get(2)?,
            test_case_id: row.get(3)?,
            attempt: row.get(4)?,
            status: row.get(5)?,
            summary: row.get(6)?,
            diff: row.get(7)?,
            prompt: row.get(8)?,
            response: row.get(9)?,
            error: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_attempt(self) -> StoreResult<HealingAttempt> {
        Ok(HealingAttempt {
            id: self.id,
            run_id: self.run_id,
            test_result_id: self.test_result_id,
            test_case_id: self.test_case_id,
            attempt: self.attempt,
            status: self.status.parse()?,
            summary: self.summary,
            diff: self.diff,
            prompt: parse_opt_json(self.prompt)?,
            response: parse_opt_json(self.response)?,
            error: self.error,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

/// Build a WHERE clause and its bound values for an attempt filter.
fn attempt_where(filter: &AttemptFilter) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(run_id) = &filter.run_id {
        values.push(SqlValue::Text(run_id.clone()));
        clauses.push(format!("run_id = ?{}", values.len()));
    }
    if let Some(result_id) = &filter.test_result_id {
        values.push(SqlValue::Text(result_id.clone()));
        clauses.push(format!("test_result_id = ?{}", values.len()));
    }
    if !filter.status_in.is_empty() {
        let mut slots = Vec::new();
        for status in &filter.status_in {
            values.push(SqlValue::Text(status.as_str().to_string()));
            slots.push(format!("?{}", values.len()));
        }
        clauses.push(format!("status IN ({})", slots.join(", ")));
    }
    if let Some(status) = filter.status_not {
        values.push(SqlValue::Text(status.as_str().to_string()));
        clauses.push(format!("status <> ?{}", values.len()));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

fn insert_run(conn: &Connection, run: &TestRun) -> StoreResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO test_runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            RUN_COLUMNS
        ),
        params![
            run.id,
            run.project_id,
            run.status.as_str(),
            run.trigger.as_str(),
            run.rerun_of_id,
            serde_json::to_string(&run.params)?,
            run.summary,
            run.error,
            ts(&run.created_at),
            run.started_at.as_ref().map(ts),
            run.finished_at.as_ref().map(ts),
            run.rerun_key,
        ],
    )?;
    Ok(())
}

fn insert_attempt(conn: &Connection, attempt: &HealingAttempt) -> StoreResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO healing_attempts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            ATTEMPT_COLUMNS
        ),
        params![
            attempt.id,
            attempt.run_id,
            attempt.test_result_id,
            attempt.test_case_id,
            attempt.attempt,
            attempt.status.as_str(),
            attempt.summary,
            attempt.diff,
            opt_json(&attempt.prompt)?,
            opt_json(&attempt.response)?,
            attempt.error,
            ts(&attempt.created_at),
            ts(&attempt.updated_at),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_run(&self, run: &TestRun) -> StoreResult<()> {
        let conn = self.conn.lock();
        insert_run(&conn, run)?;
        debug!("Inserted run {}", run.id);
        Ok(())
    }

    async fn create_rerun(&self, run: &TestRun) -> StoreResult<Option<TestRun>> {
        let Some(key) = run.rerun_key.as_deref() else {
            self.create_run(run).await?;
            return Ok(None);
        };
        let existing = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let existing = tx
                .query_row(
                    &format!("SELECT {} FROM test_runs WHERE rerun_key = ?1", RUN_COLUMNS),
                    params![key],
                    RawRun::from_row,
                )
                .optional()?;
            if existing.is_none() {
                insert_run(&tx, run)?;
                tx.commit()?;
                debug!("Inserted rerun {} ({})", run.id, key);
            }
            existing
        };
        existing.map(RawRun::into_run).transpose()
    }

    async fn get_run(&self, id: &str) -> StoreResult<Option<TestRun>> {
        let raw = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!("SELECT {} FROM test_runs WHERE id = ?1", RUN_COLUMNS),
                params![id],
                RawRun::from_row,
            )
            .optional()?
        };
        raw.map(RawRun::into_run).transpose()
    }

    async fn update_run(&self, run: &TestRun) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE test_runs SET status = ?1, params = ?2, summary = ?3, error = ?4,
             started_at = ?5, finished_at = ?6, rerun_key = ?7 WHERE id = ?8",
            params![
                run.status.as_str(),
                serde_json::to_string(&run.params)?,
                run.summary,
                run.error,
                run.started_at.as_ref().map(ts),
                run.finished_at.as_ref().map(ts),
                run.rerun_key,
                run.id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("run", &run.id));
        }
        Ok(())
    }

    async fn list_unfinished_runs(&self) -> StoreResult<Vec<TestRun>> {
        let raws = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM test_runs WHERE status IN ('queued', 'running') ORDER BY created_at, rowid",
                RUN_COLUMNS
            ))?;
            let rows = stmt.query_map([], RawRun::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        raws.into_iter().map(RawRun::into_run).collect()
    }

    async fn upsert_test_case(
        &self,
        project_id: &str,
        key: &str,
        title: &str,
    ) -> StoreResult<TestCase> {
        let fresh = TestCase::new(project_id, key, title);
        let row = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO test_cases (id, project_id, key, title, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(project_id, key) DO UPDATE SET title = excluded.title",
                params![fresh.id, project_id, key, title, ts(&fresh.created_at)],
            )?;
            conn.query_row(
                &format!(
                    "SELECT {} FROM test_cases WHERE project_id = ?1 AND key = ?2",
                    CASE_COLUMNS
                ),
                params![project_id, key],
                RawCase::from_row,
            )?
        };
        row.into_case()
    }

    async fn get_test_case(&self, id: &str) -> StoreResult<Option<TestCase>> {
        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!("SELECT {} FROM test_cases WHERE id = ?1", CASE_COLUMNS),
                params![id],
                RawCase::from_row,
            )
            .optional()?
        };
        row.map(RawCase::into_case).transpose()
    }

    async fn create_result(&self, result: &TestResult) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO test_results ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                RESULT_COLUMNS
            ),
            params![
                result.id,
                result.run_id,
                result.test_case_id,
                result.status.as_str(),
                result.duration_ms.map(|ms| ms as i64),
                result.message,
                ts(&result.created_at),
            ],
        )?;
        Ok(())
    }

    async fn get_result(&self, id: &str) -> StoreResult<Option<TestResult>> {
        let raw = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!("SELECT {} FROM test_results WHERE id = ?1", RESULT_COLUMNS),
                params![id],
                RawResult::from_row,
            )
            .optional()?
        };
        raw.map(RawResult::into_result).transpose()
    }

    async fn list_results(&self, run_id: &str) -> StoreResult<Vec<TestResult>> {
        let raws = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM test_results WHERE run_id = ?1 ORDER BY seq",
                RESULT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![run_id], RawResult::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        raws.into_iter().map(RawResult::into_result).collect()
    }

    async fn create_attempt(&self, attempt: &HealingAttempt) -> StoreResult<()> {
        let conn = self.conn.lock();
        insert_attempt(&conn, attempt)
    }

    async fn get_attempt(&self, id: &str) -> StoreResult<Option<HealingAttempt>> {
        let raw = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!("SELECT {} FROM healing_attempts WHERE id = ?1", ATTEMPT_COLUMNS),
                params![id],
                RawAttempt::from_row,
            )
            .optional()?
        };
        raw.map(RawAttempt::into_attempt).transpose()
    }

    async fn update_attempt(&self, attempt: &HealingAttempt) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE healing_attempts SET status = ?1, summary = ?2, diff = ?3, prompt = ?4,
             response = ?5, error = ?6, updated_at = ?7 WHERE id = ?8",
            params![
                attempt.status.as_str(),
                attempt.summary,
                attempt.diff,
                opt_json(&attempt.prompt)?,
                opt_json(&attempt.response)?,
                attempt.error,
                ts(&Utc::now()),
                attempt.id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("healing attempt", &attempt.id));
        }
        Ok(())
    }

    async fn count_attempts(&self, filter: &AttemptFilter) -> StoreResult<u32> {
        let (clause, values) = attempt_where(filter);
        let conn = self.conn.lock();
        let count: u32 = conn.query_row(
            &format!("SELECT COUNT(*) FROM healing_attempts{}", clause),
            params_from_iter(values),
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn find_first_attempt(
        &self,
        filter: &AttemptFilter,
    ) -> StoreResult<Option<HealingAttempt>> {
        let (clause, values) = attempt_where(filter);
        let raw = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!(
                    "SELECT {} FROM healing_attempts{} ORDER BY seq LIMIT 1",
                    ATTEMPT_COLUMNS, clause
                ),
                params_from_iter(values),
                RawAttempt::from_row,
            )
            .optional()?
        };
        raw.map(RawAttempt::into_attempt).transpose()
    }

    async fn list_attempts(&self, filter: &AttemptFilter) -> StoreResult<Vec<HealingAttempt>> {
        let (clause, values) = attempt_where(filter);
        let raws = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM healing_attempts{} ORDER BY seq",
                ATTEMPT_COLUMNS, clause
            ))?;
            let rows = stmt.query_map(params_from_iter(values), RawAttempt::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        raws.into_iter().map(RawAttempt::into_attempt).collect()
    }

    async fn claim_attempt(
        &self,
        run_id: &str,
        test_result_id: &str,
        test_case_id: &str,
        limits: ClaimLimits,
    ) -> StoreResult<ClaimOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let total: u32 = tx.query_row(
            "SELECT COUNT(*) FROM healing_attempts WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        if total >= limits.per_run {
            return Ok(ClaimOutcome::RunCapReached { total });
        }

        let (prior, open): (u32, u32) = tx.query_row(
            "SELECT COUNT(*), COALESCE(SUM(status IN ('queued', 'running')), 0)
             FROM healing_attempts WHERE test_result_id = ?1",
            params![test_result_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if open > 0 {
            return Ok(ClaimOutcome::InFlight);
        }
        if prior >= limits.per_spec {
            return Ok(ClaimOutcome::CapReached { prior });
        }

        let attempt = HealingAttempt::queued(run_id, test_result_id, test_case_id, prior + 1);
        insert_attempt(&tx, &attempt)?;
        tx.commit()?;

        debug!(
            "Claimed attempt {} (#{}) for result {}",
            attempt.id, attempt.attempt, test_result_id
        );
        Ok(ClaimOutcome::Claimed(attempt))
    }
}

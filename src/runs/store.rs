//! Run record store -- Run, RunStep and Attachment persistence.
//!
//! Every write is its own statement on a pooled connection; nothing spans
//! a whole run. Status transitions are guarded in SQL so a terminal state
//! is never overwritten, whichever task gets there second.

use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::capture::StepSink;
use super::{Attachment, Run, RunStatus, RunStep, StreamKind, TargetType, Variables};
use crate::storage::{self, json_column, now_timestamp, parsed_column, Pool};

const RUN_COLUMNS: &str = "id, status, target_type, testcase_id, scenario_id, variables_json,
    created_at, started_at, finished_at, workdir, robot_output_path, robot_log_path, message";

/// Upper bound on how long a drop path waits for a pooled connection.
const BLOCKING_CONNECTION_TIMEOUT: Duration = Duration::from_secs(2);

const NON_TERMINAL: &str = "('PENDING', 'RUNNING')";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    Ok(Run {
        id: row.get(0)?,
        status: parsed_column(row, 1)?,
        target_type: parsed_column(row, 2)?,
        testcase_id: row.get(3)?,
        scenario_id: row.get(4)?,
        variables: json_column(row, 5)?,
        created_at: row.get(6)?,
        started_at: row.get(7)?,
        finished_at: row.get(8)?,
        workdir: row.get(9)?,
        robot_output_path: row.get(10)?,
        robot_log_path: row.get(11)?,
        message: row.get(12)?,
    })
}

fn step_from_row(row: &Row<'_>) -> rusqlite::Result<RunStep> {
    Ok(RunStep {
        id: row.get(0)?,
        run_id: row.get(1)?,
        ts: row.get(2)?,
        stream: parsed_column(row, 3)?,
        message: row.get(4)?,
    })
}

fn attachment_from_row(row: &Row<'_>) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: row.get(0)?,
        run_id: row.get(1)?,
        name: row.get(2)?,
        path: row.get(3)?,
        content_type: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn get_run(conn: &Connection, id: i64) -> Result<Option<Run>> {
    let run = conn
        .query_row(
            &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
            [id],
            run_from_row,
        )
        .optional()?;
    Ok(run)
}

/// How a run ended.
#[derive(Debug, Clone)]
pub struct Completion {
    pub status: RunStatus,
    pub message: Option<String>,
    pub robot_output_path: Option<String>,
    pub robot_log_path: Option<String>,
}

impl Completion {
    pub fn new(status: RunStatus) -> Self {
        Self {
            status,
            message: None,
            robot_output_path: None,
            robot_log_path: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

fn finish_run(conn: &Connection, id: i64, completion: &Completion) -> Result<bool> {
    anyhow::ensure!(
        completion.status.is_terminal(),
        "{} is not a terminal status",
        completion.status
    );
    let changed = conn.execute(
        &format!(
            "UPDATE runs SET
                status = ?2,
                finished_at = ?3,
                message = COALESCE(?4, message),
                robot_output_path = COALESCE(?5, robot_output_path),
                robot_log_path = COALESCE(?6, robot_log_path)
             WHERE id = ?1 AND status IN {NON_TERMINAL}"
        ),
        params![
            id,
            completion.status.as_str(),
            now_timestamp(),
            completion.message,
            completion.robot_output_path,
            completion.robot_log_path,
        ],
    )?;
    Ok(changed > 0)
}

/// Result of asking to delete a run.
#[derive(Debug)]
pub enum DeleteOutcome {
    Deleted(Run),
    NotFound,
    InFlight,
}

/// Handle to run history in the shared pool.
#[derive(Clone)]
pub struct RunStore {
    pool: Pool,
}

impl RunStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Insert a new PENDING run.
    pub async fn create_pending(
        &self,
        target_type: TargetType,
        target_id: i64,
        variables: Variables,
    ) -> Result<Run> {
        let (testcase_id, scenario_id) = match target_type {
            TargetType::Testcase => (Some(target_id), None),
            TargetType::Scenario => (None, Some(target_id)),
        };
        let variables_json = serde_json::to_string(&variables)?;
        storage::interact(&self.pool, move |conn| {
            conn.execute(
                "INSERT INTO runs
                    (status, target_type, testcase_id, scenario_id, variables_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    RunStatus::Pending.as_str(),
                    target_type.as_str(),
                    testcase_id,
                    scenario_id,
                    variables_json,
                    now_timestamp()
                ],
            )
            .context("failed to insert run")?;
            let id = conn.last_insert_rowid();
            get_run(conn, id)?.ok_or_else(|| anyhow::anyhow!("run {id} vanished after insert"))
        })
        .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Run>> {
        storage::interact(&self.pool, move |conn| get_run(conn, id)).await
    }

    /// Most recent runs first.
    pub async fn list(&self, limit: u32) -> Result<Vec<Run>> {
        storage::interact(&self.pool, move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM runs ORDER BY created_at DESC, id DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map([limit], run_from_row)?;
            Ok(rows.collect::<rusqlite::Result<_>>()?)
        })
        .await
    }

    pub async fn set_workdir(&self, id: i64, workdir: String) -> Result<()> {
        storage::interact(&self.pool, move |conn| {
            conn.execute(
                "UPDATE runs SET workdir = ?2 WHERE id = ?1",
                params![id, workdir],
            )?;
            Ok(())
        })
        .await
    }

    /// PENDING → RUNNING, recording `started_at`. Returns `false` if the run
    /// already left PENDING (e.g. it was canceled meanwhile).
    pub async fn mark_running(&self, id: i64) -> Result<bool> {
        storage::interact(&self.pool, move |conn| {
            let changed = conn.execute(
                "UPDATE runs SET status = ?2, started_at = ?3 WHERE id = ?1 AND status = 'PENDING'",
                params![id, RunStatus::Running.as_str(), now_timestamp()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Move a non-terminal run into a terminal state, recording
    /// `finished_at`. Returns `false` if the run was already terminal.
    pub async fn finish(&self, id: i64, completion: Completion) -> Result<bool> {
        storage::interact(&self.pool, move |conn| finish_run(conn, id, &completion)).await
    }

    /// Blocking variant of [`RunStore::finish`] for drop paths, where no
    /// runtime is available to await on.
    pub fn finish_blocking(&self, id: i64, completion: &Completion) -> Result<bool> {
        let conn = self
            .pool
            .get_timeout(BLOCKING_CONNECTION_TIMEOUT)
            .context("failed to get DB connection")?;
        finish_run(&conn, id, completion)
    }

    /// Mark every run left PENDING or RUNNING by a previous process as
    /// CANCELED. Returns how many were recovered.
    pub async fn recover_interrupted(&self, message: &str) -> Result<usize> {
        let message = message.to_string();
        storage::interact(&self.pool, move |conn| {
            let changed = conn.execute(
                &format!(
                    "UPDATE runs SET status = 'CANCELED', finished_at = ?1, message = ?2
                     WHERE status IN {NON_TERMINAL}"
                ),
                params![now_timestamp(), message],
            )?;
            Ok(changed)
        })
        .await
    }

    /// Delete a terminal run; steps and attachments cascade.
    pub async fn delete(&self, id: i64) -> Result<DeleteOutcome> {
        storage::interact(&self.pool, move |conn| {
            let Some(run) = get_run(conn, id)? else {
                return Ok(DeleteOutcome::NotFound);
            };
            if !run.status.is_terminal() {
                return Ok(DeleteOutcome::InFlight);
            }
            conn.execute("DELETE FROM runs WHERE id = ?1", [id])?;
            Ok(DeleteOutcome::Deleted(run))
        })
        .await
    }

    pub async fn append_step(
        &self,
        run_id: i64,
        stream: StreamKind,
        message: String,
    ) -> Result<i64> {
        storage::interact(&self.pool, move |conn| {
            conn.execute(
                "INSERT INTO run_steps (run_id, ts, stream, message) VALUES (?1, ?2, ?3, ?4)",
                params![run_id, now_timestamp(), stream.as_str(), message],
            )
            .context("failed to insert run step")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Steps in log order (timestamp, then insertion). `after` skips steps
    /// with an id at or below it, for tailing.
    pub async fn list_steps(&self, run_id: i64, after: Option<i64>) -> Result<Vec<RunStep>> {
        storage::interact(&self.pool, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, run_id, ts, stream, message FROM run_steps
                 WHERE run_id = ?1 AND id > ?2
                 ORDER BY ts, id",
            )?;
            let rows = stmt.query_map(params![run_id, after.unwrap_or(0)], step_from_row)?;
            Ok(rows.collect::<rusqlite::Result<_>>()?)
        })
        .await
    }

    pub async fn add_attachment(
        &self,
        run_id: i64,
        name: String,
        path: String,
        content_type: Option<String>,
    ) -> Result<i64> {
        storage::interact(&self.pool, move |conn| {
            conn.execute(
                "INSERT INTO attachments (run_id, name, path, content_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![run_id, name, path, content_type, now_timestamp()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn list_attachments(&self, run_id: i64) -> Result<Vec<Attachment>> {
        storage::interact(&self.pool, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, run_id, name, path, content_type, created_at FROM attachments
                 WHERE run_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map([run_id], attachment_from_row)?;
            Ok(rows.collect::<rusqlite::Result<_>>()?)
        })
        .await
    }
}

#[async_trait::async_trait]
impl StepSink for RunStore {
    async fn append(&self, run_id: i64, stream: StreamKind, message: String) -> Result<()> {
        self.append_step(run_id, stream, message).await.map(|_| ())
    }
}

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::storage::now_timestamp;

/// A Robot Framework testcase: a name plus its `.robot` source text.
#[derive(Debug, Clone, Serialize)]
pub struct TestCase {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTestCase {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestCaseUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
}

pub(crate) const COLUMNS: &str = "id, name, description, content, created_at, updated_at";

impl TestCase {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            content: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

/// All testcases, newest first.
pub fn list(conn: &Connection) -> Result<Vec<TestCase>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM testcases ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt.query_map([], TestCase::from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<TestCase>> {
    let tc = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM testcases WHERE id = ?1"),
            [id],
            TestCase::from_row,
        )
        .optional()?;
    Ok(tc)
}

pub fn create(conn: &Connection, new: &NewTestCase) -> Result<TestCase> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO testcases (name, description, content, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![new.name, new.description, new.content, now],
    )?;
    let id = conn.last_insert_rowid();
    get(conn, id)?.ok_or_else(|| anyhow::anyhow!("testcase {id} vanished after insert"))
}

/// Apply the fields present in `update`. Returns `None` if `id` is unknown.
pub fn update(conn: &Connection, id: i64, update: &TestCaseUpdate) -> Result<Option<TestCase>> {
    let changed = conn.execute(
        "UPDATE testcases SET
            name = COALESCE(?2, name),
            description = COALESCE(?3, description),
            content = COALESCE(?4, content),
            updated_at = ?5
         WHERE id = ?1",
        params![id, update.name, update.description, update.content, now_timestamp()],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get(conn, id)
}

/// Delete a testcase and its group/scenario memberships. Runs that
/// reference it are left untouched.
pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
    conn.execute("DELETE FROM group_testcases WHERE testcase_id = ?1", [id])?;
    conn.execute("DELETE FROM scenario_testcases WHERE testcase_id = ?1", [id])?;
    let changed = conn.execute("DELETE FROM testcases WHERE id = ?1", [id])?;
    Ok(changed > 0)
}

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::testcases::{self, TestCase};
use crate::storage::now_timestamp;

/// A named, unordered collection of testcases.
#[derive(Debug, Clone, Serialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl Group {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

pub fn list(conn: &Connection) -> Result<Vec<Group>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, created_at FROM groups ORDER BY created_at DESC, id DESC",
    )?;
    let rows = stmt.query_map([], Group::from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Group>> {
    let group = conn
        .query_row(
            "SELECT id, name, description, created_at FROM groups WHERE id = ?1",
            [id],
            Group::from_row,
        )
        .optional()?;
    Ok(group)
}

pub fn create(conn: &Connection, new: &NewGroup) -> Result<Group> {
    conn.execute(
        "INSERT INTO groups (name, description, created_at) VALUES (?1, ?2, ?3)",
        params![new.name, new.description, now_timestamp()],
    )?;
    let id = conn.last_insert_rowid();
    get(conn, id)?.ok_or_else(|| anyhow::anyhow!("group {id} vanished after insert"))
}

pub fn update(conn: &Connection, id: i64, update: &GroupUpdate) -> Result<Option<Group>> {
    let changed = conn.execute(
        "UPDATE groups SET
            name = COALESCE(?2, name),
            description = COALESCE(?3, description)
         WHERE id = ?1",
        params![id, update.name, update.description],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get(conn, id)
}

pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
    conn.execute("DELETE FROM group_testcases WHERE group_id = ?1", [id])?;
    let changed = conn.execute("DELETE FROM groups WHERE id = ?1", [id])?;
    Ok(changed > 0)
}

/// Add a testcase to a group. Idempotent. Returns `false` when either the
/// group or the testcase does not exist.
pub fn assign_testcase(conn: &Connection, group_id: i64, testcase_id: i64) -> Result<bool> {
    if get(conn, group_id)?.is_none() || testcases::get(conn, testcase_id)?.is_none() {
        return Ok(false);
    }
    conn.execute(
        "INSERT OR IGNORE INTO group_testcases (group_id, testcase_id) VALUES (?1, ?2)",
        [group_id, testcase_id],
    )?;
    Ok(true)
}

/// Remove a testcase from a group. Returns `false` only when the group is
/// unknown; removing a non-member is a no-op.
pub fn remove_testcase(conn: &Connection, group_id: i64, testcase_id: i64) -> Result<bool> {
    if get(conn, group_id)?.is_none() {
        return Ok(false);
    }
    conn.execute(
        "DELETE FROM group_testcases WHERE group_id = ?1 AND testcase_id = ?2",
        [group_id, testcase_id],
    )?;
    Ok(true)
}

/// Members of a group in the order they were added, or `None` for an
/// unknown group.
pub fn list_testcases(conn: &Connection, group_id: i64) -> Result<Option<Vec<TestCase>>> {
    if get(conn, group_id)?.is_none() {
        return Ok(None);
    }
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.description, t.content, t.created_at, t.updated_at
         FROM group_testcases gt JOIN testcases t ON t.id = gt.testcase_id
         WHERE gt.group_id = ?1
         ORDER BY gt.id",
    )?;
    let rows = stmt.query_map([group_id], TestCase::from_row)?;
    Ok(Some(rows.collect::<rusqlite::Result<_>>()?))
}

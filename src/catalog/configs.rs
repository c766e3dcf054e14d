use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::storage::now_timestamp;

/// One entry of the key-value configuration table.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub key: String,
    pub value: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigUpsert {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl Config {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            value: row.get(1)?,
            updated_at: row.get(2)?,
        })
    }
}

pub fn list(conn: &Connection) -> Result<Vec<Config>> {
    let mut stmt = conn.prepare("SELECT key, value, updated_at FROM configs ORDER BY key")?;
    let rows = stmt.query_map([], Config::from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn get(conn: &Connection, key: &str) -> Result<Option<Config>> {
    let cfg = conn
        .query_row(
            "SELECT key, value, updated_at FROM configs WHERE key = ?1",
            [key],
            Config::from_row,
        )
        .optional()?;
    Ok(cfg)
}

/// Create the key or overwrite its value.
pub fn upsert(conn: &Connection, key: &str, value: Option<&str>) -> Result<Config> {
    conn.execute(
        "INSERT INTO configs (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, now_timestamp()],
    )?;
    get(conn, key)?.ok_or_else(|| anyhow::anyhow!("config '{key}' vanished after upsert"))
}

pub fn delete(conn: &Connection, key: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM configs WHERE key = ?1", [key])?;
    Ok(changed > 0)
}

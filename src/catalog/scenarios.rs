use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};

use super::testcases::TestCase;
use crate::runs::Variables;
use crate::storage::{json_column, now_timestamp};

/// A bundle of testcases executed together as one generated suite, plus
/// the base variables every run of it receives.
#[derive(Debug, Clone, Serialize)]
pub struct Scenario {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub inputs: Variables,
    /// Member testcases in association order.
    pub testcase_ids: Vec<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewScenario {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: Option<Variables>,
    #[serde(default)]
    pub testcase_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub inputs: Option<Variables>,
    /// Replaces the membership when present; an empty list clears it.
    pub testcase_ids: Option<Vec<i64>>,
}

fn scenario_from_row(row: &Row<'_>) -> rusqlite::Result<Scenario> {
    Ok(Scenario {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        inputs: json_column(row, 3)?,
        testcase_ids: Vec::new(),
        created_at: row.get(4)?,
    })
}

fn member_ids(conn: &Connection, scenario_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT testcase_id FROM scenario_testcases WHERE scenario_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([scenario_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Replace a scenario's members. Unknown testcase ids are skipped and
/// duplicates keep their first position.
fn set_members(tx: &Transaction<'_>, scenario_id: i64, ids: &[i64]) -> Result<()> {
    tx.execute(
        "DELETE FROM scenario_testcases WHERE scenario_id = ?1",
        [scenario_id],
    )?;
    let mut insert = tx.prepare(
        "INSERT OR IGNORE INTO scenario_testcases (scenario_id, testcase_id)
         SELECT ?1, id FROM testcases WHERE id = ?2",
    )?;
    for id in ids {
        insert.execute([scenario_id, *id])?;
    }
    Ok(())
}

pub fn list(conn: &Connection) -> Result<Vec<Scenario>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, inputs_json, created_at
         FROM scenarios ORDER BY created_at DESC, id DESC",
    )?;
    let mut scenarios = stmt
        .query_map([], scenario_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for s in &mut scenarios {
        s.testcase_ids = member_ids(conn, s.id)?;
    }
    Ok(scenarios)
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Scenario>> {
    let scenario = conn
        .query_row(
            "SELECT id, name, description, inputs_json, created_at FROM scenarios WHERE id = ?1",
            [id],
            scenario_from_row,
        )
        .optional()?;
    match scenario {
        Some(mut s) => {
            s.testcase_ids = member_ids(conn, s.id)?;
            Ok(Some(s))
        }
        None => Ok(None),
    }
}

/// A scenario together with its member testcases, in association order.
pub fn get_with_testcases(conn: &Connection, id: i64) -> Result<Option<(Scenario, Vec<TestCase>)>> {
    let Some(scenario) = get(conn, id)? else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.description, t.content, t.created_at, t.updated_at
         FROM scenario_testcases st JOIN testcases t ON t.id = st.testcase_id
         WHERE st.scenario_id = ?1
         ORDER BY st.id",
    )?;
    let testcases = stmt
        .query_map([id], TestCase::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Some((scenario, testcases)))
}

pub fn create(conn: &mut Connection, new: &NewScenario) -> Result<Scenario> {
    let inputs = serde_json::to_string(&new.inputs.clone().unwrap_or_default())?;
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO scenarios (name, description, inputs_json, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![new.name, new.description, inputs, now_timestamp()],
    )?;
    let id = tx.last_insert_rowid();
    if let Some(ids) = &new.testcase_ids {
        set_members(&tx, id, ids)?;
    }
    tx.commit()?;
    get(conn, id)?.ok_or_else(|| anyhow::anyhow!("scenario {id} vanished after insert"))
}

pub fn update(conn: &mut Connection, id: i64, update: &ScenarioUpdate) -> Result<Option<Scenario>> {
    let inputs = update
        .inputs
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let tx = conn.transaction()?;
    let changed = tx.execute(
        "UPDATE scenarios SET
            name = COALESCE(?2, name),
            description = COALESCE(?3, description),
            inputs_json = COALESCE(?4, inputs_json)
         WHERE id = ?1",
        params![id, update.name, update.description, inputs],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    if let Some(ids) = &update.testcase_ids {
        set_members(&tx, id, ids)?;
    }
    tx.commit()?;
    get(conn, id)
}

pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
    conn.execute("DELETE FROM scenario_testcases WHERE scenario_id = ?1", [id])?;
    let changed = conn.execute("DELETE FROM scenarios WHERE id = ?1", [id])?;
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testcases::{self, NewTestCase};
    use crate::storage::schema;
    use serde_json::json;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        schema::migrate(&conn).unwrap();
        conn
    }

    fn testcase(conn: &Connection, name: &str) -> i64 {
        testcases::create(
            conn,
            &NewTestCase {
                name: name.into(),
                description: None,
                content: format!("Log    {name}"),
            },
        )
        .unwrap()
        .id
    }

    fn new_scenario(name: &str, ids: Vec<i64>) -> NewScenario {
        let mut inputs = Variables::new();
        inputs.insert("A".into(), json!("1"));
        NewScenario {
            name: name.into(),
            description: None,
            inputs: Some(inputs),
            testcase_ids: Some(ids),
        }
    }

    #[test]
    fn test_create_keeps_association_order() {
        let mut conn = conn();
        let t1 = testcase(&conn, "T1");
        let t2 = testcase(&conn, "T2");

        let s = create(&mut conn, &new_scenario("checkout", vec![t2, t1, t2, 999])).unwrap();
        assert_eq!(s.testcase_ids, vec![t2, t1]);
        assert_eq!(s.inputs["A"], json!("1"));

        let (_, members) = get_with_testcases(&conn, s.id).unwrap().unwrap();
        let names: Vec<_> = members.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["T2", "T1"]);
    }

    #[test]
    fn test_update_replaces_members_only_when_given() {
        let mut conn = conn();
        let t1 = testcase(&conn, "T1");
        let t2 = testcase(&conn, "T2");
        let s = create(&mut conn, &new_scenario("s", vec![t1])).unwrap();

        let renamed = update(
            &mut conn,
            s.id,
            &ScenarioUpdate {
                name: Some("renamed".into()),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();
        assert_eq!(renamed.testcase_ids, vec![t1]);

        let replaced = update(
            &mut conn,
            s.id,
            &ScenarioUpdate {
                testcase_ids: Some(vec![t2]),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();
        assert_eq!(replaced.testcase_ids, vec![t2]);

        let cleared = update(
            &mut conn,
            s.id,
            &ScenarioUpdate {
                testcase_ids: Some(vec![]),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();
        assert!(cleared.testcase_ids.is_empty());
        assert_eq!(cleared.inputs["A"], json!("1"));
    }

    #[test]
    fn test_update_missing_scenario() {
        let mut conn = conn();
        assert!(update(&mut conn, 42, &ScenarioUpdate::default()).unwrap().is_none());
    }

    #[test]
    fn test_delete_scenario() {
        let mut conn = conn();
        let t1 = testcase(&conn, "T1");
        let s = create(&mut conn, &new_scenario("s", vec![t1])).unwrap();
        assert!(delete(&conn, s.id).unwrap());
        assert!(get_with_testcases(&conn, s.id).unwrap().is_none());
        assert!(testcases::get(&conn, t1).unwrap().is_some());
    }
}

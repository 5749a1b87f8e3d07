//! Active project / active task pointers and the AI-interaction log

use super::models::Interaction;
use crate::error::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Rows kept per workspace in `interactions`
pub const INTERACTION_RETENTION: u32 = 1000;

// ============================================================================
// Pointers
// ============================================================================

pub fn active_project(conn: &Connection, workspace_id: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT project_id FROM active_project WHERE workspace_id = ?1",
            params![workspace_id],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn set_active_project(conn: &Connection, workspace_id: &str, project_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO active_project (workspace_id, project_id, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(workspace_id) DO UPDATE SET project_id = excluded.project_id,
                                                 updated_at = excluded.updated_at",
        params![workspace_id, project_id, Utc::now()],
    )?;
    Ok(())
}

/// Returns whether a pointer was removed.
pub fn clear_active_project(conn: &Connection, workspace_id: &str) -> Result<bool> {
    Ok(conn.execute(
        "DELETE FROM active_project WHERE workspace_id = ?1",
        params![workspace_id],
    )? > 0)
}

pub fn active_task(conn: &Connection, workspace_id: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT task_id FROM active_task WHERE workspace_id = ?1",
            params![workspace_id],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn set_active_task(conn: &Connection, workspace_id: &str, task_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO active_task (workspace_id, task_id, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(workspace_id) DO UPDATE SET task_id = excluded.task_id,
                                                 updated_at = excluded.updated_at",
        params![workspace_id, task_id, Utc::now()],
    )?;
    Ok(())
}

pub fn clear_active_task(conn: &Connection, workspace_id: &str) -> Result<bool> {
    Ok(conn.execute(
        "DELETE FROM active_task WHERE workspace_id = ?1",
        params![workspace_id],
    )? > 0)
}

// ============================================================================
// Interaction log
// ============================================================================

fn from_row(row: &Row<'_>) -> rusqlite::Result<Interaction> {
    let context: Option<String> = row.get(3)?;
    Ok(Interaction {
        id: row.get::<_, i64>(0)?.to_string(),
        task_id: row.get(1)?,
        action: row.get(2)?,
        context: context.and_then(|raw| serde_json::from_str(&raw).ok()),
        created_at: row.get(4)?,
    })
}

/// Append a log row and prune the workspace back to the retention bound.
pub fn record_interaction(
    conn: &Connection,
    workspace_id: &str,
    task_id: &str,
    action: &str,
    context: Option<&serde_json::Value>,
) -> Result<()> {
    let context = context.map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO interactions (workspace_id, task_id, action, context, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![workspace_id, task_id, action, context, Utc::now()],
    )?;
    conn.execute(
        "DELETE FROM interactions WHERE workspace_id = ?1 AND id NOT IN
            (SELECT id FROM interactions WHERE workspace_id = ?1 ORDER BY id DESC LIMIT ?2)",
        params![workspace_id, INTERACTION_RETENTION],
    )?;
    Ok(())
}

/// Most recent rows first.
pub fn interactions(conn: &Connection, workspace_id: &str, limit: u32) -> Result<Vec<Interaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, task_id, action, context, created_at FROM interactions
         WHERE workspace_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![workspace_id, limit], from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Distinct task ids by most recent interaction.
pub fn recent_task_ids(conn: &Connection, workspace_id: &str, limit: u32) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT task_id FROM interactions WHERE workspace_id = ?1
         GROUP BY task_id ORDER BY MAX(id) DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![workspace_id, limit], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
}

pub fn interaction_count(conn: &Connection, workspace_id: &str) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM interactions WHERE workspace_id = ?1",
        params![workspace_id],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::projects::{self, NewProject};
    use crate::store::tasks::{self, NewTask};
    use crate::store::Database;

    #[test]
    fn test_pointers_are_single_and_cascade() {
        let db = Database::open_in_memory().unwrap();
        let p1 = db.write(|tx| projects::insert(tx, "ws", &NewProject::new("P1", ""))).unwrap();
        let p2 = db.write(|tx| projects::insert(tx, "ws", &NewProject::new("P2", ""))).unwrap();

        db.write(|tx| set_active_project(tx, "ws", &p1.id)).unwrap();
        db.write(|tx| set_active_project(tx, "ws", &p2.id)).unwrap();
        assert_eq!(db.read(|conn| active_project(conn, "ws")).unwrap(), Some(p2.id.clone()));

        let mut new = NewTask::new("In P2");
        new.project_id = Some(p2.id.clone());
        let task = db.write(|tx| tasks::insert(tx, "ws", &new)).unwrap();
        db.write(|tx| set_active_task(tx, "ws", &task.id)).unwrap();

        db.write(|tx| projects::delete(tx, "ws", &p2.id)).unwrap();
        assert_eq!(db.read(|conn| active_project(conn, "ws")).unwrap(), None);
        assert_eq!(db.read(|conn| active_task(conn, "ws")).unwrap(), None);
    }

    #[test]
    fn test_interaction_log_is_bounded() {
        let db = Database::open_in_memory().unwrap();
        let task = db.write(|tx| tasks::insert(tx, "ws", &NewTask::new("T"))).unwrap();
        db.write(|tx| {
            for _ in 0..(INTERACTION_RETENTION + 5) {
                record_interaction(tx, "ws", &task.id, "viewed", None)?;
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(
            db.read(|conn| interaction_count(conn, "ws")).unwrap(),
            INTERACTION_RETENTION
        );
    }

    #[test]
    fn test_recent_task_ids_dedupes() {
        let db = Database::open_in_memory().unwrap();
        let a = db.write(|tx| tasks::insert(tx, "ws", &NewTask::new("A"))).unwrap();
        let b = db.write(|tx| tasks::insert(tx, "ws", &NewTask::new("B"))).unwrap();
        db.write(|tx| {
            record_interaction(tx, "ws", &a.id, "viewed", None)?;
            record_interaction(tx, "ws", &b.id, "viewed", None)?;
            record_interaction(tx, "ws", &a.id, "updated", Some(&serde_json::json!({"status": "in_progress"})))
        })
        .unwrap();

        let recent = db.read(|conn| recent_task_ids(conn, "ws", 10)).unwrap();
        assert_eq!(recent, vec![a.id.clone(), b.id.clone()]);

        let rows = db.read(|conn| interactions(conn, "ws", 1)).unwrap();
        assert_eq!(rows[0].action, "updated");
        assert_eq!(rows[0].context.as_ref().unwrap()["status"], "in_progress");
    }
}

//! Tags and task membership

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;

/// Trim, drop empties and deduplicate, keeping first-seen order.
pub fn normalize<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    names
        .iter()
        .map(|name| name.as_ref().trim())
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}

/// Split a comma-separated tag list.
pub fn parse_list(raw: &str) -> Vec<String> {
    normalize(&raw.split(',').collect::<Vec<_>>())
}

fn ensure(conn: &Connection, workspace_id: &str, name: &str) -> Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM tags WHERE workspace_id = ?1 AND name = ?2",
            params![workspace_id, name],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = super::new_id();
    conn.execute(
        "INSERT INTO tags (id, workspace_id, name) VALUES (?1, ?2, ?3)",
        params![id, workspace_id, name],
    )?;
    Ok(id)
}

/// Add tags to a task; already-present names are ignored.
pub fn add(conn: &Connection, workspace_id: &str, task_id: &str, names: &[String]) -> Result<()> {
    for name in normalize(names) {
        let tag_id = ensure(conn, workspace_id, &name)?;
        conn.execute(
            "INSERT OR IGNORE INTO task_tags (task_id, tag_id) VALUES (?1, ?2)",
            params![task_id, tag_id],
        )?;
    }
    Ok(())
}

pub fn remove(conn: &Connection, workspace_id: &str, task_id: &str, names: &[String]) -> Result<()> {
    for name in normalize(names) {
        conn.execute(
            "DELETE FROM task_tags WHERE task_id = ?1 AND tag_id IN
                (SELECT id FROM tags WHERE workspace_id = ?2 AND name = ?3)",
            params![task_id, workspace_id, name],
        )?;
    }
    Ok(())
}

/// Replace the task's tag set.
pub fn replace(conn: &Connection, workspace_id: &str, task_id: &str, names: &[String]) -> Result<()> {
    conn.execute("DELETE FROM task_tags WHERE task_id = ?1", params![task_id])?;
    add(conn, workspace_id, task_id, names)
}

/// `(name, task count)` for every tag of the workspace.
pub fn list(conn: &Connection, workspace_id: &str) -> Result<Vec<(String, u32)>> {
    let mut stmt = conn.prepare(
        "SELECT g.name, COUNT(tt.task_id) FROM tags g
         LEFT JOIN task_tags tt ON tt.tag_id = g.id
         WHERE g.workspace_id = ?1
         GROUP BY g.id ORDER BY g.name",
    )?;
    let rows = stmt.query_map(params![workspace_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

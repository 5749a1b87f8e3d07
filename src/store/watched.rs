//! Persisted file-watch registrations

use super::models::WatchedFile;
use crate::error::{GorevError, Result};
use chrono::Utc;
use rusqlite::{params, Connection};

/// Returns false when the pair was already registered.
pub fn add(conn: &Connection, workspace_id: &str, task_id: &str, path: &str) -> Result<bool> {
    Ok(conn.execute(
        "INSERT OR IGNORE INTO watched_files (workspace_id, task_id, path, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![workspace_id, task_id, path, Utc::now()],
    )? > 0)
}

pub fn remove(conn: &Connection, workspace_id: &str, task_id: &str, path: &str) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM watched_files WHERE workspace_id = ?1 AND task_id = ?2 AND path = ?3",
        params![workspace_id, task_id, path],
    )?;
    if removed == 0 {
        return Err(GorevError::not_found("watched_file", path));
    }
    Ok(())
}

/// Registrations of the workspace, optionally for one task.
pub fn list(conn: &Connection, workspace_id: &str, task_id: Option<&str>) -> Result<Vec<WatchedFile>> {
    let mut stmt = conn.prepare(
        "SELECT task_id, path, created_at FROM watched_files
         WHERE workspace_id = ?1 AND (?2 IS NULL OR task_id = ?2)
         ORDER BY created_at, path",
    )?;
    let rows = stmt.query_map(params![workspace_id, task_id], |row| {
        Ok(WatchedFile {
            task_id: row.get(0)?,
            path: row.get(1)?,
            created_at: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

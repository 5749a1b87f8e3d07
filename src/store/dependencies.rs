//! Dependency edges between tasks

use super::models::{Dependency, DependencyKind};
use crate::error::{GorevError, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};

const SELECT_DEPENDENCY: &str =
    "SELECT id, source_id, target_id, kind, created_at FROM dependencies";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Dependency> {
    Ok(Dependency {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        kind: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Insert an edge; existence of both ends is the caller's check.
pub fn insert(
    conn: &Connection,
    workspace_id: &str,
    source_id: &str,
    target_id: &str,
    kind: DependencyKind,
) -> Result<Dependency> {
    let dependency = Dependency {
        id: super::new_id(),
        source_id: source_id.to_string(),
        target_id: target_id.to_string(),
        kind,
        created_at: Utc::now(),
    };
    insert_row(conn, workspace_id, &dependency)?;
    Ok(dependency)
}

pub fn insert_row(conn: &Connection, workspace_id: &str, dependency: &Dependency) -> Result<()> {
    conn.execute(
        "INSERT INTO dependencies (id, workspace_id, source_id, target_id, kind, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            dependency.id,
            workspace_id,
            dependency.source_id,
            dependency.target_id,
            dependency.kind,
            dependency.created_at
        ],
    )
    .map_err(|e| {
        super::conflict_on_unique(e, || {
            format!(
                "dependency already exists: {} -> {} ({})",
                dependency.source_id,
                dependency.target_id,
                dependency.kind.as_str()
            )
        })
    })?;
    Ok(())
}

/// Edges leaving `task_id` (what it waits on).
pub fn outgoing(conn: &Connection, workspace_id: &str, task_id: &str) -> Result<Vec<Dependency>> {
    query(
        conn,
        &format!("{SELECT_DEPENDENCY} WHERE workspace_id = ?1 AND source_id = ?2 ORDER BY created_at"),
        workspace_id,
        task_id,
    )
}

/// Edges entering `task_id` (what waits on it).
pub fn incoming(conn: &Connection, workspace_id: &str, task_id: &str) -> Result<Vec<Dependency>> {
    query(
        conn,
        &format!("{SELECT_DEPENDENCY} WHERE workspace_id = ?1 AND target_id = ?2 ORDER BY created_at"),
        workspace_id,
        task_id,
    )
}

fn query(conn: &Connection, sql: &str, workspace_id: &str, task_id: &str) -> Result<Vec<Dependency>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![workspace_id, task_id], from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn all(conn: &Connection, workspace_id: &str) -> Result<Vec<Dependency>> {
    let mut stmt =
        conn.prepare(&format!("{SELECT_DEPENDENCY} WHERE workspace_id = ?1 ORDER BY created_at"))?;
    let rows = stmt.query_map(params![workspace_id], from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn delete(conn: &Connection, workspace_id: &str, source_id: &str, target_id: &str) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM dependencies WHERE workspace_id = ?1 AND source_id = ?2 AND target_id = ?3",
        params![workspace_id, source_id, target_id],
    )?;
    if removed == 0 {
        return Err(GorevError::not_found("dependency", format!("{source_id} -> {target_id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tasks::{self, NewTask};
    use crate::store::Database;

    #[test]
    fn test_duplicate_edge_is_conflict() {
        let db = Database::open_in_memory().unwrap();
        let a = db.write(|tx| tasks::insert(tx, "ws", &NewTask::new("A"))).unwrap();
        let b = db.write(|tx| tasks::insert(tx, "ws", &NewTask::new("B"))).unwrap();

        db.write(|tx| insert(tx, "ws", &a.id, &b.id, DependencyKind::Blocker))
            .unwrap();
        let err = db
            .write(|tx| insert(tx, "ws", &a.id, &b.id, DependencyKind::Blocker))
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");

        // Same pair with the other kind is a distinct edge
        db.write(|tx| insert(tx, "ws", &a.id, &b.id, DependencyKind::DependsOn))
            .unwrap();
        assert_eq!(db.read(|conn| outgoing(conn, "ws", &a.id)).unwrap().len(), 2);
        assert_eq!(db.read(|conn| incoming(conn, "ws", &b.id)).unwrap().len(), 2);
    }

    #[test]
    fn test_delete_missing_edge() {
        let db = Database::open_in_memory().unwrap();
        let err = db.write(|tx| delete(tx, "ws", "x", "y")).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}

//! Project rows

use super::models::Project;
use crate::error::{GorevError, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

const SELECT_PROJECT: &str = "
    SELECT p.id, p.name, p.definition, p.created_at, p.updated_at,
           (SELECT COUNT(*) FROM tasks t WHERE t.project_id = p.id) AS task_count
    FROM projects p";

#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub definition: String,
}

impl NewProject {
    pub fn new(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: definition.into(),
        }
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        definition: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        task_count: row.get(5)?,
    })
}

pub fn insert(conn: &Connection, workspace_id: &str, new: &NewProject) -> Result<Project> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(GorevError::Validation("project name must not be empty".into()));
    }
    let now = Utc::now();
    let project = Project {
        id: super::new_id(),
        name: name.to_string(),
        definition: new.definition.clone(),
        created_at: now,
        updated_at: now,
        task_count: 0,
    };
    insert_row(conn, workspace_id, &project)?;
    Ok(project)
}

/// Insert a fully-formed row (import path keeps the original id).
pub fn insert_row(conn: &Connection, workspace_id: &str, project: &Project) -> Result<()> {
    conn.execute(
        "INSERT INTO projects (id, workspace_id, name, definition, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            project.id,
            workspace_id,
            project.name,
            project.definition,
            project.created_at,
            project.updated_at
        ],
    )
    .map_err(|e| super::conflict_on_unique(e, || format!("project id already exists: {}", project.id)))?;
    Ok(())
}

pub fn find(conn: &Connection, workspace_id: &str, id: &str) -> Result<Option<Project>> {
    let sql = format!("{SELECT_PROJECT} WHERE p.workspace_id = ?1 AND p.id = ?2");
    Ok(conn
        .query_row(&sql, params![workspace_id, id], from_row)
        .optional()?)
}

pub fn get(conn: &Connection, workspace_id: &str, id: &str) -> Result<Project> {
    find(conn, workspace_id, id)?.ok_or_else(|| GorevError::not_found("project", id))
}

/// All projects, oldest first.
pub fn list(conn: &Connection, workspace_id: &str) -> Result<Vec<Project>> {
    let sql = format!("{SELECT_PROJECT} WHERE p.workspace_id = ?1 ORDER BY p.created_at, p.id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![workspace_id], from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn update(
    conn: &Connection,
    workspace_id: &str,
    id: &str,
    name: Option<&str>,
    definition: Option<&str>,
) -> Result<Project> {
    let current = get(conn, workspace_id, id)?;
    let name = match name.map(str::trim) {
        Some("") => return Err(GorevError::Validation("project name must not be empty".into())),
        Some(name) => name.to_string(),
        None => current.name,
    };
    let definition = definition.map(str::to_string).unwrap_or(current.definition);
    conn.execute(
        "UPDATE projects SET name = ?1, definition = ?2, updated_at = ?3
         WHERE workspace_id = ?4 AND id = ?5",
        params![name, definition, Utc::now(), workspace_id, id],
    )?;
    get(conn, workspace_id, id)
}

/// Delete a project; its tasks (and everything hanging off them) cascade.
pub fn delete(conn: &Connection, workspace_id: &str, id: &str) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM projects WHERE workspace_id = ?1 AND id = ?2",
        params![workspace_id, id],
    )?;
    if removed == 0 {
        return Err(GorevError::not_found("project", id));
    }
    Ok(())
}

pub fn count(conn: &Connection, workspace_id: &str) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE workspace_id = ?1",
        params![workspace_id],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    #[test]
    fn test_insert_trims_and_rejects_blank_names() {
        let db = Database::open_in_memory().unwrap();
        let project = db
            .write(|tx| insert(tx, "ws", &NewProject::new("  Backend  ", "API work")))
            .unwrap();
        assert_eq!(project.name, "Backend");

        let err = db
            .write(|tx| insert(tx, "ws", &NewProject::new("   ", "")))
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_duplicate_names_allowed_and_scoped_by_workspace() {
        let db = Database::open_in_memory().unwrap();
        db.write(|tx| insert(tx, "a", &NewProject::new("Same", ""))).unwrap();
        db.write(|tx| insert(tx, "a", &NewProject::new("Same", ""))).unwrap();
        db.write(|tx| insert(tx, "b", &NewProject::new("Other", ""))).unwrap();

        let a = db.read(|conn| list(conn, "a")).unwrap();
        assert_eq!(a.len(), 2);
        assert_ne!(a[0].id, a[1].id);
        assert_eq!(db.read(|conn| list(conn, "b")).unwrap().len(), 1);

        // Ids do not leak across workspaces
        let err = db.read(|conn| get(conn, "b", &a[0].id)).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_update_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let project = db
            .write(|tx| insert(tx, "ws", &NewProject::new("Old", "d")))
            .unwrap();
        let updated = db
            .write(|tx| update(tx, "ws", &project.id, Some("New"), None))
            .unwrap();
        assert_eq!(updated.name, "New");
        assert_eq!(updated.definition, "d");

        db.write(|tx| delete(tx, "ws", &project.id)).unwrap();
        let err = db.write(|tx| delete(tx, "ws", &project.id)).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}

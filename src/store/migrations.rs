//! Schema migrations
//!
//! SQL files are compiled in and applied in version order on every open.
//! Applied versions are recorded in `schema_version`, so reopening an
//! up-to-date database is a no-op. A failing migration rolls back and the
//! error is fatal for that workspace.

use crate::error::{GorevError, Result};
use rusqlite::Connection;
use tracing::{debug, info};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "projects, tasks, tags, dependencies, templates, AI context",
        sql: include_str!("migrations/v001_schema.sql"),
    },
    Migration {
        version: 2,
        description: "filter profiles, search history, watched files",
        sql: include_str!("migrations/v002_profiles_watch.sql"),
    },
];

/// Apply every pending migration; returns how many ran.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(
            version = migration.version,
            description = migration.description,
            "Applying migration"
        );
        apply(conn, migration)?;
        applied += 1;
    }

    if applied == 0 {
        debug!(version = current, "Schema up to date");
    }
    Ok(applied)
}

/// Highest applied version, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| GorevError::internal(format!("failed to read schema_version: {e}")))
}

pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL,
            description TEXT
        );",
    )?;
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql).map_err(|e| {
        GorevError::internal(format!(
            "migration v{} ({}) failed: {e}",
            migration.version, migration.description
        ))
    })?;
    tx.execute(
        "INSERT INTO schema_version (version, applied_at, description) VALUES (?1, datetime('now'), ?2)",
        rusqlite::params![migration.version, migration.description],
    )?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap()
    }

    #[test]
    fn test_fresh_database_gets_every_table() {
        let conn = Connection::open_in_memory().unwrap();
        let applied = run_migrations(&conn).unwrap();
        assert_eq!(applied, latest_version());

        let tables = table_names(&conn);
        for expected in [
            "projects",
            "tasks",
            "tags",
            "task_tags",
            "dependencies",
            "templates",
            "active_project",
            "active_task",
            "interactions",
            "filter_profiles",
            "search_history",
            "watched_files",
            "schema_version",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[test]
    fn test_rerun_is_noop() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), 0);
        assert_eq!(current_version(&conn).unwrap(), latest_version());

        let rows: u32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_partial_upgrade_applies_only_newer_versions() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_version_table(&conn).unwrap();
        apply(&conn, &MIGRATIONS[0]).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 1);

        assert_eq!(run_migrations(&conn).unwrap(), latest_version() - 1);
        assert!(table_names(&conn).iter().any(|t| t == "watched_files"));
    }
}

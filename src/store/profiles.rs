//! Saved filter profiles and search history

use super::models::{FilterProfile, SearchFilters, SearchHistoryEntry};
use crate::error::{GorevError, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Rows kept per workspace in `search_history`
pub const SEARCH_HISTORY_RETENTION: u32 = 100;

const SELECT_PROFILE: &str = "
    SELECT id, name, description, filters, search_query, use_count,
           last_used_at, created_at, updated_at
    FROM filter_profiles";

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<FilterProfile> {
    let filters: String = row.get(3)?;
    let filters = serde_json::from_str(&filters).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(FilterProfile {
        id: row.get::<_, i64>(0)?.to_string(),
        name: row.get(1)?,
        description: row.get(2)?,
        filters,
        search_query: row.get(4)?,
        use_count: row.get(5)?,
        last_used_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub fn save(
    conn: &Connection,
    workspace_id: &str,
    name: &str,
    description: &str,
    filters: &SearchFilters,
    search_query: Option<&str>,
) -> Result<FilterProfile> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GorevError::Validation("profile name must not be empty".into()));
    }
    let now = Utc::now();
    conn.execute(
        "INSERT INTO filter_profiles
            (workspace_id, name, description, filters, search_query, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            workspace_id,
            name,
            description,
            serde_json::to_string(filters)?,
            search_query,
            now
        ],
    )
    .map_err(|e| super::conflict_on_unique(e, || format!("filter profile already exists: {name}")))?;
    let id = conn.last_insert_rowid().to_string();
    get(conn, workspace_id, &id)
}

/// Look up by string id; non-numeric ids simply do not exist.
pub fn find(conn: &Connection, workspace_id: &str, id: &str) -> Result<Option<FilterProfile>> {
    let Ok(key) = id.trim().parse::<i64>() else {
        return Ok(None);
    };
    let sql = format!("{SELECT_PROFILE} WHERE workspace_id = ?1 AND id = ?2");
    Ok(conn
        .query_row(&sql, params![workspace_id, key], profile_from_row)
        .optional()?)
}

pub fn get(conn: &Connection, workspace_id: &str, id: &str) -> Result<FilterProfile> {
    find(conn, workspace_id, id)?.ok_or_else(|| GorevError::not_found("filter_profile", id))
}

pub fn find_by_name(conn: &Connection, workspace_id: &str, name: &str) -> Result<Option<FilterProfile>> {
    let sql = format!("{SELECT_PROFILE} WHERE workspace_id = ?1 AND name = ?2");
    Ok(conn
        .query_row(&sql, params![workspace_id, name.trim()], profile_from_row)
        .optional()?)
}

/// Most used first.
pub fn list(conn: &Connection, workspace_id: &str) -> Result<Vec<FilterProfile>> {
    let sql = format!("{SELECT_PROFILE} WHERE workspace_id = ?1 ORDER BY use_count DESC, name");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![workspace_id], profile_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn mark_used(conn: &Connection, workspace_id: &str, id: &str) -> Result<FilterProfile> {
    let profile = get(conn, workspace_id, id)?;
    conn.execute(
        "UPDATE filter_profiles SET use_count = use_count + 1, last_used_at = ?1
         WHERE workspace_id = ?2 AND id = ?3",
        params![Utc::now(), workspace_id, profile.id.parse::<i64>().unwrap_or_default()],
    )?;
    get(conn, workspace_id, id)
}

pub fn delete(conn: &Connection, workspace_id: &str, id: &str) -> Result<()> {
    let profile = get(conn, workspace_id, id)?;
    conn.execute(
        "DELETE FROM filter_profiles WHERE workspace_id = ?1 AND id = ?2",
        params![workspace_id, profile.id.parse::<i64>().unwrap_or_default()],
    )?;
    Ok(())
}

// ============================================================================
// Search history
// ============================================================================

pub fn record_search(
    conn: &Connection,
    workspace_id: &str,
    query: &str,
    mode: &str,
    result_count: u32,
) -> Result<()> {
    conn.execute(
        "INSERT INTO search_history (workspace_id, query, mode, result_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![workspace_id, query, mode, result_count, Utc::now()],
    )?;
    conn.execute(
        "DELETE FROM search_history WHERE workspace_id = ?1 AND id NOT IN
            (SELECT id FROM search_history WHERE workspace_id = ?1 ORDER BY id DESC LIMIT ?2)",
        params![workspace_id, SEARCH_HISTORY_RETENTION],
    )?;
    Ok(())
}

/// Newest first.
pub fn history(conn: &Connection, workspace_id: &str, limit: u32) -> Result<Vec<SearchHistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, query, mode, result_count, created_at FROM search_history
         WHERE workspace_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![workspace_id, limit], |row| {
        Ok(SearchHistoryEntry {
            id: row.get::<_, i64>(0)?.to_string(),
            query: row.get(1)?,
            mode: row.get(2)?,
            result_count: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Database, TaskStatus};

    #[test]
    fn test_profile_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let filters = SearchFilters {
            status: vec![TaskStatus::Pending],
            tags: vec!["api".into()],
            ..Default::default()
        };
        let saved = db
            .write(|tx| save(tx, "ws", "My open API work", "", &filters, Some("login")))
            .unwrap();
        assert!(saved.id.parse::<i64>().is_ok());
        assert_eq!(saved.use_count, 0);

        let dup = db
            .write(|tx| save(tx, "ws", "My open API work", "", &filters, None))
            .unwrap_err();
        assert_eq!(dup.kind(), "conflict");

        let used = db.write(|tx| mark_used(tx, "ws", &saved.id)).unwrap();
        assert_eq!(used.use_count, 1);
        assert!(used.last_used_at.is_some());
        assert_eq!(used.filters, filters);

        let by_name = db.read(|conn| find_by_name(conn, "ws", "My open API work")).unwrap();
        assert_eq!(by_name.map(|p| p.id), Some(saved.id.clone()));

        db.write(|tx| delete(tx, "ws", &saved.id)).unwrap();
        assert!(db.read(|conn| list(conn, "ws")).unwrap().is_empty());
        assert!(db.read(|conn| find(conn, "ws", "not-a-number")).unwrap().is_none());
    }

    #[test]
    fn test_search_history_is_bounded() {
        let db = Database::open_in_memory().unwrap();
        db.write(|tx| {
            for i in 0..(SEARCH_HISTORY_RETENTION + 10) {
                record_search(tx, "ws", &format!("q{i}"), "nlp", i)?;
            }
            Ok(())
        })
        .unwrap();
        let all = db.read(|conn| history(conn, "ws", 1000)).unwrap();
        assert_eq!(all.len(), SEARCH_HISTORY_RETENTION as usize);
        assert_eq!(all[0].query, format!("q{}", SEARCH_HISTORY_RETENTION + 9));
    }
}

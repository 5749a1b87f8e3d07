//! Task rows, listing queries and counters

use super::models::{Priority, SearchFilters, Summary, Task, TaskStatus};
use super::tags;
use crate::error::{GorevError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

/// Separator used to pack tag names into one column
const TAG_SEP: char = '\u{1f}';

const SELECT_TASK: &str = "
    SELECT t.id, t.title, t.description, t.status, t.priority, t.project_id,
           t.parent_id, t.due_date, t.created_at, t.updated_at,
           (SELECT COUNT(*) FROM dependencies d WHERE d.source_id = t.id),
           (SELECT COUNT(*) FROM dependencies d JOIN tasks x ON x.id = d.target_id
              WHERE d.source_id = t.id AND x.status != 'completed'),
           (SELECT COUNT(*) FROM dependencies d WHERE d.target_id = t.id),
           (SELECT group_concat(g.name, char(31)) FROM task_tags tt
              JOIN tags g ON g.id = tt.tag_id WHERE tt.task_id = t.id)
    FROM tasks t";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let packed: Option<String> = row.get(13)?;
    let mut tags: Vec<String> = packed
        .map(|s| s.split(TAG_SEP).map(str::to_string).collect())
        .unwrap_or_default();
    tags.sort();
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: row.get(3)?,
        priority: row.get(4)?,
        project_id: row.get(5)?,
        parent_id: row.get(6)?,
        due_date: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        dependency_count: row.get(10)?,
        unfulfilled_dependency_count: row.get(11)?,
        dependent_count: row.get(12)?,
        tags,
    })
}

// ============================================================================
// Create / read
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: Option<Priority>,
    pub project_id: Option<String>,
    pub parent_id: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub tags: Vec<String>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Insert a pending task with its tags.
pub fn insert(conn: &Connection, workspace_id: &str, new: &NewTask) -> Result<Task> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(GorevError::Validation("task title must not be empty".into()));
    }
    let now = Utc::now();
    let id = super::new_id();
    conn.execute(
        "INSERT INTO tasks (id, workspace_id, title, description, status, priority,
                            project_id, parent_id, due_date, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            id,
            workspace_id,
            title,
            new.description,
            TaskStatus::Pending,
            new.priority.unwrap_or(Priority::Medium),
            new.project_id,
            new.parent_id,
            new.due_date,
            now
        ],
    )?;
    tags::add(conn, workspace_id, &id, &new.tags)?;
    get(conn, workspace_id, &id)
}

/// Insert a row exactly as given (import); tags are written too.
pub fn insert_row(conn: &Connection, workspace_id: &str, task: &Task) -> Result<()> {
    conn.execute(
        "INSERT INTO tasks (id, workspace_id, title, description, status, priority,
                            project_id, parent_id, due_date, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            task.id,
            workspace_id,
            task.title,
            task.description,
            task.status,
            task.priority,
            task.project_id,
            task.parent_id,
            task.due_date,
            task.created_at,
            task.updated_at
        ],
    )
    .map_err(|e| super::conflict_on_unique(e, || format!("task id already exists: {}", task.id)))?;
    tags::replace(conn, workspace_id, &task.id, &task.tags)
}

pub fn find(conn: &Connection, workspace_id: &str, id: &str) -> Result<Option<Task>> {
    let sql = format!("{SELECT_TASK} WHERE t.workspace_id = ?1 AND t.id = ?2");
    Ok(conn
        .query_row(&sql, params![workspace_id, id], from_row)
        .optional()?)
}

pub fn get(conn: &Connection, workspace_id: &str, id: &str) -> Result<Task> {
    find(conn, workspace_id, id)?.ok_or_else(|| GorevError::not_found("task", id))
}

pub fn exists(conn: &Connection, workspace_id: &str, id: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM tasks WHERE workspace_id = ?1 AND id = ?2",
            params![workspace_id, id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

/// Parent of `id`, `None` for roots and unknown ids.
pub fn parent_of(conn: &Connection, workspace_id: &str, id: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT parent_id FROM tasks WHERE workspace_id = ?1 AND id = ?2",
            params![workspace_id, id],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?
        .flatten())
}

/// Direct children, oldest first.
pub fn children(conn: &Connection, workspace_id: &str, parent_id: &str) -> Result<Vec<Task>> {
    let sql = format!(
        "{SELECT_TASK} WHERE t.workspace_id = ?1 AND t.parent_id = ?2 ORDER BY t.created_at, t.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![workspace_id, parent_id], from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Every descendant of `id` (not including `id`).
pub fn descendants(conn: &Connection, workspace_id: &str, id: &str) -> Result<Vec<Task>> {
    let sql = format!(
        "WITH RECURSIVE subtree(id) AS (
             SELECT id FROM tasks WHERE workspace_id = ?1 AND parent_id = ?2
             UNION
             SELECT c.id FROM tasks c JOIN subtree s ON c.parent_id = s.id
         )
         {SELECT_TASK} WHERE t.id IN (SELECT id FROM subtree) ORDER BY t.created_at, t.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![workspace_id, id], from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Every task of the workspace, oldest first.
pub fn all(conn: &Connection, workspace_id: &str) -> Result<Vec<Task>> {
    let sql = format!("{SELECT_TASK} WHERE t.workspace_id = ?1 ORDER BY t.created_at, t.id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![workspace_id], from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// ============================================================================
// Listing
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Newest first
    #[default]
    CreatedDesc,
    DueDateAsc,
    DueDateDesc,
}

/// Row filter for listings; `None` fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub project_id: Option<String>,
    pub statuses: Vec<TaskStatus>,
    pub priorities: Vec<Priority>,
    /// Task must carry every tag listed
    pub tags: Vec<String>,
    /// Due strictly before this day
    pub due_before: Option<NaiveDate>,
    /// Due on or after this day
    pub due_from: Option<NaiveDate>,
    /// Due on or before this day
    pub due_until: Option<NaiveDate>,
    /// Exclude closed (completed/cancelled) tasks
    pub open_only: bool,
    /// Case-insensitive substring match over title and description
    pub text: Option<String>,
    pub sort: SortOrder,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl TaskQuery {
    pub fn from_filters(filters: &SearchFilters) -> Self {
        Self {
            project_id: filters.project_id.clone(),
            statuses: filters.status.clone(),
            priorities: filters.priority.clone(),
            tags: filters.tags.clone(),
            due_until: filters.due_before,
            due_from: filters.due_after,
            ..Default::default()
        }
    }

    fn where_clause(&self, workspace_id: &str) -> (String, Vec<Value>) {
        let mut clauses = vec!["t.workspace_id = ?".to_string()];
        let mut args: Vec<Value> = vec![Value::Text(workspace_id.to_string())];

        if let Some(project_id) = &self.project_id {
            clauses.push("t.project_id = ?".into());
            args.push(Value::Text(project_id.clone()));
        }
        if !self.statuses.is_empty() {
            clauses.push(format!("t.status IN ({})", placeholders(self.statuses.len())));
            args.extend(self.statuses.iter().map(|s| Value::Text(s.as_str().into())));
        }
        if !self.priorities.is_empty() {
            clauses.push(format!("t.priority IN ({})", placeholders(self.priorities.len())));
            args.extend(self.priorities.iter().map(|p| Value::Text(p.as_str().into())));
        }
        for tag in &self.tags {
            clauses.push(
                "EXISTS (SELECT 1 FROM task_tags tt JOIN tags g ON g.id = tt.tag_id
                         WHERE tt.task_id = t.id AND g.name = ?)"
                    .into(),
            );
            args.push(Value::Text(tag.clone()));
        }
        if let Some(day) = self.due_before {
            clauses.push("t.due_date IS NOT NULL AND t.due_date < ?".into());
            args.push(Value::Text(day.to_string()));
        }
        if let Some(day) = self.due_from {
            clauses.push("t.due_date IS NOT NULL AND t.due_date >= ?".into());
            args.push(Value::Text(day.to_string()));
        }
        if let Some(day) = self.due_until {
            clauses.push("t.due_date IS NOT NULL AND t.due_date <= ?".into());
            args.push(Value::Text(day.to_string()));
        }
        if self.open_only {
            clauses.push("t.status NOT IN ('completed', 'cancelled')".into());
        }
        if let Some(text) = self.text.as_deref().filter(|s| !s.trim().is_empty()) {
            clauses.push("(lower(t.title) LIKE ? OR lower(t.description) LIKE ?)".into());
            let pattern = format!("%{}%", text.trim().to_lowercase());
            args.push(Value::Text(pattern.clone()));
            args.push(Value::Text(pattern));
        }

        (clauses.join(" AND "), args)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

pub fn list(conn: &Connection, workspace_id: &str, query: &TaskQuery) -> Result<Vec<Task>> {
    let (filter, mut args) = query.where_clause(workspace_id);
    let order = match query.sort {
        SortOrder::CreatedDesc => "t.created_at DESC, t.id",
        SortOrder::DueDateAsc => "t.due_date IS NULL, t.due_date ASC, t.created_at DESC",
        SortOrder::DueDateDesc => "t.due_date IS NULL, t.due_date DESC, t.created_at DESC",
    };
    let mut sql = format!("{SELECT_TASK} WHERE {filter} ORDER BY {order}");
    if let Some(limit) = query.limit {
        sql.push_str(" LIMIT ? OFFSET ?");
        args.push(Value::Integer(limit as i64));
        args.push(Value::Integer(query.offset as i64));
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Rows matching the query, ignoring limit/offset.
pub fn count(conn: &Connection, workspace_id: &str, query: &TaskQuery) -> Result<u32> {
    let (filter, args) = query.where_clause(workspace_id);
    let sql = format!("SELECT COUNT(*) FROM tasks t WHERE {filter}");
    Ok(conn.query_row(&sql, params_from_iter(args), |row| row.get(0))?)
}

// ============================================================================
// Mutation
// ============================================================================

/// Column-level edit; outer `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub project_id: Option<Option<String>>,
    pub parent_id: Option<Option<String>>,
    pub due_date: Option<Option<NaiveDate>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.project_id.is_none()
            && self.parent_id.is_none()
            && self.due_date.is_none()
    }
}

/// Write the patch as-is; invariants are the caller's business.
pub fn apply_patch(conn: &Connection, workspace_id: &str, id: &str, patch: &TaskPatch) -> Result<Task> {
    let mut current = get(conn, workspace_id, id)?;
    if let Some(title) = &patch.title {
        let title = title.trim();
        if title.is_empty() {
            return Err(GorevError::Validation("task title must not be empty".into()));
        }
        current.title = title.to_string();
    }
    if let Some(description) = &patch.description {
        current.description = description.clone();
    }
    if let Some(status) = patch.status {
        current.status = status;
    }
    if let Some(priority) = patch.priority {
        current.priority = priority;
    }
    if let Some(project_id) = &patch.project_id {
        current.project_id = project_id.clone();
    }
    if let Some(parent_id) = &patch.parent_id {
        current.parent_id = parent_id.clone();
    }
    if let Some(due_date) = patch.due_date {
        current.due_date = due_date;
    }

    conn.execute(
        "UPDATE tasks SET title = ?1, description = ?2, status = ?3, priority = ?4,
                          project_id = ?5, parent_id = ?6, due_date = ?7, updated_at = ?8
         WHERE workspace_id = ?9 AND id = ?10",
        params![
            current.title,
            current.description,
            current.status,
            current.priority,
            current.project_id,
            current.parent_id,
            current.due_date,
            Utc::now(),
            workspace_id,
            id
        ],
    )?;
    get(conn, workspace_id, id)
}

/// Overwrite every column from `task` (import with overwrite).
pub fn overwrite_row(conn: &Connection, workspace_id: &str, task: &Task) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET title = ?1, description = ?2, status = ?3, priority = ?4,
                          project_id = ?5, parent_id = ?6, due_date = ?7,
                          created_at = ?8, updated_at = ?9
         WHERE workspace_id = ?10 AND id = ?11",
        params![
            task.title,
            task.description,
            task.status,
            task.priority,
            task.project_id,
            task.parent_id,
            task.due_date,
            task.created_at,
            task.updated_at,
            workspace_id,
            task.id
        ],
    )?;
    tags::replace(conn, workspace_id, &task.id, &task.tags)
}

pub fn touch(conn: &Connection, workspace_id: &str, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET updated_at = ?1 WHERE workspace_id = ?2 AND id = ?3",
        params![Utc::now(), workspace_id, id],
    )?;
    Ok(())
}

/// Move every descendant of `id` into `project_id`.
pub fn set_subtree_project(
    conn: &Connection,
    workspace_id: &str,
    id: &str,
    project_id: Option<&str>,
) -> Result<usize> {
    Ok(conn.execute(
        "WITH RECURSIVE subtree(id) AS (
             SELECT id FROM tasks WHERE workspace_id = ?1 AND parent_id = ?2
             UNION
             SELECT c.id FROM tasks c JOIN subtree s ON c.parent_id = s.id
         )
         UPDATE tasks SET project_id = ?3, updated_at = ?4
         WHERE id IN (SELECT id FROM subtree)",
        params![workspace_id, id, project_id, Utc::now()],
    )?)
}

/// Delete a task; subtasks, edges, tags, watches and log rows cascade.
pub fn delete(conn: &Connection, workspace_id: &str, id: &str) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM tasks WHERE workspace_id = ?1 AND id = ?2",
        params![workspace_id, id],
    )?;
    if removed == 0 {
        return Err(GorevError::not_found("task", id));
    }
    Ok(())
}

// ============================================================================
// Counters
// ============================================================================

pub fn summary(conn: &Connection, workspace_id: &str, today: NaiveDate) -> Result<Summary> {
    let mut summary = Summary {
        total_projects: super::projects::count(conn, workspace_id)?,
        ..Default::default()
    };

    let mut stmt = conn.prepare(
        "SELECT status, priority, COUNT(*) FROM tasks WHERE workspace_id = ?1 GROUP BY status, priority",
    )?;
    let rows = stmt.query_map(params![workspace_id], |row| {
        Ok((row.get::<_, TaskStatus>(0)?, row.get::<_, Priority>(1)?, row.get::<_, u32>(2)?))
    })?;
    for row in rows {
        let (status, priority, n) = row?;
        summary.total_tasks += n;
        *summary.by_status.entry(status.as_str().to_string()).or_default() += n;
        *summary.by_priority.entry(priority.as_str().to_string()).or_default() += n;
    }

    let soon = today + chrono::Days::new(7);
    let (overdue, due_soon): (u32, u32) = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN due_date < ?2 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN due_date >= ?2 AND due_date <= ?3 THEN 1 ELSE 0 END), 0)
         FROM tasks
         WHERE workspace_id = ?1 AND due_date IS NOT NULL
           AND status NOT IN ('completed', 'cancelled')",
        params![workspace_id, today, soon],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    summary.overdue = overdue;
    summary.due_soon = due_soon;
    Ok(summary)
}

/// Tasks created, updated or completed since `since`.
pub fn activity_since(conn: &Connection, workspace_id: &str, since: DateTime<Utc>) -> Result<(u32, u32, u32)> {
    Ok(conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN created_at >= ?2 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN updated_at >= ?2 AND created_at < ?2 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN updated_at >= ?2 AND status = 'completed' THEN 1 ELSE 0 END), 0)
         FROM tasks WHERE workspace_id = ?1",
        params![workspace_id, since],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?)
}

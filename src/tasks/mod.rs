//! Business logic over the data layer
//!
//! [`TaskManager`] is a per-request view of one workspace: it carries the
//! workspace id and the caller's language and enforces the invariants that
//! span tables (state machine, hierarchy, dependency gate, active
//! pointers). Every mutating method runs as one write transaction.
//!
//! Methods are synchronous; async callers run them on the blocking pool.

pub mod bulk;
pub mod context;
pub mod filter;
pub mod hierarchy;
pub mod nlp;
pub mod search;
pub mod transfer;

use crate::error::{GorevError, Result};
use crate::i18n::{self, Lang};
use crate::store::{
    context as ctx_store, dependencies, projects, tags, tasks as task_store, templates,
    Database, Dependency, DependencyKind, Priority, Project, Summary, Task, TaskStatus, Template,
};
use chrono::{NaiveDate, Utc};
use regex::{Captures, Regex};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

pub use filter::{ListParams, DEFAULT_LIMIT, MAX_LIMIT};
pub use crate::store::tasks::SortOrder;

/// A page of results plus the unpaged total
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u32,
    pub limit: u32,
    pub offset: u32,
}

/// A dependency edge with the other end resolved
#[derive(Debug, Clone, Serialize)]
pub struct LinkedTask {
    pub dependency: Dependency,
    pub task_id: String,
    pub title: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    pub task: Task,
    pub project: Option<Project>,
    pub parent: Option<Task>,
    pub subtasks: Vec<Task>,
    /// What this task waits on
    pub dependencies: Vec<LinkedTask>,
    /// What waits on this task
    pub dependents: Vec<LinkedTask>,
}

/// Partial edit; `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default)]
pub struct TaskEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub project_id: Option<Option<String>>,
    pub due_date: Option<Option<NaiveDate>>,
}

impl TaskEdit {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.project_id.is_none()
            && self.due_date.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedTask {
    pub task: Task,
    /// Descendants removed with it
    pub removed_subtasks: usize,
}

/// Result of a status update; `changed` is false for same-status calls
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub task: Task,
    pub from: TaskStatus,
    pub changed: bool,
}

/// Parse a `YYYY-MM-DD` calendar day.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[derive(Clone)]
pub struct TaskManager {
    db: Arc<Database>,
    workspace_id: String,
    lang: Lang,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("workspace_id", &self.workspace_id)
            .field("lang", &self.lang)
            .finish()
    }
}

impl TaskManager {
    pub fn new(db: Arc<Database>, workspace_id: impl Into<String>, lang: Lang) -> Self {
        Self {
            db,
            workspace_id: workspace_id.into(),
            lang,
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn lang(&self) -> Lang {
        self.lang
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub(crate) fn t(&self, key: &str) -> String {
        i18n::t(self.lang, key)
    }

    pub(crate) fn tf(&self, key: &str, args: &[(&str, &str)]) -> String {
        i18n::tf(self.lang, key, args)
    }

    fn ws(&self) -> &str {
        &self.workspace_id
    }

    // ========================================================================
    // Projects
    // ========================================================================

    pub fn create_project(&self, name: &str, definition: &str) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(GorevError::Validation(
                self.tf("error.required_param", &[("Param", "name")]),
            ));
        }
        let project = self
            .db
            .write(|tx| projects::insert(tx, self.ws(), &projects::NewProject::new(name, definition)))?;
        info!(workspace_id = %self.ws(), project_id = %project.id, "Project created");
        Ok(project)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        self.db.read(|conn| projects::list(conn, self.ws()))
    }

    pub fn get_project(&self, id: &str) -> Result<Project> {
        self.db.read(|conn| projects::get(conn, self.ws(), id))
    }

    /// Delete a project with all its tasks.
    pub fn delete_project(&self, id: &str) -> Result<Project> {
        let project = self.db.write(|tx| {
            let project = projects::get(tx, self.ws(), id)?;
            projects::delete(tx, self.ws(), id)?;
            Ok(project)
        })?;
        info!(workspace_id = %self.ws(), project_id = %id, tasks = project.task_count, "Project deleted");
        Ok(project)
    }

    pub fn project_tasks(&self, project_id: &str, limit: u32, offset: u32) -> Result<Page<Task>> {
        self.db.read(|conn| {
            projects::get(conn, self.ws(), project_id)?;
            let query = task_store::TaskQuery {
                project_id: Some(project_id.to_string()),
                limit: Some(limit),
                offset,
                ..Default::default()
            };
            Ok(Page {
                items: task_store::list(conn, self.ws(), &query)?,
                total: task_store::count(conn, self.ws(), &query)?,
                limit,
                offset,
            })
        })
    }

    pub fn set_active_project(&self, id: &str) -> Result<Project> {
        self.db.write(|tx| {
            let project = projects::get(tx, self.ws(), id)?;
            ctx_store::set_active_project(tx, self.ws(), id)?;
            Ok(project)
        })
    }

    pub fn active_project(&self) -> Result<Option<Project>> {
        self.db.read(|conn| match ctx_store::active_project(conn, self.ws())? {
            Some(id) => projects::find(conn, self.ws(), &id),
            None => Ok(None),
        })
    }

    /// Returns whether a pointer was set.
    pub fn clear_active_project(&self) -> Result<bool> {
        self.db.write(|tx| ctx_store::clear_active_project(tx, self.ws()))
    }

    // ========================================================================
    // Tasks: read
    // ========================================================================

    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.db.read(|conn| task_store::get(conn, self.ws(), id))
    }

    pub fn task_detail(&self, id: &str) -> Result<TaskDetail> {
        self.db.read(|conn| {
            let task = task_store::get(conn, self.ws(), id)?;
            let project = match &task.project_id {
                Some(pid) => projects::find(conn, self.ws(), pid)?,
                None => None,
            };
            let parent = match &task.parent_id {
                Some(pid) => task_store::find(conn, self.ws(), pid)?,
                None => None,
            };
            let subtasks = task_store::children(conn, self.ws(), id)?;
            let dependencies = self.link(conn, dependencies::outgoing(conn, self.ws(), id)?, |d| &d.target_id)?;
            let dependents = self.link(conn, dependencies::incoming(conn, self.ws(), id)?, |d| &d.source_id)?;
            Ok(TaskDetail {
                task,
                project,
                parent,
                subtasks,
                dependencies,
                dependents,
            })
        })
    }

    fn link(
        &self,
        conn: &Connection,
        edges: Vec<Dependency>,
        other_end: impl Fn(&Dependency) -> &String,
    ) -> Result<Vec<LinkedTask>> {
        let mut linked = Vec::with_capacity(edges.len());
        for dependency in edges {
            if let Some(other) = task_store::find(conn, self.ws(), other_end(&dependency))? {
                linked.push(LinkedTask {
                    task_id: other.id,
                    title: other.title,
                    status: other.status,
                    dependency,
                });
            }
        }
        Ok(linked)
    }

    /// List with the filter/sort grammar.
    pub fn list_tasks(&self, params: &ListParams) -> Result<Page<Task>> {
        self.db.read(|conn| {
            let active = if params.all_projects {
                None
            } else {
                ctx_store::active_project(conn, self.ws())?
            };
            let query = params.to_query(active, today());
            Ok(Page {
                items: task_store::list(conn, self.ws(), &query)?,
                total: task_store::count(conn, self.ws(), &query)?,
                limit: params.limit,
                offset: params.offset,
            })
        })
    }

    pub fn subtasks(&self, id: &str) -> Result<Vec<Task>> {
        self.db.read(|conn| {
            task_store::get(conn, self.ws(), id)?;
            task_store::children(conn, self.ws(), id)
        })
    }

    pub fn summary(&self) -> Result<Summary> {
        self.db.read(|conn| task_store::summary(conn, self.ws(), today()))
    }

    // ========================================================================
    // Tasks: state machine
    // ========================================================================

    /// Check a transition against the state machine, the subtask rule and
    /// (unless `force`) the dependency gate.
    pub(crate) fn check_transition(
        &self,
        conn: &Connection,
        task: &Task,
        to: TaskStatus,
        force: bool,
    ) -> Result<()> {
        if !task.status.can_transition_to(to) {
            return Err(GorevError::PreconditionFailed(self.tf(
                "error.invalid_transition",
                &[("From", task.status.as_str()), ("To", to.as_str())],
            )));
        }
        if to == TaskStatus::InProgress && !force && task.unfulfilled_dependency_count > 0 {
            return Err(GorevError::PreconditionFailed(self.tf(
                "error.dependency_gate",
                &[("Count", &task.unfulfilled_dependency_count.to_string())],
            )));
        }
        if to == TaskStatus::Completed {
            let open = task_store::children(conn, self.ws(), &task.id)?
                .iter()
                .filter(|child| !child.status.is_closed())
                .count();
            if open > 0 {
                return Err(GorevError::PreconditionFailed(
                    self.tf("error.subtasks_open", &[("Count", &open.to_string())]),
                ));
            }
        }
        Ok(())
    }

    /// Apply a checked transition inside an open transaction and log it.
    pub(crate) fn transition_in(
        &self,
        conn: &Connection,
        id: &str,
        to: TaskStatus,
        force: bool,
    ) -> Result<StatusChange> {
        let task = task_store::get(conn, self.ws(), id)?;
        let from = task.status;
        if from == to {
            return Ok(StatusChange {
                task,
                from,
                changed: false,
            });
        }
        self.check_transition(conn, &task, to, force)?;
        let task = task_store::apply_patch(
            conn,
            self.ws(),
            id,
            &task_store::TaskPatch {
                status: Some(to),
                ..Default::default()
            },
        )?;
        ctx_store::record_interaction(
            conn,
            self.ws(),
            id,
            "status_changed",
            Some(&serde_json::json!({"from": from.as_str(), "to": to.as_str()})),
        )?;
        Ok(StatusChange {
            task,
            from,
            changed: true,
        })
    }

    /// Status update with the dependency gate enforced.
    pub fn update_status(&self, id: &str, to: TaskStatus) -> Result<StatusChange> {
        let change = self.db.write(|tx| self.transition_in(tx, id, to, false))?;
        if change.changed {
            debug!(task_id = %id, from = change.from.as_str(), to = to.as_str(), "Task status changed");
        }
        Ok(change)
    }

    // ========================================================================
    // Tasks: create / edit / delete
    // ========================================================================

    /// Instantiate a template into a new pending task.
    ///
    /// Field defaults apply before the required check; select values are
    /// stored as given. Reserved keys: `priority`, `due_date`, `tags`,
    /// `project_id`.
    pub fn create_from_template(&self, template_id: &str, values: &HashMap<String, String>) -> Result<Task> {
        let task = self.db.write(|tx| {
            let template = templates::get(tx, self.ws(), template_id)?;
            let values = self.resolve_template_values(&template, values)?;

            let project_id = match values.get("project_id").filter(|v| !v.trim().is_empty()) {
                Some(pid) => projects::get(tx, self.ws(), pid)?.id,
                None => ctx_store::active_project(tx, self.ws())?
                    .ok_or_else(|| GorevError::PreconditionFailed(self.t("error.no_active_project")))?,
            };

            let priority = match values.get("priority").map(|p| p.trim()) {
                Some(raw) if !raw.is_empty() => Priority::parse(raw).ok_or_else(|| {
                    GorevError::Validation(self.tf(
                        "error.invalid_enum",
                        &[("Param", "priority"), ("Values", &Priority::names().join(", "))],
                    ))
                })?,
                _ => Priority::Medium,
            };

            let new = task_store::NewTask {
                title: render(&template.default_title, &values),
                description: render(&template.description_template, &values),
                priority: Some(priority),
                project_id: Some(project_id),
                parent_id: None,
                due_date: values.get("due_date").and_then(|d| parse_date(d)),
                tags: values.get("tags").map(|t| tags::parse_list(t)).unwrap_or_default(),
            };
            let task = task_store::insert(tx, self.ws(), &new)?;
            ctx_store::record_interaction(
                tx,
                self.ws(),
                &task.id,
                "created",
                Some(&serde_json::json!({"template": template.alias.as_deref().unwrap_or(&template.id)})),
            )?;
            Ok(task)
        })?;
        info!(workspace_id = %self.ws(), task_id = %task.id, template = %template_id, "Task created from template");
        Ok(task)
    }

    fn resolve_template_values(
        &self,
        template: &Template,
        supplied: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>> {
        let mut values = supplied.clone();
        for field in &template.fields {
            if let Some(default) = &field.default {
                values.entry(field.name.clone()).or_insert_with(|| default.clone());
            }
        }
        let missing: Vec<&str> = template
            .fields
            .iter()
            .filter(|f| f.required)
            .filter(|f| values.get(&f.name).map_or(true, |v| v.trim().is_empty()))
            .map(|f| f.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(GorevError::Validation(
                self.tf("error.required_fields", &[("Fields", &missing.join(", "))]),
            ));
        }
        Ok(values)
    }

    pub fn list_templates(&self, category: Option<&str>) -> Result<Vec<Template>> {
        self.db.read(|conn| templates::list(conn, self.ws(), category))
    }

    /// Partial edit. Changing the project of a root task moves its subtree.
    pub fn edit_task(&self, id: &str, edit: &TaskEdit) -> Result<Task> {
        self.db.write(|tx| self.edit_in(tx, id, edit))
    }

    /// Field edit followed by a gated status change, committed together.
    pub fn update_task(&self, id: &str, edit: &TaskEdit, status: Option<TaskStatus>) -> Result<Task> {
        if edit.is_empty() && status.is_none() {
            return Err(GorevError::Validation(self.t("error.nothing_to_update")));
        }
        self.db.write(|tx| {
            let mut task = if edit.is_empty() {
                task_store::get(tx, self.ws(), id)?
            } else {
                self.edit_in(tx, id, edit)?
            };
            if let Some(status) = status {
                task = self.transition_in(tx, id, status, false)?.task;
            }
            Ok(task)
        })
    }

    pub(crate) fn edit_in(&self, tx: &Connection, id: &str, edit: &TaskEdit) -> Result<Task> {
        let current = task_store::get(tx, self.ws(), id)?;

        let mut moved_project = None;
        if let Some(project_id) = &edit.project_id {
            if *project_id != current.project_id {
                if current.parent_id.is_some() {
                    return Err(GorevError::PreconditionFailed(self.t("error.subtask_project_move")));
                }
                if let Some(pid) = project_id {
                    projects::get(tx, self.ws(), pid)?;
                }
                moved_project = Some(project_id.clone());
            }
        }

        let patch = task_store::TaskPatch {
            title: edit.title.clone(),
            description: edit.description.clone(),
            priority: edit.priority,
            project_id: edit.project_id.clone(),
            due_date: edit.due_date,
            ..Default::default()
        };
        if patch.is_empty() {
            return Err(GorevError::Validation(self.t("error.nothing_to_update")));
        }
        let task = task_store::apply_patch(tx, self.ws(), id, &patch)?;
        if let Some(project_id) = moved_project {
            let moved = task_store::set_subtree_project(tx, self.ws(), id, project_id.as_deref())?;
            debug!(task_id = %id, moved, "Moved subtree with task");
        }
        ctx_store::record_interaction(tx, self.ws(), id, "edited", None)?;
        Ok(task)
    }

    /// Delete a task and its subtree. `confirm` is mandatory.
    pub fn delete_task(&self, id: &str, confirm: bool) -> Result<DeletedTask> {
        if !confirm {
            return Err(GorevError::Validation(self.t("error.confirm_required")));
        }
        let deleted = self.db.write(|tx| {
            let task = task_store::get(tx, self.ws(), id)?;
            let removed_subtasks = task_store::descendants(tx, self.ws(), id)?.len();
            task_store::delete(tx, self.ws(), id)?;
            Ok(DeletedTask {
                task,
                removed_subtasks,
            })
        })?;
        info!(
            workspace_id = %self.ws(),
            task_id = %id,
            removed_subtasks = deleted.removed_subtasks,
            "Task deleted"
        );
        Ok(deleted)
    }

    // ========================================================================
    // Dependencies
    // ========================================================================

    /// Add an edge; a missing target is reported before a missing source.
    pub fn add_dependency(&self, source_id: &str, target_id: &str, kind: DependencyKind) -> Result<(Dependency, Task)> {
        if source_id == target_id {
            return Err(GorevError::Validation(self.t("error.self_dependency")));
        }
        self.db.write(|tx| {
            if !task_store::exists(tx, self.ws(), target_id)? {
                return Err(GorevError::not_found("task", target_id));
            }
            if !task_store::exists(tx, self.ws(), source_id)? {
                return Err(GorevError::not_found("task", source_id));
            }
            let dependency = dependencies::insert(tx, self.ws(), source_id, target_id, kind)?;
            // Counts are derived on read, so the refreshed source reflects the new edge
            let source = task_store::get(tx, self.ws(), source_id)?;
            Ok((dependency, source))
        })
    }
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("static regex"));

/// Substitute `{{name}}` placeholders in one pass; unknown placeholders stay
/// verbatim and substituted values are never expanded again.
pub fn render(template: &str, values: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match values.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn manager() -> TaskManager {
        TaskManager::new(Arc::new(Database::open_in_memory().unwrap()), "ws", Lang::En)
    }

    pub fn project(tm: &TaskManager, name: &str) -> Project {
        let project = tm.create_project(name, "").unwrap();
        tm.set_active_project(&project.id).unwrap();
        project
    }

    /// Create a task through the `feature` template with the given title.
    pub fn task(tm: &TaskManager, title: &str) -> Task {
        let values: HashMap<String, String> = [
            ("title", title),
            ("description", "d"),
            ("purpose", "p"),
            ("criteria", "c"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        tm.create_from_template("feature", &values).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_template_requires_project_and_fields() {
        let tm = manager();
        let values: HashMap<String, String> = [("title".to_string(), "X".to_string())].into();
        let err = tm.create_from_template("feature", &values).unwrap_err();
        // Missing fields are checked before the project
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains("purpose"));

        let mut full = values.clone();
        for key in ["description", "purpose", "criteria"] {
            full.insert(key.into(), "v".into());
        }
        let err = tm.create_from_template("feature", &full).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");

        project(&tm, "P");
        let task = tm.create_from_template("feature", &full).unwrap();
        assert_eq!(task.title, "X");
        assert_eq!(task.tags, vec!["feature"]);
        assert_eq!(task.priority, Priority::Medium);
    }

    #[test]
    fn test_template_reserved_keys_and_unvalidated_select() {
        let tm = manager();
        project(&tm, "P");
        let values: HashMap<String, String> = [
            ("title", "Crash"),
            ("description", "d"),
            ("module", "auth"),
            ("environment", "moonbase"),
            ("steps", "s"),
            ("expected", "e"),
            ("actual", "a"),
            ("priority", "high"),
            ("due_date", "not-a-date"),
            ("tags", "bug, urgent,bug"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let task = tm.create_from_template("bug", &values).unwrap();
        assert_eq!(task.title, "[auth] Crash");
        assert_eq!(task.priority, Priority::High);
        assert!(task.due_date.is_none());
        assert_eq!(task.tags, vec!["bug", "urgent"]);
        // Select values outside the options are stored verbatim
        assert!(task.description.contains("moonbase"));
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let values: HashMap<String, String> = [("a".to_string(), "1".to_string())].into();
        assert_eq!(render("{{a}}-{{b}}", &values), "1-{{b}}");
    }

    #[test]
    fn test_render_does_not_expand_substituted_values() {
        let values: HashMap<String, String> = [
            ("a".to_string(), "{{b}}".to_string()),
            ("b".to_string(), "{{a}}".to_string()),
        ]
        .into();
        assert_eq!(render("{{a}}|{{b}}", &values), "{{b}}|{{a}}");
    }

    #[test]
    fn test_update_task_is_all_or_nothing() {
        let tm = manager();
        project(&tm, "P");
        let a = task(&tm, "A");

        let edit = TaskEdit {
            title: Some("Changed".into()),
            ..Default::default()
        };
        let err = tm.update_task(&a.id, &edit, Some(TaskStatus::Completed)).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
        let unchanged = tm.get_task(&a.id).unwrap();
        assert_eq!(unchanged.title, "A");
        assert_eq!(unchanged.status, TaskStatus::Pending);

        let updated = tm.update_task(&a.id, &edit, Some(TaskStatus::InProgress)).unwrap();
        assert_eq!(updated.title, "Changed");
        assert_eq!(updated.status, TaskStatus::InProgress);

        let err = tm.update_task(&a.id, &TaskEdit::default(), None).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_state_machine_and_gate() {
        let tm = manager();
        project(&tm, "P");
        let a = task(&tm, "A");
        let b = task(&tm, "B");

        let err = tm.update_status(&a.id, TaskStatus::Completed).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");

        tm.add_dependency(&a.id, &b.id, DependencyKind::Blocker).unwrap();
        let err = tm.update_status(&a.id, TaskStatus::InProgress).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");

        tm.update_status(&b.id, TaskStatus::InProgress).unwrap();
        tm.update_status(&b.id, TaskStatus::Completed).unwrap();
        let change = tm.update_status(&a.id, TaskStatus::InProgress).unwrap();
        assert!(change.changed);
        assert_eq!(change.task.unfulfilled_dependency_count, 0);

        let again = tm.update_status(&a.id, TaskStatus::InProgress).unwrap();
        assert!(!again.changed);
    }

    #[test]
    fn test_completing_parent_requires_closed_subtasks() {
        let tm = manager();
        project(&tm, "P");
        let parent = task(&tm, "Parent");
        let child = tm
            .create_subtask(&parent.id, &hierarchy::NewSubtask::titled("Child"))
            .unwrap();
        tm.update_status(&parent.id, TaskStatus::InProgress).unwrap();

        let err = tm.update_status(&parent.id, TaskStatus::Completed).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");

        tm.update_status(&child.id, TaskStatus::Cancelled).unwrap();
        tm.update_status(&parent.id, TaskStatus::Completed).unwrap();
    }

    #[test]
    fn test_dependency_errors() {
        let tm = manager();
        project(&tm, "P");
        let a = task(&tm, "A");

        assert_eq!(
            tm.add_dependency(&a.id, &a.id, DependencyKind::Blocker).unwrap_err().kind(),
            "validation"
        );
        match tm.add_dependency("missing-source", "missing-target", DependencyKind::Blocker) {
            Err(GorevError::NotFound { id, .. }) => assert_eq!(id, "missing-target"),
            other => panic!("unexpected: {other:?}"),
        }

        let b = task(&tm, "B");
        let (_, source) = tm.add_dependency(&a.id, &b.id, DependencyKind::DependsOn).unwrap();
        assert_eq!(source.unfulfilled_dependency_count, 1);
        assert_eq!(
            tm.add_dependency(&a.id, &b.id, DependencyKind::DependsOn).unwrap_err().kind(),
            "conflict"
        );
    }

    #[test]
    fn test_delete_requires_confirm_and_round_trips() {
        let tm = manager();
        project(&tm, "P");
        let before: Vec<String> = tm.db().read(|c| task_store::all(c, "ws")).unwrap().into_iter().map(|t| t.id).collect();

        let t = task(&tm, "Temp");
        assert_eq!(tm.delete_task(&t.id, false).unwrap_err().kind(), "validation");
        tm.delete_task(&t.id, true).unwrap();

        let after: Vec<String> = tm.db().read(|c| task_store::all(c, "ws")).unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_edit_moves_subtree_between_projects() {
        let tm = manager();
        project(&tm, "P1");
        let root = task(&tm, "Root");
        let child = tm.create_subtask(&root.id, &hierarchy::NewSubtask::titled("Child")).unwrap();
        let p2 = tm.create_project("P2", "").unwrap();

        let err = tm
            .edit_task(
                &child.id,
                &TaskEdit {
                    project_id: Some(Some(p2.id.clone())),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");

        tm.edit_task(
            &root.id,
            &TaskEdit {
                project_id: Some(Some(p2.id.clone())),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(tm.get_task(&child.id).unwrap().project_id, Some(p2.id));
    }

    #[test]
    fn test_delete_project_cascades_and_clears_active_task() {
        let tm = manager();
        let p = project(&tm, "P");
        let t = task(&tm, "T");
        tm.set_active_task(&t.id).unwrap();

        tm.delete_project(&p.id).unwrap();
        assert!(tm.get_active_task().unwrap().is_none());
        assert!(tm.active_project().unwrap().is_none());
        assert_eq!(tm.get_task(&t.id).unwrap_err().kind(), "not_found");
    }
}

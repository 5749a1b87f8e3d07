//! Parent/child operations and hierarchy reports
//!
//! The parent relation is kept acyclic: every re-parent walks the ancestor
//! chain of the proposed parent before writing.

use super::TaskManager;
use crate::error::{GorevError, Result};
use crate::store::{context as ctx_store, tasks as task_store, Priority, Task, TaskStatus};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct NewSubtask {
    pub title: String,
    pub description: String,
    pub priority: Option<Priority>,
    pub due_date: Option<NaiveDate>,
    pub tags: Vec<String>,
}

impl NewSubtask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Minimal view of an ancestor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRef {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
}

impl From<&Task> for TaskRef {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            status: task.status,
        }
    }
}

/// A task with its children, built from a flat list
#[derive(Debug, Clone, Serialize)]
pub struct TaskNode {
    pub task: Task,
    pub children: Vec<TaskNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HierarchyReport {
    pub task: Task,
    /// Root first, direct parent last
    pub ancestors: Vec<TaskRef>,
    pub direct_subtasks: usize,
    pub total_subtasks: usize,
    pub by_status: BTreeMap<String, usize>,
    /// completed / total, rounded; 0 without subtasks
    pub progress_percent: u32,
    pub subtree: Vec<TaskNode>,
}

/// Arrange a flat list into trees. Tasks whose parent is absent from the
/// list become roots; input order is kept among siblings.
pub fn build_forest(tasks: Vec<Task>) -> Vec<TaskNode> {
    let ids: HashSet<String> = tasks.iter().map(|t| t.id.clone()).collect();
    let mut children: HashMap<String, Vec<Task>> = HashMap::new();
    let mut roots = Vec::new();
    for task in tasks {
        match task.parent_id.clone().filter(|p| ids.contains(p)) {
            Some(parent) => children.entry(parent).or_default().push(task),
            None => roots.push(task),
        }
    }

    fn attach(task: Task, children: &mut HashMap<String, Vec<Task>>) -> TaskNode {
        let kids = children.remove(&task.id).unwrap_or_default();
        TaskNode {
            children: kids.into_iter().map(|k| attach(k, children)).collect(),
            task,
        }
    }

    roots.into_iter().map(|r| attach(r, &mut children)).collect()
}

pub fn progress_percent(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((completed as f64 * 100.0) / total as f64).round() as u32
}

/// Ancestor chain of `id`, direct parent first. Stops at a repeated id.
fn ancestors(conn: &Connection, workspace_id: &str, id: &str) -> Result<Vec<String>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([id.to_string()]);
    let mut cursor = task_store::parent_of(conn, workspace_id, id)?;
    while let Some(parent) = cursor {
        if !seen.insert(parent.clone()) {
            break;
        }
        cursor = task_store::parent_of(conn, workspace_id, &parent)?;
        chain.push(parent);
    }
    Ok(chain)
}

impl TaskManager {
    /// Create a pending child of `parent_id` in the parent's project.
    pub fn create_subtask(&self, parent_id: &str, new: &NewSubtask) -> Result<Task> {
        if new.title.trim().is_empty() {
            return Err(GorevError::Validation(
                self.tf("error.required_param", &[("Param", "title")]),
            ));
        }
        let task = self.db().write(|tx| {
            let parent = task_store::get(tx, self.workspace_id(), parent_id)?;
            if parent.status == TaskStatus::Cancelled {
                return Err(GorevError::PreconditionFailed(self.t("error.parent_cancelled")));
            }
            let task = task_store::insert(
                tx,
                self.workspace_id(),
                &task_store::NewTask {
                    title: new.title.clone(),
                    description: new.description.clone(),
                    priority: new.priority,
                    project_id: parent.project_id.clone(),
                    parent_id: Some(parent.id.clone()),
                    due_date: new.due_date,
                    tags: new.tags.clone(),
                },
            )?;
            ctx_store::record_interaction(
                tx,
                self.workspace_id(),
                &task.id,
                "created",
                Some(&serde_json::json!({"parent_id": parent.id})),
            )?;
            Ok(task)
        })?;
        info!(workspace_id = %self.workspace_id(), task_id = %task.id, parent_id = %parent_id, "Subtask created");
        Ok(task)
    }

    /// Move `task_id` under `new_parent` (`None` makes it a root).
    ///
    /// Re-parenting to the current parent is a no-op.
    pub fn change_parent(&self, task_id: &str, new_parent: Option<&str>) -> Result<Task> {
        self.db().write(|tx| {
            let ws = self.workspace_id();
            let task = task_store::get(tx, ws, task_id)?;
            if task.parent_id.as_deref() == new_parent {
                return Ok(task);
            }

            if let Some(parent_id) = new_parent {
                if parent_id == task_id {
                    return Err(GorevError::PreconditionFailed(self.t("error.cycle_detected")));
                }
                let parent = task_store::get(tx, ws, parent_id)?;
                if parent.status == TaskStatus::Cancelled {
                    return Err(GorevError::PreconditionFailed(self.t("error.parent_cancelled")));
                }
                if parent.project_id != task.project_id {
                    return Err(GorevError::PreconditionFailed(self.t("error.cross_project_parent")));
                }
                if ancestors(tx, ws, parent_id)?.iter().any(|a| a == task_id) {
                    return Err(GorevError::PreconditionFailed(self.t("error.cycle_detected")));
                }
            }

            let task = task_store::apply_patch(
                tx,
                ws,
                task_id,
                &task_store::TaskPatch {
                    parent_id: Some(new_parent.map(str::to_string)),
                    ..Default::default()
                },
            )?;
            ctx_store::record_interaction(
                tx,
                ws,
                task_id,
                "parent_changed",
                Some(&serde_json::json!({"parent_id": new_parent})),
            )?;
            Ok(task)
        })
    }

    pub fn hierarchy(&self, task_id: &str) -> Result<HierarchyReport> {
        self.db().read(|conn| {
            let ws = self.workspace_id();
            let task = task_store::get(conn, ws, task_id)?;

            let mut chain = Vec::new();
            for id in ancestors(conn, ws, task_id)?.into_iter().rev() {
                if let Some(ancestor) = task_store::find(conn, ws, &id)? {
                    chain.push(TaskRef::from(&ancestor));
                }
            }

            let descendants = task_store::descendants(conn, ws, task_id)?;
            let direct_subtasks = descendants
                .iter()
                .filter(|t| t.parent_id.as_deref() == Some(task_id))
                .count();
            let mut by_status: BTreeMap<String, usize> = TaskStatus::ALL
                .iter()
                .map(|s| (s.as_str().to_string(), 0))
                .collect();
            for t in &descendants {
                *by_status.entry(t.status.as_str().to_string()).or_default() += 1;
            }
            let completed = by_status.get(TaskStatus::Completed.as_str()).copied().unwrap_or(0);

            Ok(HierarchyReport {
                ancestors: chain,
                direct_subtasks,
                total_subtasks: descendants.len(),
                progress_percent: progress_percent(completed, descendants.len()),
                by_status,
                subtree: build_forest(descendants),
                task,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn chain(tm: &TaskManager) -> (Task, Task, Task) {
        project(tm, "P");
        let a = task(tm, "A");
        let b = tm.create_subtask(&a.id, &NewSubtask::titled("B")).unwrap();
        let c = tm.create_subtask(&b.id, &NewSubtask::titled("C")).unwrap();
        (a, b, c)
    }

    #[test]
    fn test_cycle_is_rejected_and_hierarchy_unchanged() {
        let tm = manager();
        let (a, b, c) = chain(&tm);

        let err = tm.change_parent(&a.id, Some(&c.id)).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
        assert!(err.to_string().to_lowercase().contains("cycle"));

        assert_eq!(tm.get_task(&a.id).unwrap().parent_id, None);
        assert_eq!(tm.get_task(&b.id).unwrap().parent_id, Some(a.id.clone()));
        assert_eq!(tm.get_task(&c.id).unwrap().parent_id, Some(b.id.clone()));

        let err = tm.change_parent(&a.id, Some(&a.id)).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
    }

    #[test]
    fn test_change_parent_to_current_is_noop() {
        let tm = manager();
        let (a, b, _) = chain(&tm);
        let before = tm.get_task(&b.id).unwrap();
        let after = tm.change_parent(&b.id, Some(&a.id)).unwrap();
        assert_eq!(before.updated_at, after.updated_at);

        let root = tm.change_parent(&b.id, None).unwrap();
        assert!(root.parent_id.is_none());
    }

    #[test]
    fn test_subtask_rules() {
        let tm = manager();
        project(&tm, "P");
        let parent = task(&tm, "Parent");
        tm.update_status(&parent.id, TaskStatus::Cancelled).unwrap();
        let err = tm
            .create_subtask(&parent.id, &NewSubtask::titled("Child"))
            .unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");

        let err = tm.create_subtask("missing", &NewSubtask::titled("Child")).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_cross_project_parent_rejected() {
        let tm = manager();
        project(&tm, "P1");
        let a = task(&tm, "A");
        project(&tm, "P2");
        let b = task(&tm, "B");
        let err = tm.change_parent(&b.id, Some(&a.id)).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
    }

    #[test]
    fn test_hierarchy_report() {
        let tm = manager();
        let (a, b, c) = chain(&tm);
        tm.update_status(&c.id, TaskStatus::InProgress).unwrap();
        tm.update_status(&c.id, TaskStatus::Completed).unwrap();
        tm.create_subtask(&a.id, &NewSubtask::titled("D")).unwrap();

        let report = tm.hierarchy(&a.id).unwrap();
        assert_eq!(report.total_subtasks, 3);
        assert_eq!(report.direct_subtasks, 2);
        assert_eq!(report.by_status["completed"], 1);
        assert_eq!(report.progress_percent, 33);
        assert_eq!(report.subtree.len(), 2);

        let report = tm.hierarchy(&c.id).unwrap();
        let path: Vec<_> = report.ancestors.iter().map(|r| r.id.clone()).collect();
        assert_eq!(path, vec![a.id.clone(), b.id.clone()]);
        assert_eq!(report.progress_percent, 0);
    }

    #[test]
    fn test_forest_from_flat_list() {
        let tm = manager();
        let (a, b, c) = chain(&tm);
        let flat = vec![
            tm.get_task(&c.id).unwrap(),
            tm.get_task(&a.id).unwrap(),
            tm.get_task(&b.id).unwrap(),
        ];
        let forest = build_forest(flat);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].task.id, a.id);
        assert_eq!(forest[0].children[0].task.id, b.id);
        assert_eq!(forest[0].children[0].children[0].task.id, c.id);
    }
}

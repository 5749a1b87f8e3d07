//! AI focus: active task, recent tasks and the session summary

use super::{today, StatusChange, TaskManager};
use crate::error::Result;
use crate::store::{
    context as ctx_store, projects, tasks as task_store, Priority, Project, Task, TaskStatus,
};
use chrono::{NaiveTime, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_RECENT_LIMIT: u32 = 10;
pub const MAX_RECENT_LIMIT: u32 = 50;

/// Cap on the priority and blocker lists of a summary
const SUMMARY_LIST_LIMIT: usize = 5;

/// Outcome of `set_active_task`
#[derive(Debug, Clone, Serialize)]
pub struct ActiveTaskChange {
    pub task: Task,
    /// False when the task was already active
    pub changed: bool,
    /// Set when the call moved the task from pending to in_progress
    pub auto_started: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionCounters {
    pub created: u32,
    pub updated: u32,
    pub completed: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextSummary {
    pub active_task: Option<Task>,
    pub working_project: Option<Project>,
    pub recent_tasks: Vec<Task>,
    pub session: SessionCounters,
    pub next_priorities: Vec<Task>,
    pub blockers: Vec<Task>,
}

impl TaskManager {
    /// Make `task_id` the AI focus.
    ///
    /// The pointer write, the interaction entry and the pending -> in_progress
    /// move commit together. The move is skipped (not an error) while the
    /// task has unfulfilled dependencies. Setting the already-active task
    /// changes nothing.
    pub fn set_active_task(&self, task_id: &str) -> Result<ActiveTaskChange> {
        self.db().write(|tx| {
            let ws = self.workspace_id();
            let task = task_store::get(tx, ws, task_id)?;
            if ctx_store::active_task(tx, ws)?.as_deref() == Some(task_id) {
                return Ok(ActiveTaskChange {
                    task,
                    changed: false,
                    auto_started: false,
                });
            }

            ctx_store::set_active_task(tx, ws, task_id)?;
            ctx_store::record_interaction(tx, ws, task_id, "set_active", None)?;

            let mut auto_started = false;
            let mut task = task;
            if task.status == TaskStatus::Pending && task.unfulfilled_dependency_count == 0 {
                let StatusChange { task: moved, changed, .. } =
                    self.transition_in(tx, task_id, TaskStatus::InProgress, false)?;
                auto_started = changed;
                task = moved;
            }
            debug!(workspace_id = %ws, task_id = %task_id, auto_started, "Active task set");
            Ok(ActiveTaskChange {
                task,
                changed: true,
                auto_started,
            })
        })
    }

    pub fn get_active_task(&self) -> Result<Option<Task>> {
        self.db().read(|conn| match ctx_store::active_task(conn, self.workspace_id())? {
            Some(id) => task_store::find(conn, self.workspace_id(), &id),
            None => Ok(None),
        })
    }

    pub fn clear_active_task(&self) -> Result<bool> {
        self.db()
            .write(|tx| ctx_store::clear_active_task(tx, self.workspace_id()))
    }

    /// Tasks by most recent interaction, one entry per task.
    pub fn recent_tasks(&self, limit: u32) -> Result<Vec<Task>> {
        let limit = limit.clamp(1, MAX_RECENT_LIMIT);
        self.db().read(|conn| {
            let mut tasks = Vec::new();
            for id in ctx_store::recent_task_ids(conn, self.workspace_id(), limit)? {
                if let Some(task) = task_store::find(conn, self.workspace_id(), &id)? {
                    tasks.push(task);
                }
            }
            Ok(tasks)
        })
    }

    pub fn context_summary(&self) -> Result<ContextSummary> {
        let recent_tasks = self.recent_tasks(DEFAULT_RECENT_LIMIT)?;
        self.db().read(|conn| {
            let ws = self.workspace_id();
            let active_task = match ctx_store::active_task(conn, ws)? {
                Some(id) => task_store::find(conn, ws, &id)?,
                None => None,
            };
            let working_project = match ctx_store::active_project(conn, ws)? {
                Some(id) => projects::find(conn, ws, &id)?,
                None => None,
            };

            let midnight = Utc.from_utc_datetime(&today().and_time(NaiveTime::MIN));
            let (created, updated, completed) = task_store::activity_since(conn, ws, midnight)?;

            let next_priorities = task_store::list(
                conn,
                ws,
                &task_store::TaskQuery {
                    statuses: vec![TaskStatus::Pending],
                    priorities: vec![Priority::High],
                    sort: task_store::SortOrder::DueDateAsc,
                    limit: Some(SUMMARY_LIST_LIMIT as u32),
                    ..Default::default()
                },
            )?;

            let open = task_store::TaskQuery {
                open_only: true,
                ..Default::default()
            };
            let blockers = task_store::list(conn, ws, &open)?
                .into_iter()
                .filter(|t| t.unfulfilled_dependency_count > 0)
                .take(SUMMARY_LIST_LIMIT)
                .collect();

            Ok(ContextSummary {
                active_task,
                working_project,
                recent_tasks,
                session: SessionCounters {
                    created,
                    updated,
                    completed,
                },
                next_priorities,
                blockers,
            })
        })
    }
}

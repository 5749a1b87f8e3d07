//! Multi-task operations
//!
//! Every id is processed in its own transaction; one failing id does not
//! roll back the others. Failures and no-op notes are collected per id.

use super::{TaskEdit, TaskManager};
use crate::error::{GorevError, Result};
use crate::store::{context as ctx_store, tags, tasks as task_store, TaskStatus};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagOperation {
    Add,
    Remove,
    Replace,
}

impl TagOperation {
    pub const NAMES: [&'static str; 3] = ["add", "remove", "replace"];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "add" => Some(Self::Add),
            "remove" => Some(Self::Remove),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
        }
    }
}

/// Field changes applied to every id of a bulk update
#[derive(Debug, Clone, Default)]
pub struct BulkUpdate {
    pub edit: TaskEdit,
    /// Goes through the state machine with the dependency gate
    pub status: Option<TaskStatus>,
}

impl BulkUpdate {
    fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.edit.title.is_none()
            && self.edit.description.is_none()
            && self.edit.priority.is_none()
            && self.edit.project_id.is_none()
            && self.edit.due_date.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionOptions {
    /// Skip the dependency gate (the state machine still applies)
    pub force: bool,
    /// Enforce the gate even when `force` is set
    pub check_dependencies: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkFailure {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkWarning {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkReport {
    pub processed: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<BulkFailure>,
    pub warnings: Vec<BulkWarning>,
    pub dry_run: bool,
}

impl BulkReport {
    fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    fn fail(&mut self, id: &str, err: &GorevError, manager: &TaskManager) {
        self.failed.push(BulkFailure {
            id: id.to_string(),
            error: err.localized(manager.lang()),
        });
    }

    fn warn(&mut self, id: &str, message: impl Into<String>) {
        self.warnings.push(BulkWarning {
            id: id.to_string(),
            message: message.into(),
        });
    }
}

impl TaskManager {
    fn require_ids(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Err(GorevError::Validation(
                self.tf("error.required_param", &[("Param", "ids")]),
            ));
        }
        Ok(())
    }

    pub fn bulk_update(&self, ids: &[String], update: &BulkUpdate, dry_run: bool) -> Result<BulkReport> {
        self.require_ids(ids)?;
        if update.is_empty() {
            return Err(GorevError::Validation(self.t("error.nothing_to_update")));
        }

        let mut report = BulkReport::new(dry_run);
        for id in ids {
            report.processed += 1;
            let outcome = self.db().write(|tx| {
                let task = task_store::get(tx, self.workspace_id(), id)?;
                if let Some(to) = update.status {
                    if task.status != to {
                        self.check_transition(tx, &task, to, false)?;
                    }
                }
                if dry_run {
                    return Ok(());
                }
                let has_edit = update.edit.title.is_some()
                    || update.edit.description.is_some()
                    || update.edit.priority.is_some()
                    || update.edit.project_id.is_some()
                    || update.edit.due_date.is_some();
                if has_edit {
                    self.edit_in(tx, id, &update.edit)?;
                }
                if let Some(to) = update.status {
                    self.transition_in(tx, id, to, false)?;
                }
                Ok(())
            });
            match outcome {
                Ok(()) if dry_run => report.warn(id, self.t("bulk.would_update")),
                Ok(()) => report.succeeded.push(id.clone()),
                Err(e) => report.fail(id, &e, self),
            }
        }
        info!(
            workspace_id = %self.workspace_id(),
            processed = report.processed,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Bulk update finished"
        );
        Ok(report)
    }

    pub fn bulk_transition(&self, ids: &[String], to: TaskStatus, options: TransitionOptions) -> Result<BulkReport> {
        self.require_ids(ids)?;
        let skip_gate = options.force && !options.check_dependencies;

        let mut report = BulkReport::new(options.dry_run);
        for id in ids {
            report.processed += 1;
            let outcome = self.db().write(|tx| {
                let task = task_store::get(tx, self.workspace_id(), id)?;
                if task.status == to {
                    return Ok(false);
                }
                self.check_transition(tx, &task, to, skip_gate)?;
                if options.dry_run {
                    return Ok(true);
                }
                self.transition_in(tx, id, to, skip_gate)?;
                Ok(true)
            });
            match outcome {
                Ok(false) => report.warn(id, self.tf("bulk.already_in_status", &[("Status", to.as_str())])),
                Ok(true) if options.dry_run => report.warn(id, self.t("bulk.would_update")),
                Ok(true) => report.succeeded.push(id.clone()),
                Err(e) => report.fail(id, &e, self),
            }
        }
        info!(
            workspace_id = %self.workspace_id(),
            to = to.as_str(),
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Bulk transition finished"
        );
        Ok(report)
    }

    pub fn bulk_tag(&self, ids: &[String], operation: TagOperation, names: &[String], dry_run: bool) -> Result<BulkReport> {
        self.require_ids(ids)?;
        let names = tags::normalize(names);
        if names.is_empty() && operation != TagOperation::Replace {
            return Err(GorevError::Validation(
                self.tf("error.required_param", &[("Param", "tags")]),
            ));
        }

        let mut report = BulkReport::new(dry_run);
        for id in ids {
            report.processed += 1;
            let outcome = self.db().write(|tx| {
                let ws = self.workspace_id();
                let task = task_store::get(tx, ws, id)?;
                let mut wanted: Vec<String> = match operation {
                    TagOperation::Add => {
                        let mut all = task.tags.clone();
                        all.extend(names.iter().cloned());
                        tags::normalize(&all)
                    }
                    TagOperation::Remove => task.tags.iter().filter(|t| !names.contains(t)).cloned().collect(),
                    TagOperation::Replace => names.clone(),
                };
                wanted.sort();
                if wanted == task.tags {
                    return Ok(false);
                }
                if dry_run {
                    return Ok(true);
                }
                match operation {
                    TagOperation::Add => tags::add(tx, ws, id, &names)?,
                    TagOperation::Remove => tags::remove(tx, ws, id, &names)?,
                    TagOperation::Replace => tags::replace(tx, ws, id, &names)?,
                }
                task_store::touch(tx, ws, id)?;
                ctx_store::record_interaction(
                    tx,
                    ws,
                    id,
                    "bulk_tag",
                    Some(&serde_json::json!({"operation": operation.as_str(), "tags": names})),
                )?;
                Ok(true)
            });
            match outcome {
                Ok(false) => report.warn(id, self.t("bulk.no_changes")),
                Ok(true) if dry_run => report.warn(id, self.t("bulk.would_update")),
                Ok(true) => report.succeeded.push(id.clone()),
                Err(e) => report.fail(id, &e, self),
            }
        }
        Ok(report)
    }
}

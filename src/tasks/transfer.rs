//! Workspace export and import
//!
//! The document is self-contained JSON. Import applies projects, tasks (parents
//! before children), dependencies and templates in one transaction, so a
//! failed import leaves the workspace untouched.

use super::TaskManager;
use crate::error::{GorevError, Result};
use crate::store::{
    dependencies, projects, tags, tasks as task_store, templates, Dependency, Project, Task,
    TaskStatus, Template,
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::info;

pub const FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTag {
    pub task_id: String,
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub task_tags: Vec<TaskTag>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Workspace templates only; builtins exist everywhere
    #[serde(default)]
    pub templates: Vec<Template>,
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub include_completed: bool,
    /// Restrict to these projects; empty means all
    pub project_ids: Vec<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_completed: true,
            project_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    #[default]
    Skip,
    Overwrite,
}

impl ConflictResolution {
    pub const NAMES: [&'static str; 2] = ["skip", "overwrite"];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "skip" => Some(Self::Skip),
            "overwrite" => Some(Self::Overwrite),
            _ => None,
        }
    }
}

/// An incoming record whose id already exists
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportConflict {
    pub entity: &'static str,
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub imported_projects: usize,
    pub imported_tasks: usize,
    pub imported_dependencies: usize,
    pub imported_templates: usize,
    pub skipped: usize,
    pub conflicts: Vec<ImportConflict>,
    pub warnings: Vec<String>,
    pub dry_run: bool,
}

/// Order tasks so every parent precedes its children. Tasks whose parent
/// is neither in the document nor in `known` come last and fail the
/// reference check on import.
fn parents_first(tasks: &[Task], known: &HashSet<String>) -> Vec<Task> {
    let mut placed: HashSet<String> = known.clone();
    let mut pending: Vec<&Task> = tasks.iter().collect();
    let mut ordered = Vec::with_capacity(tasks.len());
    loop {
        let before = pending.len();
        pending.retain(|task| {
            let ready = task.parent_id.as_ref().map_or(true, |p| placed.contains(p));
            if ready {
                placed.insert(task.id.clone());
                ordered.push((*task).clone());
            }
            !ready
        });
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }
    ordered.extend(pending.into_iter().cloned());
    ordered
}

impl TaskManager {
    pub fn export(&self, options: &ExportOptions) -> Result<ExportDocument> {
        self.db().read(|conn| {
            let ws = self.workspace_id();
            let wanted: HashSet<&str> = options.project_ids.iter().map(String::as_str).collect();

            let projects: Vec<Project> = projects::list(conn, ws)?
                .into_iter()
                .filter(|p| wanted.is_empty() || wanted.contains(p.id.as_str()))
                .collect();
            let project_ids: HashSet<&str> = projects.iter().map(|p| p.id.as_str()).collect();

            let mut tasks: Vec<Task> = task_store::all(conn, ws)?
                .into_iter()
                .filter(|t| options.include_completed || t.status != TaskStatus::Completed)
                .filter(|t| {
                    wanted.is_empty() || t.project_id.as_deref().is_some_and(|p| project_ids.contains(p))
                })
                .collect();
            // A child whose parent was filtered out becomes a root in the document
            let task_ids: HashSet<String> = tasks.iter().map(|t| t.id.clone()).collect();
            for task in &mut tasks {
                if task.parent_id.as_ref().is_some_and(|p| !task_ids.contains(p)) {
                    task.parent_id = None;
                }
            }

            let dependencies = dependencies::all(conn, ws)?
                .into_iter()
                .filter(|d| task_ids.contains(&d.source_id) && task_ids.contains(&d.target_id))
                .collect();

            let mut tag_names: Vec<String> = tasks.iter().flat_map(|t| t.tags.iter().cloned()).collect();
            tag_names.sort();
            tag_names.dedup();
            let task_tags = tasks
                .iter()
                .flat_map(|t| {
                    t.tags.iter().map(|tag| TaskTag {
                        task_id: t.id.clone(),
                        tag: tag.clone(),
                    })
                })
                .collect();

            Ok(ExportDocument {
                version: FORMAT_VERSION.to_string(),
                exported_at: Utc::now(),
                workspace_id: ws.to_string(),
                projects,
                tasks,
                tags: tag_names,
                task_tags,
                dependencies,
                templates: templates::custom(conn, ws)?,
            })
        })
    }

    pub fn import(
        &self,
        document: &ExportDocument,
        resolution: ConflictResolution,
        dry_run: bool,
    ) -> Result<ImportReport> {
        if document.version != FORMAT_VERSION {
            return Err(GorevError::Validation(self.tf(
                "error.unsupported_version",
                &[("Version", &document.version), ("Expected", FORMAT_VERSION)],
            )));
        }

        let report = self.db().write(|tx| {
            let mut report = ImportReport {
                dry_run,
                ..Default::default()
            };
            self.import_projects(tx, document, resolution, dry_run, &mut report)?;
            self.import_tasks(tx, document, resolution, dry_run, &mut report)?;
            self.import_dependencies(tx, document, dry_run, &mut report)?;
            self.import_templates(tx, document, dry_run, &mut report)?;
            Ok(report)
        })?;

        info!(
            workspace_id = %self.workspace_id(),
            projects = report.imported_projects,
            tasks = report.imported_tasks,
            skipped = report.skipped,
            dry_run,
            "Import finished"
        );
        Ok(report)
    }

    fn import_projects(
        &self,
        tx: &Connection,
        document: &ExportDocument,
        resolution: ConflictResolution,
        dry_run: bool,
        report: &mut ImportReport,
    ) -> Result<()> {
        let ws = self.workspace_id();
        for project in &document.projects {
            if projects::find(tx, ws, &project.id)?.is_some() {
                report.conflicts.push(ImportConflict {
                    entity: "project",
                    id: project.id.clone(),
                });
                match resolution {
                    ConflictResolution::Skip => report.skipped += 1,
                    ConflictResolution::Overwrite => {
                        if !dry_run {
                            projects::update(tx, ws, &project.id, Some(&project.name), Some(&project.definition))?;
                        }
                        report.imported_projects += 1;
                    }
                }
                continue;
            }
            if !dry_run {
                if let Err(e) = projects::insert_row(tx, ws, project) {
                    self.skip_on_conflict(e, "project", &project.id, report)?;
                    continue;
                }
            }
            report.imported_projects += 1;
        }
        Ok(())
    }

    fn import_tasks(
        &self,
        tx: &Connection,
        document: &ExportDocument,
        resolution: ConflictResolution,
        dry_run: bool,
        report: &mut ImportReport,
    ) -> Result<()> {
        let ws = self.workspace_id();
        let mut extra_tags: HashMap<&str, Vec<String>> = HashMap::new();
        for link in &document.task_tags {
            extra_tags.entry(link.task_id.as_str()).or_default().push(link.tag.clone());
        }

        let known_projects: HashSet<String> = document.projects.iter().map(|p| p.id.clone()).collect();
        let known_tasks: HashSet<String> = task_store::all(tx, ws)?.into_iter().map(|t| t.id).collect();

        for incoming in parents_first(&document.tasks, &known_tasks) {
            let mut task = incoming.clone();
            if let Some(extra) = extra_tags.get(task.id.as_str()) {
                let mut all = task.tags.clone();
                all.extend(extra.iter().cloned());
                task.tags = tags::normalize(&all);
            }

            let project_ok = match &task.project_id {
                Some(pid) => known_projects.contains(pid) || projects::find(tx, ws, pid)?.is_some(),
                None => true,
            };
            let parent_ok = match &task.parent_id {
                Some(pid) => {
                    known_tasks.contains(pid) || document.tasks.iter().any(|t| &t.id == pid)
                }
                None => true,
            };
            if !project_ok || !parent_ok {
                report.skipped += 1;
                report.warnings.push(self.tf("import.missing_reference", &[("Id", &task.id)]));
                continue;
            }

            if known_tasks.contains(&task.id) {
                report.conflicts.push(ImportConflict {
                    entity: "task",
                    id: task.id.clone(),
                });
                match resolution {
                    ConflictResolution::Skip => report.skipped += 1,
                    ConflictResolution::Overwrite => {
                        if !dry_run {
                            task_store::overwrite_row(tx, ws, &task)?;
                        }
                        report.imported_tasks += 1;
                    }
                }
                continue;
            }
            if !dry_run {
                if let Err(e) = task_store::insert_row(tx, ws, &task) {
                    self.skip_on_conflict(e, "task", &task.id, report)?;
                    continue;
                }
            }
            report.imported_tasks += 1;
        }
        Ok(())
    }

    fn import_dependencies(
        &self,
        tx: &Connection,
        document: &ExportDocument,
        dry_run: bool,
        report: &mut ImportReport,
    ) -> Result<()> {
        let ws = self.workspace_id();
        let existing: HashSet<(String, String, &'static str)> = dependencies::all(tx, ws)?
            .into_iter()
            .map(|d| (d.source_id, d.target_id, d.kind.as_str()))
            .collect();
        for dependency in &document.dependencies {
            let key = (
                dependency.source_id.clone(),
                dependency.target_id.clone(),
                dependency.kind.as_str(),
            );
            if existing.contains(&key) {
                report.skipped += 1;
                continue;
            }
            if !dry_run {
                let ends_exist = task_store::exists(tx, ws, &dependency.source_id)?
                    && task_store::exists(tx, ws, &dependency.target_id)?;
                if !ends_exist {
                    report.skipped += 1;
                    continue;
                }
                if let Err(e) = dependencies::insert_row(tx, ws, dependency) {
                    self.skip_on_conflict(e, "dependency", &dependency.id, report)?;
                    continue;
                }
            }
            report.imported_dependencies += 1;
        }
        Ok(())
    }

    fn import_templates(
        &self,
        tx: &Connection,
        document: &ExportDocument,
        dry_run: bool,
        report: &mut ImportReport,
    ) -> Result<()> {
        let ws = self.workspace_id();
        let existing: HashSet<String> = templates::custom(tx, ws)?.into_iter().map(|t| t.id).collect();
        for template in document.templates.iter().filter(|t| !t.builtin) {
            if existing.contains(&template.id) {
                report.conflicts.push(ImportConflict {
                    entity: "template",
                    id: template.id.clone(),
                });
                report.skipped += 1;
                continue;
            }
            if !dry_run {
                if let Err(e) = templates::insert_row(tx, ws, template) {
                    self.skip_on_conflict(e, "template", &template.id, report)?;
                    continue;
                }
            }
            report.imported_templates += 1;
        }
        Ok(())
    }

    /// Uniqueness clashes with rows outside this workspace count as
    /// conflicts; anything else aborts the import.
    fn skip_on_conflict(
        &self,
        err: GorevError,
        entity: &'static str,
        id: &str,
        report: &mut ImportReport,
    ) -> Result<()> {
        match err {
            GorevError::Conflict(_) => {
                report.conflicts.push(ImportConflict {
                    entity,
                    id: id.to_string(),
                });
                report.skipped += 1;
                Ok(())
            }
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::i18n::Lang;
    use crate::store::{Database, DependencyKind};
    use crate::tasks::hierarchy::NewSubtask;
    use std::sync::Arc;

    fn populated() -> TaskManager {
        let tm = manager();
        project(&tm, "P");
        let a = task(&tm, "A");
        let b = task(&tm, "B");
        tm.create_subtask(&a.id, &NewSubtask::titled("A.1")).unwrap();
        tm.add_dependency(&b.id, &a.id, DependencyKind::Blocker).unwrap();
        tm
    }

    #[test]
    fn test_export_into_fresh_workspace() {
        let source = populated();
        let document = source.export(&ExportOptions::default()).unwrap();
        assert_eq!(document.version, "1.0");
        assert_eq!(document.tasks.len(), 3);
        assert_eq!(document.dependencies.len(), 1);
        assert!(document.tags.contains(&"feature".to_string()));

        // Serialise through JSON like the tool surface does
        let json = serde_json::to_string(&document).unwrap();
        let parsed: ExportDocument = serde_json::from_str(&json).unwrap();

        let target = TaskManager::new(Arc::new(Database::open_in_memory().unwrap()), "other", Lang::En);
        let report = target.import(&parsed, ConflictResolution::Skip, false).unwrap();
        assert_eq!(report.imported_projects, 1);
        assert_eq!(report.imported_tasks, 3);
        assert_eq!(report.imported_dependencies, 1);
        assert!(report.conflicts.is_empty());

        let imported = target.db().read(|c| task_store::all(c, "other")).unwrap();
        assert_eq!(imported.len(), 3);
        let blocked = imported.iter().find(|t| t.title == "B").unwrap();
        assert_eq!(blocked.unfulfilled_dependency_count, 1);
    }

    #[test]
    fn test_reimport_reports_conflicts() {
        let tm = populated();
        let document = tm.export(&ExportOptions::default()).unwrap();

        let report = tm.import(&document, ConflictResolution::Skip, false).unwrap();
        assert_eq!(report.imported_tasks, 0);
        assert_eq!(report.conflicts.len(), 4);
        assert_eq!(report.skipped, 5);

        let report = tm.import(&document, ConflictResolution::Overwrite, false).unwrap();
        assert_eq!(report.imported_tasks, 3);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let source = populated();
        let document = source.export(&ExportOptions::default()).unwrap();
        let target = TaskManager::new(Arc::new(Database::open_in_memory().unwrap()), "other", Lang::En);
        let report = target.import(&document, ConflictResolution::Skip, true).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.imported_tasks, 3);
        assert!(target.db().read(|c| task_store::all(c, "other")).unwrap().is_empty());
    }

    #[test]
    fn test_version_and_completed_filter() {
        let tm = populated();
        let mut document = tm.export(&ExportOptions::default()).unwrap();
        document.version = "2.0".into();
        assert_eq!(
            tm.import(&document, ConflictResolution::Skip, false).unwrap_err().kind(),
            "validation"
        );

        let done = task(&tm, "Done");
        tm.update_status(&done.id, TaskStatus::InProgress).unwrap();
        tm.update_status(&done.id, TaskStatus::Completed).unwrap();
        let document = tm
            .export(&ExportOptions {
                include_completed: false,
                ..Default::default()
            })
            .unwrap();
        assert!(document.tasks.iter().all(|t| t.id != done.id));
    }

    #[test]
    fn test_parents_first_ordering() {
        let tm = populated();
        let mut tasks = tm.db().read(|c| task_store::all(c, "ws")).unwrap();
        tasks.reverse();
        let ordered = parents_first(&tasks, &HashSet::new());
        let pos = |id: &str| ordered.iter().position(|t| t.id == id).unwrap();
        for task in &ordered {
            if let Some(parent) = &task.parent_id {
                assert!(pos(parent) < pos(&task.id));
            }
        }
    }
}

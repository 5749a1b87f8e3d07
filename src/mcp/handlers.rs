//! MCP tool handlers
//!
//! Each handler validates its arguments, runs the business logic on the
//! blocking pool, renders a markdown reply and emits at most one change
//! event after the write has committed.

use super::format;
use super::params::Args;
use crate::error::{GorevError, Result};
use crate::events::{EventEmitter, EventType};
use crate::i18n::{t, tf, Lang};
use crate::ide::{ExtensionAction, IdeDetector, IdeKind};
use crate::store::{DependencyKind, Priority, SearchFilters, TaskStatus};
use crate::tasks::bulk::{BulkUpdate, TagOperation, TransitionOptions};
use crate::tasks::filter::{parse_sort, Keyword, SORT_NAMES};
use crate::tasks::hierarchy::NewSubtask;
use crate::tasks::transfer::{ConflictResolution, ExportDocument, ExportOptions};
use crate::tasks::{ListParams, SortOrder, TaskEdit, TaskManager, DEFAULT_LIMIT, MAX_LIMIT};
use crate::workspace::Workspace;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

const RECENT_DEFAULT_LIMIT: u32 = 10;
const RECENT_MAX_LIMIT: u32 = 50;
const HISTORY_DEFAULT_LIMIT: u32 = 20;
const HISTORY_MAX_LIMIT: u32 = 100;

/// Markdown for the transcript plus the same result as JSON
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub text: String,
    pub data: Value,
}

impl ToolOutput {
    fn new(text: impl Into<String>, data: &impl Serialize) -> Result<Self> {
        Ok(Self {
            text: text.into(),
            data: serde_json::to_value(data)?,
        })
    }
}

/// Handles tool calls for one workspace in one language
pub struct ToolHandler {
    workspace: Arc<Workspace>,
    lang: Lang,
    emitter: Arc<dyn EventEmitter>,
    ide: IdeDetector,
}

impl ToolHandler {
    pub fn new(workspace: Arc<Workspace>, lang: Lang, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            workspace,
            lang,
            emitter,
            ide: IdeDetector::from_env(),
        }
    }

    pub fn with_ide_detector(mut self, ide: IdeDetector) -> Self {
        self.ide = ide;
        self
    }

    fn ws(&self) -> &str {
        &self.workspace.id
    }

    /// Run business logic on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(TaskManager) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let manager = self.workspace.manager(self.lang);
        tokio::task::spawn_blocking(move || f(manager))
            .await
            .map_err(|e| GorevError::internal(format!("tool task failed: {e}")))?
    }

    /// Dispatch a tool call by name.
    pub async fn handle(&self, name: &str, args: Value) -> Result<ToolOutput> {
        debug!(tool = %name, workspace_id = %self.ws(), "Tool call");
        let args = Args::new(&args, self.lang);

        match name {
            // Tasks
            "gorev_listele" => self.list_tasks(&args).await,
            "gorev_detay" => self.task_detail(&args).await,
            "gorev_guncelle" => self.update_status(&args).await,
            "gorev_duzenle" => self.edit_task(&args).await,
            "gorev_sil" => self.delete_task(&args).await,
            "gorev_bagimlilik_ekle" => self.add_dependency(&args).await,

            // Templates
            "template_listele" => self.list_templates(&args).await,
            "templateden_gorev_olustur" => self.create_from_template(&args).await,

            // Projects
            "proje_olustur" => self.create_project(&args).await,
            "proje_listele" => self.list_projects().await,
            "proje_gorevleri" => self.project_tasks(&args).await,
            "ozet_goster" => self.summary().await,

            // Export / import
            "gorev_export" => self.export(&args).await,
            "gorev_import" => self.import(&args).await,

            // Unified
            "aktif_proje" => self.active_project(&args).await,
            "gorev_bulk" => self.bulk(&args).await,
            "gorev_hierarchy" => self.hierarchy(&args).await,
            "gorev_filter_profile" => self.filter_profile(&args).await,
            "gorev_file_watch" => self.file_watch(&args).await,
            "gorev_ide" => self.ide(&args).await,
            "gorev_context" => self.context(&args).await,
            "gorev_search" => self.search(&args).await,

            _ => Err(GorevError::not_found("tool", name)),
        }
    }

    fn unknown_action(&self, key: &str, names: &[&str]) -> GorevError {
        Args::new(&Value::Null, self.lang).enum_error(key, names)
    }

    // ========================================================================
    // Task handlers
    // ========================================================================

    async fn list_tasks(&self, args: &Args<'_>) -> Result<ToolOutput> {
        let params = ListParams {
            status: args.opt_enum("status", &TaskStatus::names(), TaskStatus::parse)?,
            priority: args.opt_enum("priority", &Priority::names(), Priority::parse)?,
            tag: args.opt_non_blank("tag"),
            all_projects: args.flag("all_projects"),
            filter: args.opt_enum("filter", &Keyword::NAMES, Keyword::parse)?,
            sort: args
                .opt_enum("sort", &SORT_NAMES, parse_sort)?
                .unwrap_or(SortOrder::CreatedDesc),
            limit: args.limit("limit", DEFAULT_LIMIT, MAX_LIMIT),
            offset: args.offset("offset"),
        };
        let page = self.blocking(move |tm| tm.list_tasks(&params)).await?;
        ToolOutput::new(format::task_page(self.lang, &page), &page)
    }

    async fn task_detail(&self, args: &Args<'_>) -> Result<ToolOutput> {
        let id = args.require_str("id")?;
        let detail = self.blocking(move |tm| tm.task_detail(&id)).await?;
        ToolOutput::new(format::task_detail(self.lang, &detail), &detail)
    }

    async fn update_status(&self, args: &Args<'_>) -> Result<ToolOutput> {
        let id = args.require_str("id")?;
        let status = args.require_enum("status", &TaskStatus::names(), TaskStatus::parse)?;
        let change = self.blocking(move |tm| tm.update_status(&id, status)).await?;

        if change.changed {
            self.emitter
                .emit_task(
                    EventType::TaskUpdated,
                    self.ws(),
                    &change.task.id,
                    json!({"status": change.task.status, "from": change.from}),
                )
                .await;
        }
        let text = tf(
            self.lang,
            "tool.status_updated",
            &[
                ("Title", &change.task.title),
                ("From", change.from.as_str()),
                ("To", change.task.status.as_str()),
            ],
        );
        ToolOutput::new(text, &change)
    }

    async fn edit_task(&self, args: &Args<'_>) -> Result<ToolOutput> {
        let id = args.require_str("id")?;
        let edit = task_edit(args)?;
        let task = self.blocking(move |tm| tm.edit_task(&id, &edit)).await?;

        self.emitter
            .emit_task(EventType::TaskUpdated, self.ws(), &task.id, json!({"reason": "edited"}))
            .await;
        let text = format!("{}\n\n{}", t(self.lang, "tool.task_edited"), format::task_line(&task));
        ToolOutput::new(text, &task)
    }

    async fn delete_task(&self, args: &Args<'_>) -> Result<ToolOutput> {
        let id = args.require_str("id")?;
        let confirm = args.flag("confirm");
        let deleted = self.blocking(move |tm| tm.delete_task(&id, confirm)).await?;

        self.emitter
            .emit_task(
                EventType::TaskDeleted,
                self.ws(),
                &deleted.task.id,
                json!({"removed_subtasks": deleted.removed_subtasks}),
            )
            .await;
        let text = tf(
            self.lang,
            "tool.task_deleted",
            &[
                ("Title", &deleted.task.title),
                ("Count", &deleted.removed_subtasks.to_string()),
            ],
        );
        ToolOutput::new(text, &deleted)
    }

    async fn add_dependency(&self, args: &Args<'_>) -> Result<ToolOutput> {
        let source_id = args.require_str("source_id")?;
        let target_id = args.require_str("target_id")?;
        let kind = args.enum_or("kind", &DependencyKind::names(), DependencyKind::parse, DependencyKind::DependsOn)?;
        let (dependency, source) = self
            .blocking(move |tm| tm.add_dependency(&source_id, &target_id, kind))
            .await?;

        self.emitter
            .emit_sync(
                self.ws(),
                "dependency_added",
                json!({
                    "source_id": dependency.source_id,
                    "target_id": dependency.target_id,
                    "kind": dependency.kind,
                }),
            )
            .await;
        let text = tf(
            self.lang,
            "tool.dependency_added",
            &[
                ("Source", &dependency.source_id),
                ("Target", &dependency.target_id),
                ("Count", &source.unfulfilled_dependency_count.to_string()),
            ],
        );
        ToolOutput::new(text, &json!({"dependency": dependency, "task": source}))
    }

    // ========================================================================
    // Template handlers
    // ========================================================================

    async fn list_templates(&self, args: &Args<'_>) -> Result<ToolOutput> {
        let category = args.opt_non_blank("category");
        let templates = self
            .blocking(move |tm| tm.list_templates(category.as_deref()))
            .await?;
        ToolOutput::new(format::templates(self.lang, &templates), &templates)
    }

    async fn create_from_template(&self, args: &Args<'_>) -> Result<ToolOutput> {
        let template_id = args.require_str("template_id")?;
        let values = args.string_map("values");
        let template_ref = template_id.clone();
        let task = self
            .blocking(move |tm| tm.create_from_template(&template_ref, &values))
            .await?;

        self.emitter
            .emit_task(EventType::TaskCreated, self.ws(), &task.id, json!({"template_id": template_id}))
            .await;
        let text = format!("{}\n\n{}", t(self.lang, "tool.task_created"), format::task_line(&task));
        ToolOutput::new(text, &task)
    }

    // ========================================================================
    // Project handlers
    // ========================================================================

    async fn create_project(&self, args: &Args<'_>) -> Result<ToolOutput> {
        let name = args.require_str("name")?;
        let definition = args.opt_str("definition").unwrap_or_default();
        let project = self
            .blocking(move |tm| tm.create_project(&name, &definition))
            .await?;

        self.emitter
            .emit_project(EventType::ProjectCreated, self.ws(), &project.id)
            .await;
        ToolOutput::new(format::project_line(self.lang, "tool.project_created", &project), &project)
    }

    async fn list_projects(&self) -> Result<ToolOutput> {
        let (projects, active) = self
            .blocking(|tm| Ok((tm.list_projects()?, tm.active_project()?)))
            .await?;
        let active_id = active.map(|p| p.id);
        let text = format::projects(self.lang, &projects, active_id.as_deref());
        ToolOutput::new(text, &json!({"projects": projects, "active_project_id": active_id}))
    }

    async fn project_tasks(&self, args: &Args<'_>) -> Result<ToolOutput> {
        let project_id = args.require_str("project_id")?;
        let limit = args.limit("limit", DEFAULT_LIMIT, MAX_LIMIT);
        let offset = args.offset("offset");
        let page = self
            .blocking(move |tm| tm.project_tasks(&project_id, limit, offset))
            .await?;
        ToolOutput::new(format::task_page(self.lang, &page), &page)
    }

    async fn summary(&self) -> Result<ToolOutput> {
        let summary = self.blocking(|tm| tm.summary()).await?;
        ToolOutput::new(format::summary(self.lang, &summary), &summary)
    }

    // ========================================================================
    // Export / import
    // ========================================================================

    async fn export(&self, args: &Args<'_>) -> Result<ToolOutput> {
        args.opt_enum("format", &["json"], |s| (s == "json").then_some(()))?;
        let options = ExportOptions {
            include_completed: args.flag_or("include_completed", true),
            project_ids: args.string_list("project_ids"),
        };
        let document = self.blocking(move |tm| tm.export(&options)).await?;

        let text = format!(
            "{}\n\n```json\n{}\n```",
            tf(
                self.lang,
                "tool.exported",
                &[
                    ("Projects", &document.projects.len().to_string()),
                    ("Tasks", &document.tasks.len().to_string()),
                ],
            ),
            serde_json::to_string_pretty(&document)?
        );
        ToolOutput::new(text, &document)
    }

    async fn import(&self, args: &Args<'_>) -> Result<ToolOutput> {
        let raw = args
            .get("data")
            .cloned()
            .ok_or_else(|| GorevError::Validation(tf(self.lang, "error.required_param", &[("Param", "data")])))?;
        let document: ExportDocument = serde_json::from_value(raw).map_err(|e| {
            GorevError::Validation(tf(self.lang, "error.invalid_document", &[("Detail", &e.to_string())]))
        })?;
        let resolution = args.enum_or(
            "conflict_resolution",
            &ConflictResolution::NAMES,
            ConflictResolution::parse,
            ConflictResolution::Skip,
        )?;
        let dry_run = args.flag("dry_run");
        let report = self
            .blocking(move |tm| tm.import(&document, resolution, dry_run))
            .await?;

        if !dry_run {
            self.emitter
                .emit_sync(
                    self.ws(),
                    "import",
                    json!({
                        "imported_projects": report.imported_projects,
                        "imported_tasks": report.imported_tasks,
                    }),
                )
                .await;
        }
        ToolOutput::new(format::import(self.lang, &report), &report)
    }

    // ========================================================================
    // Unified tools
    // ========================================================================

    async fn active_project(&self, args: &Args<'_>) -> Result<ToolOutput> {
        const ACTIONS: [&str; 3] = ["set", "get", "clear"];
        match args.require_str("action")?.as_str() {
            "set" => {
                let project_id = args.require_str("project_id")?;
                let project = self
                    .blocking(move |tm| tm.set_active_project(&project_id))
                    .await?;
                self.emitter
                    .emit_project(EventType::ProjectUpdated, self.ws(), &project.id)
                    .await;
                ToolOutput::new(format::project_line(self.lang, "tool.active_project_set", &project), &project)
            }
            "get" => {
                let project = self.blocking(|tm| tm.active_project()).await?;
                let text = match &project {
                    Some(p) => format::project_line(self.lang, "tool.active_project", p),
                    None => t(self.lang, "error.no_active_project"),
                };
                ToolOutput::new(text, &json!({ "project": project }))
            }
            "clear" => {
                let cleared = self.blocking(|tm| tm.clear_active_project()).await?;
                if cleared {
                    self.emitter
                        .emit_sync(self.ws(), "active_project_cleared", json!({}))
                        .await;
                }
                ToolOutput::new(t(self.lang, "tool.active_project_cleared"), &json!({ "cleared": cleared }))
            }
            _ => Err(self.unknown_action("action", &ACTIONS)),
        }
    }

    async fn bulk(&self, args: &Args<'_>) -> Result<ToolOutput> {
        const OPERATIONS: [&str; 3] = ["update", "transition", "tag"];
        let operation = args.require_enum("operation", &OPERATIONS, |s| OPERATIONS.iter().copied().find(|o| *o == s.trim()))?;
        let ids = args.string_list("ids");
        if ids.is_empty() {
            return Err(GorevError::Validation(tf(self.lang, "error.required_param", &[("Param", "ids")])));
        }
        let dry_run = args.flag("dry_run");
        let raw_data = args.object("data");
        let data = Args::new(&raw_data, self.lang);

        let report = match operation {
            "update" => {
                let update = BulkUpdate {
                    edit: task_edit(&data)?,
                    status: data.opt_enum("status", &TaskStatus::names(), TaskStatus::parse)?,
                };
                self.blocking(move |tm| tm.bulk_update(&ids, &update, dry_run)).await?
            }
            "transition" => {
                let status = data.require_enum("status", &TaskStatus::names(), TaskStatus::parse)?;
                let options = TransitionOptions {
                    force: data.flag("force"),
                    check_dependencies: data.flag("check_dependencies"),
                    dry_run,
                };
                self.blocking(move |tm| tm.bulk_transition(&ids, status, options)).await?
            }
            _ => {
                let tags = data.string_list("tags");
                let op = data.enum_or("tag_operation", &TagOperation::NAMES, TagOperation::parse, TagOperation::Add)?;
                self.blocking(move |tm| tm.bulk_tag(&ids, op, &tags, dry_run)).await?
            }
        };

        if !report.dry_run && !report.succeeded.is_empty() {
            self.emitter
                .emit_sync(self.ws(), &format!("bulk_{operation}"), json!({"ids": report.succeeded}))
                .await;
        }
        info!(
            workspace_id = %self.ws(),
            operation,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Bulk operation finished"
        );
        ToolOutput::new(format::bulk(self.lang, &report), &report)
    }

    async fn hierarchy(&self, args: &Args<'_>) -> Result<ToolOutput> {
        const ACTIONS: [&str; 3] = ["create_subtask", "change_parent", "show"];
        match args.require_str("action")?.as_str() {
            "create_subtask" => {
                let parent_id = args.require_str("parent_id")?;
                let new = NewSubtask {
                    title: args.require_str("title")?,
                    description: args.opt_str("description").unwrap_or_default(),
                    priority: args.opt_enum("priority", &Priority::names(), Priority::parse)?,
                    due_date: args.date("due_date")?.flatten(),
                    tags: args.string_list("tags"),
                };
                let task = self
                    .blocking(move |tm| tm.create_subtask(&parent_id, &new))
                    .await?;
                self.emitter
                    .emit_task(EventType::TaskCreated, self.ws(), &task.id, json!({"parent_id": task.parent_id}))
                    .await;
                let text = format!("{}\n\n{}", t(self.lang, "tool.subtask_created"), format::task_line(&task));
                ToolOutput::new(text, &task)
            }
            "change_parent" => {
                let task_id = args.require_str("task_id")?;
                let new_parent = args.opt_non_blank("new_parent_id");
                let task = self
                    .blocking(move |tm| tm.change_parent(&task_id, new_parent.as_deref()))
                    .await?;
                self.emitter
                    .emit_task(EventType::TaskUpdated, self.ws(), &task.id, json!({"parent_id": task.parent_id}))
                    .await;
                let text = match &task.parent_id {
                    Some(parent) => tf(self.lang, "tool.parent_changed", &[("Title", &task.title), ("Parent", parent)]),
                    None => tf(self.lang, "tool.made_root", &[("Title", &task.title)]),
                };
                ToolOutput::new(text, &task)
            }
            "show" => {
                let task_id = args.require_str("task_id")?;
                let report = self.blocking(move |tm| tm.hierarchy(&task_id)).await?;
                ToolOutput::new(format::hierarchy(self.lang, &report), &report)
            }
            _ => Err(self.unknown_action("action", &ACTIONS)),
        }
    }

    async fn filter_profile(&self, args: &Args<'_>) -> Result<ToolOutput> {
        const ACTIONS: [&str; 4] = ["save", "load", "list", "delete"];
        match args.require_str("action")?.as_str() {
            "save" => {
                let name = args.require_str("name")?;
                let description = args.opt_str("description").unwrap_or_default();
                let raw_filters = args.object("filters");
                let filters = search_filters(&Args::new(&raw_filters, self.lang))?;
                let query = args.opt_non_blank("search_query");
                let profile = self
                    .blocking(move |tm| tm.save_filter_profile(&name, &description, &filters, query.as_deref()))
                    .await?;
                self.emitter
                    .emit_sync(self.ws(), "filter_profile_saved", json!({"profile_id": profile.id}))
                    .await;
                let text = tf(self.lang, "tool.profile_saved", &[("Name", &profile.name), ("Id", &profile.id)]);
                ToolOutput::new(text, &profile)
            }
            "load" => {
                let key = profile_key(args)?;
                let limit = args.limit("limit", DEFAULT_LIMIT, MAX_LIMIT);
                let loaded = self.blocking(move |tm| tm.load_filter_profile(&key, limit)).await?;
                let text = format!(
                    "{}\n\n{}",
                    tf(
                        self.lang,
                        "tool.profile_loaded",
                        &[("Name", &loaded.profile.name), ("Total", &loaded.results.total.to_string())]
                    ),
                    format::task_list(self.lang, "fmt.tasks", &loaded.results.tasks)
                );
                ToolOutput::new(text, &loaded)
            }
            "list" => {
                let profiles = self.blocking(|tm| tm.list_filter_profiles()).await?;
                ToolOutput::new(format::profiles(self.lang, &profiles), &profiles)
            }
            "delete" => {
                let key = profile_key(args)?;
                let profile = self.blocking(move |tm| tm.delete_filter_profile(&key)).await?;
                self.emitter
                    .emit_sync(self.ws(), "filter_profile_deleted", json!({"profile_id": profile.id}))
                    .await;
                let text = tf(self.lang, "tool.profile_deleted", &[("Name", &profile.name)]);
                ToolOutput::new(text, &profile)
            }
            _ => Err(self.unknown_action("action", &ACTIONS)),
        }
    }

    async fn file_watch(&self, args: &Args<'_>) -> Result<ToolOutput> {
        const ACTIONS: [&str; 4] = ["add", "remove", "list", "stats"];
        let lang = self.lang;
        match args.require_str("action")?.as_str() {
            "add" => {
                let task_id = args.require_str("task_id")?;
                let path = args.require_str("path")?;
                let workspace = Arc::clone(&self.workspace);
                let watched = self
                    .blocking(move |_| workspace.watcher().add(&task_id, &path, lang))
                    .await?;
                self.emitter
                    .emit_sync(self.ws(), "file_watch_added", json!({"task_id": watched.task_id, "path": watched.path}))
                    .await;
                let text = tf(lang, "tool.watch_added", &[("Path", &watched.path), ("Task", &watched.task_id)]);
                ToolOutput::new(text, &watched)
            }
            "remove" => {
                let task_id = args.require_str("task_id")?;
                let path = args.require_str("path")?;
                let workspace = Arc::clone(&self.workspace);
                let (task_ref, path_ref) = (task_id.clone(), path.clone());
                self.blocking(move |_| workspace.watcher().remove(&task_ref, &path_ref, lang))
                    .await?;
                self.emitter
                    .emit_sync(self.ws(), "file_watch_removed", json!({"task_id": task_id, "path": path}))
                    .await;
                let text = tf(lang, "tool.watch_removed", &[("Path", &path), ("Task", &task_id)]);
                ToolOutput::new(text, &json!({"task_id": task_id, "path": path}))
            }
            "list" => {
                let task_id = args.opt_non_blank("task_id");
                let workspace = Arc::clone(&self.workspace);
                let files = self
                    .blocking(move |_| workspace.watcher().list(task_id.as_deref()))
                    .await?;
                ToolOutput::new(format::watched(lang, &files), &files)
            }
            "stats" => {
                let stats = self.workspace.watcher().stats();
                let text = tf(
                    lang,
                    "tool.watch_stats",
                    &[
                        ("Paths", &stats.watched_paths.to_string()),
                        ("Tasks", &stats.watched_tasks.to_string()),
                        ("Events", &stats.events_processed.to_string()),
                    ],
                );
                ToolOutput::new(text, &stats)
            }
            _ => Err(self.unknown_action("action", &ACTIONS)),
        }
    }

    async fn ide(&self, args: &Args<'_>) -> Result<ToolOutput> {
        const ACTIONS: [&str; 5] = ["detect", "install", "uninstall", "status", "update"];
        let action = args.require_str("action")?;
        let kinds = args
            .opt_enum("ide", &IdeKind::SELECTOR_NAMES, IdeKind::parse_selector)?
            .unwrap_or_else(|| IdeKind::ALL.to_vec());
        let explicit = kinds.len() == 1;

        match action.as_str() {
            "detect" => {
                let found: Vec<_> = kinds.iter().filter_map(|k| self.ide.detect(*k)).collect();
                let text = if found.is_empty() {
                    t(self.lang, "tool.ide_none")
                } else {
                    found
                        .iter()
                        .map(|ide| format!("- {} ({})", ide.name, ide.kind.as_str()))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                ToolOutput::new(text, &found)
            }
            "status" => {
                let statuses: Vec<_> = kinds
                    .iter()
                    .filter(|k| explicit || self.ide.detect(**k).is_some())
                    .map(|k| self.ide.extension_status(*k))
                    .collect();
                let text = statuses
                    .iter()
                    .map(|s| {
                        let state = match (s.installed, &s.version) {
                            (true, Some(v)) => format!("{} {v}", t(self.lang, "tool.ide_installed")),
                            (true, None) => t(self.lang, "tool.ide_installed"),
                            (false, _) => t(self.lang, "tool.ide_not_installed"),
                        };
                        format!("- {}: {state}", s.ide.display_name())
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                ToolOutput::new(text, &statuses)
            }
            "install" | "update" | "uninstall" => {
                let command = match action.as_str() {
                    "install" => ExtensionAction::Install,
                    "update" => ExtensionAction::Update,
                    _ => ExtensionAction::Uninstall,
                };
                let targets: Vec<IdeKind> = if explicit {
                    kinds
                } else {
                    kinds.into_iter().filter(|k| self.ide.detect(*k).is_some()).collect()
                };
                if targets.is_empty() {
                    return Err(GorevError::PreconditionFailed(t(self.lang, "tool.ide_none")));
                }
                let mut outcomes = Vec::with_capacity(targets.len());
                for kind in targets {
                    outcomes.push(self.ide.run(kind, command, self.lang).await?);
                }
                let text = outcomes
                    .iter()
                    .map(|o| {
                        let mark = if o.success { "✓" } else { "✗" };
                        format!("- {mark} {}: {}", o.ide.display_name(), o.output)
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                ToolOutput::new(text, &outcomes)
            }
            _ => Err(self.unknown_action("action", &ACTIONS)),
        }
    }

    async fn context(&self, args: &Args<'_>) -> Result<ToolOutput> {
        const ACTIONS: [&str; 4] = ["set_active", "get_active", "recent", "summary"];
        match args.require_str("action")?.as_str() {
            "set_active" => {
                let task_id = args.require_str("task_id")?;
                let change = self.blocking(move |tm| tm.set_active_task(&task_id)).await?;
                if change.changed {
                    self.emitter
                        .emit_task(
                            EventType::TaskUpdated,
                            self.ws(),
                            &change.task.id,
                            json!({"active": true, "auto_started": change.auto_started, "status": change.task.status}),
                        )
                        .await;
                }
                let text = format!(
                    "{}\n\n{}",
                    t(self.lang, "tool.active_task_set"),
                    format::task_line(&change.task)
                );
                ToolOutput::new(text, &change)
            }
            "get_active" => {
                let task = self.blocking(|tm| tm.get_active_task()).await?;
                let text = match &task {
                    Some(task) => format::task_line(task),
                    None => t(self.lang, "fmt.no_active_task"),
                };
                ToolOutput::new(text, &json!({ "task": task }))
            }
            "recent" => {
                let limit = args.limit("limit", RECENT_DEFAULT_LIMIT, RECENT_MAX_LIMIT);
                let tasks = self.blocking(move |tm| tm.recent_tasks(limit)).await?;
                ToolOutput::new(format::task_list(self.lang, "fmt.recent", &tasks), &tasks)
            }
            "summary" => {
                let summary = self.blocking(|tm| tm.context_summary()).await?;
                ToolOutput::new(format::context_summary(self.lang, &summary), &summary)
            }
            _ => Err(self.unknown_action("action", &ACTIONS)),
        }
    }

    async fn search(&self, args: &Args<'_>) -> Result<ToolOutput> {
        const MODES: [&str; 3] = ["advanced", "nlp", "history"];
        match args.require_str("mode")?.as_str() {
            "advanced" => {
                let query = args.opt_non_blank("query");
                let raw_filters = args.object("filters");
                let filters = search_filters(&Args::new(&raw_filters, self.lang))?;
                let limit = args.limit("limit", DEFAULT_LIMIT, MAX_LIMIT);
                let results = self
                    .blocking(move |tm| tm.advanced_search(query.as_deref(), &filters, limit))
                    .await?;
                let text = format!(
                    "{}\n\n{}",
                    tf(self.lang, "tool.search_total", &[("Total", &results.total.to_string())]),
                    format::task_list(self.lang, "fmt.tasks", &results.tasks)
                );
                ToolOutput::new(text, &results)
            }
            "nlp" => {
                let query = args.require_str("query")?;
                let limit = args.limit("limit", DEFAULT_LIMIT, MAX_LIMIT);
                let results = self.blocking(move |tm| tm.nlp_search(&query, limit)).await?;
                ToolOutput::new(format::nlp(self.lang, &results), &results)
            }
            "history" => {
                let limit = args.limit("limit", HISTORY_DEFAULT_LIMIT, HISTORY_MAX_LIMIT);
                let entries = self.blocking(move |tm| tm.search_history(limit)).await?;
                ToolOutput::new(format::history(self.lang, &entries), &entries)
            }
            _ => Err(self.unknown_action("mode", &MODES)),
        }
    }
}

/// Edit fields shared by `gorev_duzenle` and bulk update. Empty
/// `project_id` or `due_date` clears the field.
pub(crate) fn task_edit(args: &Args<'_>) -> Result<TaskEdit> {
    let title = match args.opt_str("title") {
        Some(_) => Some(args.require_str("title")?),
        None => None,
    };
    Ok(TaskEdit {
        title,
        description: args.opt_str("description"),
        priority: args.opt_enum("priority", &Priority::names(), Priority::parse)?,
        project_id: args
            .opt_str("project_id")
            .map(|p| Some(p.trim().to_string()).filter(|p| !p.is_empty())),
        due_date: args.date("due_date")?,
    })
}

fn search_filters(args: &Args<'_>) -> Result<SearchFilters> {
    let status = args
        .string_list("status")
        .iter()
        .map(|s| TaskStatus::parse(s).ok_or_else(|| args.enum_error("status", &TaskStatus::names())))
        .collect::<Result<Vec<_>>>()?;
    let priority = args
        .string_list("priority")
        .iter()
        .map(|s| Priority::parse(s).ok_or_else(|| args.enum_error("priority", &Priority::names())))
        .collect::<Result<Vec<_>>>()?;
    Ok(SearchFilters {
        status,
        priority,
        tags: args.string_list("tags"),
        project_id: args.opt_non_blank("project_id"),
        due_before: args.date("due_before")?.flatten(),
        due_after: args.date("due_after")?.flatten(),
    })
}

/// Profile reference for load/delete: `id` first, then `name`
fn profile_key(args: &Args<'_>) -> Result<String> {
    args.opt_non_blank("id")
        .or_else(|| args.opt_non_blank("name"))
        .ok_or_else(|| GorevError::Validation(tf(args.lang(), "error.required_param", &[("Param", "id")])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChangeEvent;
    use crate::workspace::WorkspaceRegistry;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ChangeEvent>>);

    #[async_trait]
    impl EventEmitter for Recorder {
        async fn emit(&self, event: ChangeEvent) {
            self.0.lock().push(event);
        }
    }

    struct Fixture {
        _dir: TempDir,
        _registry: WorkspaceRegistry,
        events: Arc<Recorder>,
        handler: ToolHandler,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let registry = WorkspaceRegistry::local();
        let workspace = registry.register(Some("test"), dir.path()).unwrap();
        let events = Arc::new(Recorder::default());
        let handler = ToolHandler::new(workspace, Lang::En, events.clone())
            .with_ide_detector(IdeDetector::with_roots(dir.path().join("home"), vec![]));
        Fixture {
            _dir: dir,
            _registry: registry,
            events,
            handler,
        }
    }

    async fn create_task(f: &Fixture, title: &str) -> String {
        let out = f
            .handler
            .handle(
                "templateden_gorev_olustur",
                json!({
                    "template_id": "feature",
                    "values": {"title": title, "description": "d", "purpose": "p", "criteria": "c"}
                }),
            )
            .await
            .unwrap();
        out.data["id"].as_str().unwrap().to_string()
    }

    async fn with_project(f: &Fixture) -> String {
        let out = f
            .handler
            .handle("proje_olustur", json!({"name": "Core"}))
            .await
            .unwrap();
        let id = out.data["id"].as_str().unwrap().to_string();
        f.handler
            .handle("aktif_proje", json!({"action": "set", "project_id": id}))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_create_and_list_emit_one_event_per_mutation() {
        let f = fixture();
        with_project(&f).await;
        let id = create_task(&f, "First").await;

        let events = f.events.0.lock().clone();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].event_type, EventType::TaskCreated);
        assert_eq!(events[2].entity_id.as_deref(), Some(id.as_str()));

        let out = f.handler.handle("gorev_listele", json!({"limit": 0})).await.unwrap();
        assert_eq!(out.data["total"], 1);
        assert_eq!(out.data["limit"], 50);
        assert!(out.text.contains("First"));
        assert_eq!(f.events.0.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_action_is_validation_error() {
        let f = fixture();
        let err = f
            .handler
            .handle("gorev_context", json!({"action": "explode"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains("set_active"));

        let err = f.handler.handle("gorev_search", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let f = fixture();
        let err = f.handler.handle("no_such_tool", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_status_enum_and_required_params() {
        let f = fixture();
        with_project(&f).await;
        let id = create_task(&f, "T").await;

        let err = f
            .handler
            .handle("gorev_guncelle", json!({"id": id, "status": "finished"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("pending"));

        let err = f
            .handler
            .handle("gorev_guncelle", json!({"id": "   ", "status": "completed"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let out = f
            .handler
            .handle("gorev_guncelle", json!({"id": id, "status": "in_progress"}))
            .await
            .unwrap();
        assert_eq!(out.data["task"]["status"], "in_progress");
        assert_eq!(out.data["from"], "pending");
    }

    #[tokio::test]
    async fn test_change_parent_cycle_is_rejected() {
        let f = fixture();
        with_project(&f).await;
        let a = create_task(&f, "A").await;
        let b = f
            .handler
            .handle("gorev_hierarchy", json!({"action": "create_subtask", "parent_id": a, "title": "B"}))
            .await
            .unwrap()
            .data["id"]
            .as_str()
            .unwrap()
            .to_string();
        let c = f
            .handler
            .handle("gorev_hierarchy", json!({"action": "create_subtask", "parent_id": b, "title": "C"}))
            .await
            .unwrap()
            .data["id"]
            .as_str()
            .unwrap()
            .to_string();

        let err = f
            .handler
            .handle("gorev_hierarchy", json!({"action": "change_parent", "task_id": a, "new_parent_id": c}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
        assert!(err.to_string().to_lowercase().contains("cycle"));

        let shown = f
            .handler
            .handle("gorev_hierarchy", json!({"action": "show", "task_id": a}))
            .await
            .unwrap();
        assert_eq!(shown.data["total_subtasks"], 2);
    }

    #[tokio::test]
    async fn test_bulk_requires_ids_and_dry_run_emits_nothing() {
        let f = fixture();
        with_project(&f).await;
        let id = create_task(&f, "T").await;
        let before = f.events.0.lock().len();

        let err = f
            .handler
            .handle("gorev_bulk", json!({"operation": "tag", "ids": []}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let out = f
            .handler
            .handle(
                "gorev_bulk",
                json!({"operation": "tag", "ids": [id], "data": {"tags": ["x"]}, "dry_run": true}),
            )
            .await
            .unwrap();
        assert_eq!(out.data["dry_run"], true);
        assert_eq!(f.events.0.lock().len(), before);
    }

    #[tokio::test]
    async fn test_ide_without_editors_is_precondition_failed() {
        let f = fixture();
        let out = f.handler.handle("gorev_ide", json!({"action": "detect"})).await.unwrap();
        assert_eq!(out.data, json!([]));
        let err = f
            .handler
            .handle("gorev_ide", json!({"action": "install", "ide": "vscode"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
    }

    #[tokio::test]
    async fn test_context_recent_and_set_active() {
        let f = fixture();
        with_project(&f).await;
        let id = create_task(&f, "Focus").await;

        let out = f
            .handler
            .handle("gorev_context", json!({"action": "set_active", "task_id": id}))
            .await
            .unwrap();
        assert_eq!(out.data["auto_started"], true);
        assert_eq!(out.data["task"]["status"], "in_progress");

        let recent = f
            .handler
            .handle("gorev_context", json!({"action": "recent", "limit": -1}))
            .await
            .unwrap();
        assert_eq!(recent.data[0]["id"], id.as_str());
    }
}

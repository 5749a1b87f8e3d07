//! File watching tied to tasks
//!
//! A task may watch files or directories. A change under a watched path
//! bumps the task's `updated_at` and starts it when it is still pending.
//! Registrations live in `watched_files` and are re-armed when the
//! workspace is opened again.

use crate::error::{GorevError, Result};
use crate::events::{EventEmitter, EventType};
use crate::i18n::{self, Lang};
use crate::store::{context as ctx_store, tasks as task_store, watched, Database, Task, TaskStatus, WatchedFile};
use crate::tasks::TaskManager;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Directory names whose contents never count as a change
const IGNORED_DIRS: [&str; 3] = [".git", "node_modules", "target"];
/// File-name patterns for editor and build scratch files
const IGNORED_FILES: [&str; 4] = ["*.swp", "*.tmp", "*~", ".#*"];

static IGNORED_PATTERNS: LazyLock<Vec<glob::Pattern>> =
    LazyLock::new(|| IGNORED_FILES.iter().filter_map(|p| glob::Pattern::new(p).ok()).collect());

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WatchStats {
    pub watched_paths: usize,
    pub watched_tasks: usize,
    pub events_processed: u64,
}

/// Whether a changed path should be ignored
pub fn is_ignored(path: &Path) -> bool {
    let in_ignored_dir = path.components().any(|c| match c {
        Component::Normal(name) => IGNORED_DIRS.iter().any(|d| name == *d),
        _ => false,
    });
    let scratch_file = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| IGNORED_PATTERNS.iter().any(|p| p.matches(name)));
    in_ignored_dir || scratch_file
}

impl TaskManager {
    /// Record a change to a watched file: touch the task, start it if pending.
    ///
    /// The dependency gate still applies; a gated task is only touched.
    pub fn apply_file_change(&self, task_id: &str, path: &Path) -> Result<Task> {
        self.db().write(|tx| {
            let ws = self.workspace_id();
            let task = task_store::get(tx, ws, task_id)?;
            task_store::touch(tx, ws, task_id)?;
            ctx_store::record_interaction(
                tx,
                ws,
                task_id,
                "file_changed",
                Some(&serde_json::json!({"path": path.display().to_string()})),
            )?;
            if task.status == TaskStatus::Pending && self.check_transition(tx, &task, TaskStatus::InProgress, false).is_ok() {
                return Ok(self.transition_in(tx, task_id, TaskStatus::InProgress, false)?.task);
            }
            task_store::get(tx, ws, task_id)
        })
    }
}

struct Inner {
    db: Arc<Database>,
    workspace_id: String,
    /// Watched path -> task ids
    watches: RwLock<HashMap<PathBuf, BTreeSet<String>>>,
    events_processed: AtomicU64,
    emitter: Option<Arc<dyn EventEmitter>>,
    runtime: Option<Handle>,
}

impl Inner {
    /// Tasks watching `changed` directly or through a watched directory
    fn tasks_for(&self, changed: &Path) -> BTreeSet<String> {
        self.watches
            .read()
            .iter()
            .filter(|(watched, _)| changed.starts_with(watched))
            .flat_map(|(_, tasks)| tasks.iter().cloned())
            .collect()
    }

    fn handle_change(&self, changed: &Path) -> Vec<String> {
        if is_ignored(changed) {
            return Vec::new();
        }
        let tasks = self.tasks_for(changed);
        if tasks.is_empty() {
            return Vec::new();
        }
        self.events_processed.fetch_add(1, Ordering::Relaxed);

        let manager = TaskManager::new(self.db.clone(), self.workspace_id.clone(), i18n::default_lang());
        let mut touched = Vec::new();
        for task_id in tasks {
            match manager.apply_file_change(&task_id, changed) {
                Ok(task) => {
                    debug!(workspace_id = %self.workspace_id, task_id = %task_id, path = %changed.display(), "Watched file changed");
                    self.emit_update(&task);
                    touched.push(task_id);
                }
                Err(e) => warn!(task_id = %task_id, error = %e, "Failed to apply file change"),
            }
        }
        touched
    }

    fn emit_update(&self, task: &Task) {
        let (Some(emitter), Some(runtime)) = (self.emitter.clone(), self.runtime.as_ref()) else {
            return;
        };
        let workspace_id = self.workspace_id.clone();
        let task_id = task.id.clone();
        let status = task.status.as_str();
        runtime.spawn(async move {
            emitter
                .emit_task(
                    EventType::TaskUpdated,
                    &workspace_id,
                    &task_id,
                    serde_json::json!({"reason": "file_changed", "status": status}),
                )
                .await;
        });
    }
}

/// Per-workspace watcher; the OS watcher is created on first use.
pub struct FileWatcher {
    inner: Arc<Inner>,
    root: Option<PathBuf>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("workspace_id", &self.inner.workspace_id)
            .field("stats", &self.stats())
            .finish()
    }
}

impl FileWatcher {
    /// `root` resolves relative paths; events are emitted when an emitter
    /// is given and a tokio runtime is current.
    pub fn new(
        db: Arc<Database>,
        workspace_id: impl Into<String>,
        root: Option<PathBuf>,
        emitter: Option<Arc<dyn EventEmitter>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                workspace_id: workspace_id.into(),
                watches: RwLock::new(HashMap::new()),
                events_processed: AtomicU64::new(0),
                emitter,
                runtime: Handle::try_current().ok(),
            }),
            root,
            watcher: Mutex::new(None),
        }
    }

    fn resolve(&self, raw: &str, lang: Lang) -> Result<PathBuf> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(GorevError::Validation(i18n::tf(lang, "error.required_param", &[("Param", "path")])));
        }
        let candidate = match &self.root {
            Some(root) if Path::new(raw).is_relative() => root.join(raw),
            _ => PathBuf::from(raw),
        };
        candidate
            .canonicalize()
            .map_err(|_| GorevError::Validation(i18n::tf(lang, "error.path_not_found", &[("Path", raw)])))
    }

    fn arm(&self, path: &Path) -> Result<()> {
        let mut slot = self.watcher.lock();
        if slot.is_none() {
            let inner = Arc::clone(&self.inner);
            let watcher = RecommendedWatcher::new(
                move |res: notify::Result<Event>| match res {
                    Ok(event) if is_content_change(&event.kind) => {
                        for path in &event.paths {
                            inner.handle_change(path);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "File watcher error"),
                },
                Config::default().with_poll_interval(Duration::from_secs(2)),
            )
            .map_err(|e| GorevError::internal(format!("failed to create file watcher: {e}")))?;
            info!(workspace_id = %self.inner.workspace_id, "File watcher started");
            *slot = Some(watcher);
        }
        if let Some(watcher) = slot.as_mut() {
            watcher
                .watch(path, RecursiveMode::Recursive)
                .map_err(|e| GorevError::internal(format!("failed to watch {}: {e}", path.display())))?;
        }
        Ok(())
    }

    fn disarm(&self, path: &Path) {
        if let Some(watcher) = self.watcher.lock().as_mut() {
            if let Err(e) = watcher.unwatch(path) {
                debug!(path = %path.display(), error = %e, "Unwatch failed");
            }
        }
    }

    /// Re-arm the registrations persisted for this workspace.
    pub fn restore(&self) -> Result<usize> {
        let rows = self
            .inner
            .db
            .read(|conn| watched::list(conn, &self.inner.workspace_id, None))?;
        let mut restored = 0;
        for row in rows {
            let path = PathBuf::from(&row.path);
            if !path.exists() {
                debug!(path = %row.path, "Skipping watch on missing path");
                continue;
            }
            let first = {
                let mut watches = self.inner.watches.write();
                let tasks = watches.entry(path.clone()).or_default();
                tasks.insert(row.task_id);
                tasks.len() == 1
            };
            if first {
                self.arm(&path)?;
            }
            restored += 1;
        }
        Ok(restored)
    }

    /// Watch `path` on behalf of `task_id`.
    pub fn add(&self, task_id: &str, path: &str, lang: Lang) -> Result<WatchedFile> {
        let path = self.resolve(path, lang)?;
        let stored = path.display().to_string();
        let ws = self.inner.workspace_id.as_str();
        self.inner.db.write(|tx| {
            task_store::get(tx, ws, task_id)?;
            watched::add(tx, ws, task_id, &stored)?;
            Ok(())
        })?;

        let first = {
            let mut watches = self.inner.watches.write();
            let tasks = watches.entry(path.clone()).or_default();
            tasks.insert(task_id.to_string());
            tasks.len() == 1
        };
        if first {
            self.arm(&path)?;
        }
        info!(workspace_id = %ws, task_id = %task_id, path = %stored, "Watching path");

        let rows = self.inner.db.read(|conn| watched::list(conn, ws, Some(task_id)))?;
        rows.into_iter()
            .find(|w| w.path == stored)
            .ok_or_else(|| GorevError::not_found("watched_file", stored.clone()))
    }

    pub fn remove(&self, task_id: &str, path: &str, lang: Lang) -> Result<()> {
        // The path may have been deleted since; fall back to the raw string
        let resolved = self.resolve(path, lang).unwrap_or_else(|_| match &self.root {
            Some(root) if Path::new(path).is_relative() => root.join(path),
            _ => PathBuf::from(path),
        });
        let stored = resolved.display().to_string();
        self.inner
            .db
            .write(|tx| watched::remove(tx, &self.inner.workspace_id, task_id, &stored))?;

        let last = {
            let mut watches = self.inner.watches.write();
            match watches.get_mut(&resolved) {
                Some(tasks) => {
                    tasks.remove(task_id);
                    let empty = tasks.is_empty();
                    if empty {
                        watches.remove(&resolved);
                    }
                    empty
                }
                None => false,
            }
        };
        if last {
            self.disarm(&resolved);
        }
        Ok(())
    }

    pub fn list(&self, task_id: Option<&str>) -> Result<Vec<WatchedFile>> {
        self.inner
            .db
            .read(|conn| watched::list(conn, &self.inner.workspace_id, task_id))
    }

    pub fn stats(&self) -> WatchStats {
        let watches = self.inner.watches.read();
        let tasks: BTreeSet<&String> = watches.values().flatten().collect();
        WatchStats {
            watched_paths: watches.len(),
            watched_tasks: tasks.len(),
            events_processed: self.inner.events_processed.load(Ordering::Relaxed),
        }
    }

    /// Feed a change as if the OS had reported it; returns the touched task ids.
    pub fn process_change(&self, path: &Path) -> Vec<String> {
        self.inner.handle_change(path)
    }

    /// Drop the OS watcher; registrations stay persisted.
    pub fn stop(&self) {
        if self.watcher.lock().take().is_some() {
            info!(workspace_id = %self.inner.workspace_id, "File watcher stopped");
        }
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::projects::NewProject;
    use crate::store::{projects, tasks::NewTask};

    fn setup() -> (tempfile::TempDir, Arc<Database>, FileWatcher, String) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let task_id = db
            .write(|tx| {
                let project = projects::insert(tx, "ws", &NewProject::new("P", ""))?;
                let mut new = NewTask::new("Watch me");
                new.project_id = Some(project.id);
                Ok(task_store::insert(tx, "ws", &new)?.id)
            })
            .unwrap();
        let watcher = FileWatcher::new(db.clone(), "ws", Some(dir.path().to_path_buf()), None);
        (dir, db, watcher, task_id)
    }

    #[test]
    fn test_ignored_patterns() {
        assert!(is_ignored(Path::new("/repo/.git/index")));
        assert!(is_ignored(Path::new("/repo/node_modules/x/index.js")));
        assert!(is_ignored(Path::new("/repo/target/debug/gorev")));
        assert!(is_ignored(Path::new("/repo/src/.main.rs.swp")));
        assert!(is_ignored(Path::new("/repo/out.tmp")));
        assert!(is_ignored(Path::new("/repo/notes.md~")));
        assert!(is_ignored(Path::new("/repo/.#lockfile")));
        assert!(!is_ignored(Path::new("/repo/src/main.rs")));
        assert!(!is_ignored(Path::new("/repo/targets.md")));
    }

    #[test]
    fn test_change_starts_pending_task() {
        let (dir, db, watcher, task_id) = setup();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();

        watcher.add(&task_id, "src", Lang::En).unwrap();
        let stats = watcher.stats();
        assert_eq!(stats.watched_paths, 1);
        assert_eq!(stats.watched_tasks, 1);

        let changed = dir.path().join("src/lib.rs").canonicalize().unwrap();
        assert_eq!(watcher.process_change(&changed), vec![task_id.clone()]);
        let task = db.read(|c| task_store::get(c, "ws", &task_id)).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(watcher.stats().events_processed, 1);

        // Ignored and unrelated paths do nothing
        let swap = dir.path().canonicalize().unwrap().join("src/.lib.rs.swp");
        assert!(watcher.process_change(&swap).is_empty());
        assert!(watcher.process_change(Path::new("/elsewhere/file.rs")).is_empty());
        watcher.stop();
    }

    #[test]
    fn test_missing_path_is_validation_error() {
        let (_dir, _db, watcher, task_id) = setup();
        let err = watcher.add(&task_id, "does/not/exist", Lang::En).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_remove_and_restore() {
        let (dir, db, watcher, task_id) = setup();
        std::fs::write(dir.path().join("notes.md"), "").unwrap();
        watcher.add(&task_id, "notes.md", Lang::En).unwrap();
        assert_eq!(watcher.list(Some(&task_id)).unwrap().len(), 1);

        // A fresh watcher on the same database picks the registration up
        let again = FileWatcher::new(db.clone(), "ws", Some(dir.path().to_path_buf()), None);
        assert_eq!(again.restore().unwrap(), 1);
        assert_eq!(again.stats().watched_paths, 1);
        again.stop();

        watcher.remove(&task_id, "notes.md", Lang::En).unwrap();
        assert!(watcher.list(None).unwrap().is_empty());
        assert_eq!(watcher.stats().watched_paths, 0);
        assert_eq!(
            watcher.remove(&task_id, "notes.md", Lang::En).unwrap_err().kind(),
            "not_found"
        );
        watcher.stop();
    }
}

use crate::error::{GorevError, Result};
use crate::events::EventEmitter;
use crate::i18n::{self, Lang};
use crate::store::{tasks as task_store, Database};
use crate::tasks::TaskManager;
use crate::watch::FileWatcher;
use crate::{Config, StorageMode};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Per-workspace data directory in local mode
pub const WORKSPACE_DIR: &str = ".gorev";
const DATABASE_FILE: &str = "gorev.db";

/// `hex(sha256(abs_path))[..16]`
pub fn workspace_id_for_path(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// A registered workspace and its open database
pub struct Workspace {
    pub id: String,
    pub name: String,
    /// Absent for id-registered workspaces in centralized mode
    pub path: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    last_accessed: Mutex<DateTime<Utc>>,
    db: Arc<Database>,
    watcher: FileWatcher,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

/// Listing view of a workspace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkspaceInfo {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    pub task_count: u32,
    pub last_accessed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    /// Business-logic view in the caller's language
    pub fn manager(&self, lang: Lang) -> TaskManager {
        TaskManager::new(self.db.clone(), self.id.clone(), lang)
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn watcher(&self) -> &FileWatcher {
        &self.watcher
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        *self.last_accessed.lock()
    }

    fn touch(&self) {
        *self.last_accessed.lock() = Utc::now();
    }

    pub fn info(&self) -> Result<WorkspaceInfo> {
        let task_count = self
            .db
            .read(|conn| task_store::count(conn, &self.id, &task_store::TaskQuery::default()))?;
        Ok(WorkspaceInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            path: self
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            database_path: self.database_path.as_ref().map(|p| p.display().to_string()),
            task_count,
            last_accessed: self.last_accessed(),
            created_at: self.created_at,
        })
    }
}

/// Shared table of open workspaces.
///
/// Only register and unregister take the write lock; database handles are
/// shared and serialise writes internally.
pub struct WorkspaceRegistry {
    mode: StorageMode,
    /// The single database of centralized mode
    shared_db: Option<Arc<Database>>,
    workspaces: RwLock<HashMap<String, Arc<Workspace>>>,
    emitter: Option<Arc<dyn EventEmitter>>,
}

impl std::fmt::Debug for WorkspaceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceRegistry")
            .field("mode", &self.mode)
            .field("workspaces", &self.workspaces.read().len())
            .finish()
    }
}

impl WorkspaceRegistry {
    /// Registry for the configured storage mode.
    ///
    /// Centralized mode opens (and migrates) the shared database now, so a
    /// migration failure stops start-up.
    pub fn new(config: &Config, emitter: Option<Arc<dyn EventEmitter>>) -> Result<Self> {
        let shared_db = match config.mode {
            StorageMode::Local => None,
            StorageMode::Centralized => {
                let path = config
                    .db_path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(crate::DEFAULT_CENTRALIZED_DB_PATH));
                info!(path = %path.display(), "Opening centralized database");
                Some(Arc::new(Database::open(&path)?))
            }
        };
        Ok(Self {
            mode: config.mode,
            shared_db,
            workspaces: RwLock::new(HashMap::new()),
            emitter,
        })
    }

    /// Local-mode registry without an event sink
    pub fn local() -> Self {
        Self {
            mode: StorageMode::Local,
            shared_db: None,
            workspaces: RwLock::new(HashMap::new()),
            emitter: None,
        }
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    fn insert(&self, workspace: Workspace) -> Result<Arc<Workspace>> {
        let mut workspaces = self.workspaces.write();
        if workspaces.contains_key(&workspace.id) {
            return Err(GorevError::Conflict(i18n::tf(
                i18n::default_lang(),
                "error.workspace_exists",
                &[("Id", &workspace.id)],
            )));
        }
        let workspace = Arc::new(workspace);
        workspaces.insert(workspace.id.clone(), workspace.clone());
        Ok(workspace)
    }

    fn build(&self, id: String, name: String, path: Option<PathBuf>, database_path: Option<PathBuf>, db: Arc<Database>) -> Workspace {
        let now = Utc::now();
        let watcher = FileWatcher::new(db.clone(), id.clone(), path.clone(), self.emitter.clone());
        Workspace {
            id,
            name,
            path,
            database_path,
            created_at: now,
            last_accessed: Mutex::new(now),
            db,
            watcher,
        }
    }

    /// Register a workspace directory (local mode).
    ///
    /// Opens `<path>/.gorev/gorev.db`, running migrations. Fails with
    /// conflict when the path is already registered.
    pub fn register(&self, name: Option<&str>, path: &Path) -> Result<Arc<Workspace>> {
        let lang = i18n::default_lang();
        if self.mode == StorageMode::Centralized {
            return Err(GorevError::PreconditionFailed(i18n::t(lang, "error.path_registration_disabled")));
        }
        let path = absolute(path)?;
        let id = workspace_id_for_path(&path);
        if self.workspaces.read().contains_key(&id) {
            return Err(GorevError::Conflict(i18n::tf(lang, "error.workspace_exists", &[("Id", &id)])));
        }

        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| id.clone());

        // Opened outside the registry lock; migrations may take a while
        let database_path = path.join(WORKSPACE_DIR).join(DATABASE_FILE);
        let db = Arc::new(Database::open(&database_path)?);
        let workspace = self.build(id, name, Some(path), Some(database_path), db);
        match workspace.watcher.restore() {
            Ok(0) => {}
            Ok(n) => info!(workspace_id = %workspace.id, restored = n, "File watches restored"),
            Err(e) => warn!(workspace_id = %workspace.id, error = %e, "Failed to restore file watches"),
        }
        let workspace = self.insert(workspace)?;
        info!(workspace_id = %workspace.id, name = %workspace.name, "Workspace registered");
        Ok(workspace)
    }

    /// Register by explicit id (centralized mode): rows live in the shared database.
    pub fn register_id(&self, workspace_id: &str, name: Option<&str>) -> Result<Arc<Workspace>> {
        let lang = i18n::default_lang();
        let Some(db) = self.shared_db.clone() else {
            return Err(GorevError::PreconditionFailed(i18n::t(lang, "error.id_registration_requires_centralized")));
        };
        let id = workspace_id.trim();
        if id.is_empty() {
            return Err(GorevError::Validation(i18n::tf(lang, "error.required_param", &[("Param", "workspace_id")])));
        }
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(id)
            .to_string();
        let database_path = db.path().map(Path::to_path_buf);
        let workspace = self.insert(self.build(id.to_string(), name, None, database_path, db))?;
        info!(workspace_id = %workspace.id, "Workspace registered in shared database");
        Ok(workspace)
    }

    /// Look a workspace up by id and mark it accessed.
    pub fn get(&self, workspace_id: &str) -> Result<Arc<Workspace>> {
        let workspace = self
            .workspaces
            .read()
            .get(workspace_id)
            .cloned()
            .ok_or_else(|| GorevError::not_found("workspace", workspace_id))?;
        workspace.touch();
        Ok(workspace)
    }

    /// Lookup by directory, after canonicalisation
    pub fn find_by_path(&self, path: &Path) -> Option<Arc<Workspace>> {
        let id = workspace_id_for_path(&absolute(path).ok()?);
        self.workspaces.read().get(&id).cloned()
    }

    /// Lookup by display name; the first registered match wins.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Workspace>> {
        self.workspaces
            .read()
            .values()
            .filter(|w| w.name == name)
            .min_by_key(|w| w.created_at)
            .cloned()
    }

    /// Remove from the registry; the database closes with its last handle.
    pub fn unregister(&self, workspace_id: &str) -> Result<Arc<Workspace>> {
        let workspace = self
            .workspaces
            .write()
            .remove(workspace_id)
            .ok_or_else(|| GorevError::not_found("workspace", workspace_id))?;
        workspace.watcher.stop();
        info!(workspace_id = %workspace_id, "Workspace unregistered");
        Ok(workspace)
    }

    /// All workspaces, most recently accessed first.
    pub fn list(&self) -> Result<Vec<WorkspaceInfo>> {
        let workspaces: Vec<Arc<Workspace>> = self.workspaces.read().values().cloned().collect();
        let mut infos = workspaces
            .iter()
            .map(|w| w.info())
            .collect::<Result<Vec<_>>>()?;
        infos.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        Ok(infos)
    }

    pub fn len(&self) -> usize {
        self.workspaces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every workspace (daemon shutdown).
    pub fn close_all(&self) {
        let drained: Vec<Arc<Workspace>> = self.workspaces.write().drain().map(|(_, w)| w).collect();
        for workspace in &drained {
            workspace.watcher.stop();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "Workspaces closed");
        }
    }
}

/// Canonical path when it exists, otherwise joined onto the current directory
fn absolute(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn centralized(dir: &tempfile::TempDir) -> WorkspaceRegistry {
        let config = Config {
            mode: StorageMode::Centralized,
            db_path: Some(dir.path().join("shared.db")),
            ..Default::default()
        };
        WorkspaceRegistry::new(&config, None).unwrap()
    }

    #[test]
    fn test_id_is_stable_hash_prefix() {
        let id = workspace_id_for_path(Path::new("/home/dev/project"));
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, workspace_id_for_path(Path::new("/home/dev/project")));
        assert_ne!(id, workspace_id_for_path(Path::new("/home/dev/other")));
    }

    #[test]
    fn test_register_local_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let registry = WorkspaceRegistry::local();
        let ws = registry.register(None, dir.path()).unwrap();

        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(ws.id, workspace_id_for_path(&canonical));
        assert_eq!(ws.name, canonical.file_name().unwrap().to_string_lossy());
        assert!(canonical.join(".gorev/gorev.db").exists());

        let dup = registry.register(Some("again"), dir.path()).unwrap_err();
        assert_eq!(dup.kind(), "conflict");
        assert_eq!(registry.find_by_path(dir.path()).unwrap().id, ws.id);
    }

    #[test]
    fn test_get_updates_last_accessed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = WorkspaceRegistry::local();
        let ws = registry.register(Some("proj"), dir.path()).unwrap();
        let before = ws.last_accessed();
        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.get(&ws.id).unwrap();
        assert!(ws.last_accessed() > before);
        assert_eq!(registry.get("missing").unwrap_err().kind(), "not_found");
    }

    #[test]
    fn test_list_reports_task_counts() {
        let dir = tempfile::tempdir().unwrap();
        let registry = WorkspaceRegistry::local();
        let ws = registry.register(Some("proj"), dir.path()).unwrap();
        ws.database()
            .write(|tx| task_store::insert(tx, &ws.id, &task_store::NewTask::new("T")))
            .unwrap();

        let list = registry.list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].task_count, 1);
        assert_eq!(list[0].name, "proj");
    }

    #[test]
    fn test_unregister_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let registry = WorkspaceRegistry::local();
        let ws = registry.register(None, dir.path()).unwrap();
        registry.unregister(&ws.id).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.unregister(&ws.id).unwrap_err().kind(), "not_found");

        registry.register(None, dir.path()).unwrap();
        registry.close_all();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_centralized_mode_rules() {
        let dir = tempfile::tempdir().unwrap();
        let registry = centralized(&dir);

        let err = registry.register(None, dir.path()).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");

        let a = registry.register_id("team-a", Some("Team A")).unwrap();
        let b = registry.register_id("team-b", None).unwrap();
        assert_eq!(b.name, "team-b");
        assert!(Arc::ptr_eq(a.database(), b.database()));

        // Rows stay scoped by workspace id in the shared file
        a.manager(Lang::En).create_project("Only in A", "").unwrap();
        assert_eq!(a.manager(Lang::En).list_projects().unwrap().len(), 1);
        assert!(b.manager(Lang::En).list_projects().unwrap().is_empty());

        assert_eq!(registry.register_id("team-a", None).unwrap_err().kind(), "conflict");
    }

    #[test]
    fn test_id_registration_needs_centralized_mode() {
        let registry = WorkspaceRegistry::local();
        assert_eq!(
            registry.register_id("x", None).unwrap_err().kind(),
            "precondition_failed"
        );
    }
}

//! SQLite data layer
//!
//! One [`Database`] per workspace (or one shared database in centralized
//! mode). All mutations funnel through a single writer connection and run
//! inside one `IMMEDIATE` transaction per high-level operation; readers use a
//! small set of separate connections so they proceed in parallel under WAL.
//!
//! Every table carries a `workspace_id` column and every query is scoped by
//! it, so the same code serves both storage modes.

pub mod context;
pub mod dependencies;
pub mod migrations;
pub mod models;
pub mod profiles;
pub mod projects;
pub mod tags;
pub mod tasks;
pub mod templates;
pub mod watched;

pub use models::*;

use crate::error::{GorevError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OpenFlags, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Total time a write may spend retrying on SQLITE_BUSY
const BUSY_RETRY_BUDGET: Duration = Duration::from_secs(5);
const BUSY_BACKOFF_START: Duration = Duration::from_millis(10);
const BUSY_BACKOFF_MAX: Duration = Duration::from_millis(500);

/// Per-connection busy timeout; short so contention surfaces to the retry loop
const CONNECTION_BUSY_TIMEOUT_MS: u32 = 250;

const READER_CONNECTIONS: usize = 4;

pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("readers", &self.readers.len())
            .finish()
    }
}

impl Database {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Connection::open(path)?;
        configure(&writer)?;
        let applied = migrations::run_migrations(&writer)?;
        templates::seed_defaults(&writer)?;

        let mut readers = Vec::with_capacity(READER_CONNECTIONS);
        for _ in 0..READER_CONNECTIONS {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX
                    | OpenFlags::SQLITE_OPEN_URI,
            )?;
            conn.busy_timeout(Duration::from_millis(CONNECTION_BUSY_TIMEOUT_MS as u64))?;
            readers.push(Mutex::new(conn));
        }

        info!(path = %path.display(), applied, "Database opened");

        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory database (tests); reads share the writer connection.
    pub fn open_in_memory() -> Result<Self> {
        let writer = Connection::open_in_memory()?;
        configure(&writer)?;
        migrations::run_migrations(&writer)?;
        templates::seed_defaults(&writer)?;
        Ok(Self {
            writer: Mutex::new(writer),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a read-only closure on a reader connection.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        if self.readers.is_empty() {
            let conn = self.writer.lock();
            return f(&conn);
        }

        for reader in &self.readers {
            if let Some(conn) = reader.try_lock() {
                return f(&conn);
            }
        }

        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx].lock();
        f(&conn)
    }

    /// Run `f` inside one write transaction, retrying on busy/locked.
    ///
    /// `f` may run more than once; it must not have side effects outside the
    /// transaction.
    pub fn write<T>(&self, mut f: impl FnMut(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.writer.lock();
        let started = Instant::now();
        let mut backoff = BUSY_BACKOFF_START;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let outcome = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(GorevError::from)
                .and_then(|tx| {
                    let value = f(&tx)?;
                    tx.commit()?;
                    Ok(value)
                });

            match outcome {
                Err(e) if is_busy(&e) => {
                    if started.elapsed() + backoff > BUSY_RETRY_BUDGET {
                        warn!(attempt, "Write retry budget exhausted");
                        return Err(GorevError::Transient(e.to_string()));
                    }
                    debug!(attempt, backoff_ms = backoff.as_millis() as u64, "Database busy, retrying");
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(BUSY_BACKOFF_MAX);
                }
                other => return other,
            }
        }
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;\
         PRAGMA busy_timeout = {};\
         PRAGMA foreign_keys = ON;\
         PRAGMA synchronous = NORMAL;",
        CONNECTION_BUSY_TIMEOUT_MS
    ))?;
    Ok(())
}

/// SQLITE_BUSY / SQLITE_LOCKED
pub fn is_busy(err: &GorevError) -> bool {
    match err {
        GorevError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
            matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        }
        _ => false,
    }
}

/// Map a UNIQUE constraint failure to a conflict error.
pub(crate) fn conflict_on_unique(err: rusqlite::Error, message: impl FnOnce() -> String) -> GorevError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            GorevError::Conflict(message())
        }
        _ => GorevError::Sqlite(err),
    }
}

/// Opaque string id for new rows
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_file_database_runs_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".gorev").join("gorev.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        let version = db.read(|conn| migrations::current_version(conn)).unwrap();
        assert_eq!(version, migrations::latest_version());

        // Reopening is idempotent
        drop(db);
        let db = Database::open(&path).unwrap();
        let templates = db.read(|conn| templates::list(conn, "ws", None)).unwrap();
        assert_eq!(templates.len(), templates::builtin_templates().len());
    }

    #[test]
    fn test_write_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<()> = db.write(|tx| {
            projects::insert(tx, "ws", &projects::NewProject::new("Doomed", ""))?;
            Err(GorevError::PreconditionFailed("abort".into()))
        });
        assert!(result.is_err());

        let all = db.read(|conn| projects::list(conn, "ws")).unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn test_busy_writer_surfaces_as_transient() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.db");
        let db = Database::open(&path).unwrap();

        // A second process-level connection holds the write lock
        let blocker = Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

        let started = Instant::now();
        let result = db.write(|tx| projects::insert(tx, "ws", &projects::NewProject::new("P", "")));
        assert!(matches!(result, Err(GorevError::Transient(_))));
        assert!(started.elapsed() >= Duration::from_secs(4));

        blocker.execute_batch("ROLLBACK;").unwrap();
        db.write(|tx| projects::insert(tx, "ws", &projects::NewProject::new("P", "")))
            .unwrap();
    }
}

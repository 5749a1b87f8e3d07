//! Singleton-daemon lock file
//!
//! The lock is created with `create_new` so two starters racing on an empty
//! directory cannot both win. A starter that finds an existing lock keeps it
//! only when the owning pid is alive *and* its URL answers `/api/health`;
//! anything else is stale and removed.

use super::health::is_daemon_healthy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const LOCK_DIR: &str = ".gorev-daemon";
const LOCK_FILE: &str = ".lock";

/// Attempts before giving up on a lock that keeps reappearing
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// On-disk lock record; self-describing so clients can find the daemon URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockFile {
    pub pid: u32,
    pub port: String,
    pub start_time: DateTime<Utc>,
    pub daemon_url: String,
    pub version: String,
}

impl LockFile {
    /// Lock record for the current process
    pub fn for_current_process(port: u16) -> Self {
        Self {
            pid: std::process::id(),
            port: port.to_string(),
            start_time: Utc::now(),
            daemon_url: format!("http://localhost:{}", port),
            version: crate::VERSION.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("daemon already running at {0}")]
    AlreadyRunning(String),
    #[error("failed to write lock file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("lock file {0} keeps being recreated by another process")]
    Contended(PathBuf),
}

/// `~/.gorev-daemon/.lock`, or `/tmp/.gorev-daemon/.lock` without a home directory
pub fn default_lock_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(LOCK_DIR)
        .join(LOCK_FILE)
}

/// Read the lock; `Ok(None)` when the file does not exist.
pub fn read(path: &Path) -> anyhow::Result<Option<LockFile>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(anyhow::anyhow!("failed to read lock file {}: {}", path.display(), e)),
    };
    let lock = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse lock file {}: {}", path.display(), e))?;
    Ok(Some(lock))
}

/// Remove the lock; a missing file is not an error.
pub fn remove(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn create_parent(path: &Path) -> io::Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(dir)
}

/// Create the lock file; fails with `AlreadyExists` if any lock is present.
fn write_exclusive(path: &Path, lock: &LockFile) -> io::Result<()> {
    create_parent(path)?;
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    let mut file = options.open(path)?;
    let body = serde_json::to_vec_pretty(lock).map_err(io::Error::other)?;
    file.write_all(&body)?;
    file.sync_all()
}

/// Whether a process with `pid` exists (signal 0 probe).
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_process_running(_pid: u32) -> bool {
    // No cheap probe; the health check decides
    true
}

/// Ask the process to terminate gracefully.
#[cfg(unix)]
pub fn terminate(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid).map_err(io::Error::other)?;
    // SAFETY: plain kill(2) with a validated pid
    if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "signalling the daemon is only supported on unix",
    ))
}

/// What an existing lock file turned out to be
#[derive(Debug)]
enum Existing {
    Running(LockFile),
    Stale(String),
    Vanished,
}

async fn diagnose(path: &Path) -> Existing {
    let lock = match read(path) {
        Ok(Some(lock)) => lock,
        Ok(None) => return Existing::Vanished,
        Err(e) => return Existing::Stale(e.to_string()),
    };
    if !is_process_running(lock.pid) {
        return Existing::Stale(format!("pid {} not running", lock.pid));
    }
    if !is_daemon_healthy(&lock.daemon_url).await {
        return Existing::Stale(format!("daemon unhealthy at {}", lock.daemon_url));
    }
    Existing::Running(lock)
}

/// Lock of a live, healthy daemon, or `None`. Never removes anything.
pub async fn running_daemon(path: &Path) -> Option<LockFile> {
    match diagnose(path).await {
        Existing::Running(lock) => Some(lock),
        _ => None,
    }
}

/// Held lock; removed again when released or dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) {
        self.remove_if_owned();
    }

    fn remove_if_owned(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        // A successor may have replaced a lock we failed to hold
        match read(&self.path) {
            Ok(Some(lock)) if lock.pid != self.pid => {
                debug!(path = %self.path.display(), owner = lock.pid, "Lock file owned by another process, leaving it");
                return;
            }
            _ => {}
        }
        match remove(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "Lock file removed"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove lock file"),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.remove_if_owned();
    }
}

/// Acquire the lock at `path` or report the daemon that holds it.
pub async fn acquire(path: &Path, lock: &LockFile) -> Result<LockGuard, LockError> {
    for _ in 0..MAX_ACQUIRE_ATTEMPTS {
        match write_exclusive(path, lock) {
            Ok(()) => {
                info!(path = %path.display(), pid = lock.pid, url = %lock.daemon_url, "Lock file written");
                return Ok(LockGuard {
                    path: path.to_path_buf(),
                    pid: lock.pid,
                    released: false,
                });
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(source) => {
                return Err(LockError::Write {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }

        match diagnose(path).await {
            Existing::Running(existing) => return Err(LockError::AlreadyRunning(existing.daemon_url)),
            Existing::Vanished => continue,
            Existing::Stale(reason) => {
                warn!(path = %path.display(), reason = %reason, "Removing stale lock file");
                remove(path).map_err(|source| LockError::Write {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
        }
    }
    Err(LockError::Contended(path.to_path_buf()))
}

//! Daemon process concerns: singleton lock, health probing, client
//! tracking and the server lifecycle.

pub mod client_tracker;
pub mod health;
pub mod lockfile;
pub mod server;

pub use client_tracker::{ClientInfo, ClientTracker, ClientType};
pub use health::{is_daemon_healthy, wait_for_daemon};
pub use lockfile::{default_lock_path, LockFile};
pub use server::{run_daemon, stop_daemon};

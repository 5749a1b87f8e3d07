//! Gorev
//!
//! A task-management daemon for AI assistants:
//! - Per-workspace SQLite task stores behind a single-writer data layer
//! - Unified, action-discriminated MCP tools served over HTTP
//! - A stdio MCP proxy so stdio-only clients can share one daemon
//! - WebSocket change events fanned out per workspace
//! - Lock-file singleton protocol and TTL-based client tracking

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod events;
pub mod i18n;
pub mod ide;
pub mod mcp;
pub mod store;
pub mod tasks;
pub mod watch;
pub mod workspace;

pub use error::{GorevError, Result as GorevResult};

use crate::config::{ConnectionMode, SharedConfig};
use crate::i18n::Lang;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Default HTTP port of the daemon
pub const DEFAULT_API_PORT: u16 = 5082;

/// Database used in centralized mode when `GOREV_DB_PATH` is not set
pub const DEFAULT_CENTRALIZED_DB_PATH: &str = "/data/gorev.db";

/// Build version reported by `/api/health`, the lock file and MCP `initialize`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where workspace databases live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// One database per workspace under `<workspace>/.gorev/gorev.db`
    #[default]
    Local,
    /// One shared database, rows isolated by `workspace_id`
    Centralized,
}

impl StorageMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "centralized" => Some(Self::Centralized),
            _ => None,
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: StorageMode,
    /// Explicit database path; required meaning only in centralized mode
    pub db_path: Option<PathBuf>,
    pub api_host: String,
    pub api_port: u16,
    pub lang: Lang,
    pub connection_mode: ConnectionMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: StorageMode::Local,
            db_path: None,
            api_host: "127.0.0.1".to_string(),
            api_port: DEFAULT_API_PORT,
            lang: Lang::Tr,
            connection_mode: ConnectionMode::Auto,
        }
    }
}

impl Config {
    /// Load configuration from env vars over the default shared-config file.
    pub fn from_env() -> Result<Self> {
        Self::from_env_and_file(None)
    }

    /// Load configuration from an optional shared-config file, then override with env vars.
    ///
    /// Priority: env var > `~/.gorev/config.json` > default
    pub fn from_env_and_file(shared_path: Option<&Path>) -> Result<Self> {
        // 1. Shared config file (or defaults if absent)
        let shared = SharedConfig::load(shared_path);
        let defaults = Self::default();

        // 2. Env var overrides
        let mode = env_enum("GOREV_MODE", StorageMode::parse).unwrap_or(defaults.mode);

        let db_path = std::env::var("GOREV_DB_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                (mode == StorageMode::Centralized)
                    .then(|| PathBuf::from(DEFAULT_CENTRALIZED_DB_PATH))
            });

        let api_port = std::env::var("GOREV_API_PORT")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .or_else(|| shared.server_port.trim().parse().ok())
            .unwrap_or(defaults.api_port);

        let connection_mode = env_enum("GOREV_CONNECTION_MODE", ConnectionMode::parse)
            .unwrap_or(shared.connection_mode);

        Ok(Self {
            mode,
            db_path,
            api_host: std::env::var("GOREV_API_HOST").unwrap_or(defaults.api_host),
            api_port,
            lang: env_enum("GOREV_LANG", Lang::parse).unwrap_or(defaults.lang),
            connection_mode,
        })
    }

    /// `http://localhost:<port>`, the URL advertised in the lock file
    pub fn daemon_url(&self) -> String {
        format!("http://localhost:{}", self.api_port)
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Install the global tracing subscriber.
///
/// `RUST_LOG` selects the filter; `GOREV_LOG_FORMAT=json` switches to JSON
/// lines. The stdio proxy logs to stderr without ANSI colours because stdout
/// carries JSON-RPC.
pub fn init_tracing(stdio: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,gorev=debug,tower_http=debug".into());
    let json = std::env::var("GOREV_LOG_FORMAT").is_ok_and(|v| v.trim().eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match (stdio, json) {
        (true, true) => registry.with(fmt::layer().json().with_writer(std::io::stderr)).try_init(),
        (true, false) => registry
            .with(fmt::layer().with_ansi(false).with_writer(std::io::stderr))
            .try_init(),
        (false, true) => registry.with(fmt::layer().json()).try_init(),
        (false, false) => registry.with(fmt::layer()).try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing already initialised: {e}");
    }
}

/// Read an enum-valued env var; invalid values are logged and ignored.
fn env_enum<T>(var: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    let parsed = parse(&raw);
    if parsed.is_none() {
        tracing::warn!("Ignoring invalid {}={:?}, using default", var, raw);
    }
    parsed
}

// ============================================================================
// Tests
// ============================================================================

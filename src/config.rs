//! Shared client/daemon configuration file (`~/.gorev/config.json`)
//!
//! Written by IDE extensions and the CLI to agree on how to reach the
//! daemon. The daemon only reads it as the middle layer of [`crate::Config`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How clients should reach a daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    Auto,
    Local,
    Docker,
    Remote,
}

impl ConnectionMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "local" => Some(Self::Local),
            "docker" => Some(Self::Docker),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedConfig {
    pub connection_mode: ConnectionMode,
    pub local_server_path: String,
    pub docker_compose_file: String,
    pub server_port: String,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            connection_mode: ConnectionMode::Auto,
            local_server_path: String::new(),
            docker_compose_file: String::new(),
            server_port: crate::DEFAULT_API_PORT.to_string(),
            last_updated: None,
        }
    }
}

impl SharedConfig {
    /// `~/.gorev/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".gorev").join("config.json"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing or unreadable file yields defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            return Self::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded shared config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse {}: {}. Using defaults.",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No shared config at {}, using env vars / defaults",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Persist to `path` (or the default location), refreshing `last_updated`.
    pub fn save(&mut self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(Self::default_path)
            .context("cannot resolve home directory for shared config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        self.last_updated = Some(Utc::now());
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

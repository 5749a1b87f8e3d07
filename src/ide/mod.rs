//! Editor detection and extension management
//!
//! Looks for VS Code, Cursor and Windsurf through their CLI on `PATH`, a
//! few well-known install locations, and their per-user config directory.
//! Install, update and uninstall shell out to the editor's CLI.

use crate::error::{GorevError, Result};
use crate::i18n::{self, Lang};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Marketplace id of the editor extension
pub const EXTENSION_ID: &str = "mehmetsenol.gorev-vscode";

const CLI_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdeKind {
    Vscode,
    Cursor,
    Windsurf,
}

impl IdeKind {
    pub const ALL: [IdeKind; 3] = [IdeKind::Vscode, IdeKind::Cursor, IdeKind::Windsurf];

    /// Accepted values of the `ide` argument
    pub const SELECTOR_NAMES: [&'static str; 4] = ["vscode", "cursor", "windsurf", "all"];

    pub fn as_str(&self) -> &'static str {
        match self {
            IdeKind::Vscode => "vscode",
            IdeKind::Cursor => "cursor",
            IdeKind::Windsurf => "windsurf",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            IdeKind::Vscode => "VS Code",
            IdeKind::Cursor => "Cursor",
            IdeKind::Windsurf => "Windsurf",
        }
    }

    /// Parse an `ide` selector; `all` expands to every kind.
    pub fn parse_selector(s: &str) -> Option<Vec<IdeKind>> {
        match s.trim() {
            "vscode" => Some(vec![IdeKind::Vscode]),
            "cursor" => Some(vec![IdeKind::Cursor]),
            "windsurf" => Some(vec![IdeKind::Windsurf]),
            "all" => Some(Self::ALL.to_vec()),
            _ => None,
        }
    }

    fn cli_name(&self) -> &'static str {
        match self {
            IdeKind::Vscode => "code",
            IdeKind::Cursor => "cursor",
            IdeKind::Windsurf => "windsurf",
        }
    }

    /// Per-user directory holding settings and `extensions/`
    fn config_dir_name(&self) -> &'static str {
        match self {
            IdeKind::Vscode => ".vscode",
            IdeKind::Cursor => ".cursor",
            IdeKind::Windsurf => ".windsurf",
        }
    }

    fn well_known_cli_paths(&self) -> &'static [&'static str] {
        match self {
            IdeKind::Vscode => &[
                "/usr/local/bin/code",
                "/opt/homebrew/bin/code",
                "/snap/bin/code",
                "/Applications/Visual Studio Code.app/Contents/Resources/app/bin/code",
            ],
            IdeKind::Cursor => &[
                "/usr/local/bin/cursor",
                "/opt/homebrew/bin/cursor",
                "/Applications/Cursor.app/Contents/Resources/app/bin/cursor",
            ],
            IdeKind::Windsurf => &[
                "/usr/local/bin/windsurf",
                "/opt/homebrew/bin/windsurf",
                "/Applications/Windsurf.app/Contents/Resources/app/bin/windsurf",
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectedIde {
    pub kind: IdeKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,
    pub extensions_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtensionStatus {
    pub ide: IdeKind,
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionAction {
    Install,
    Update,
    Uninstall,
}

impl ExtensionAction {
    fn cli_args(&self) -> Vec<&'static str> {
        match self {
            ExtensionAction::Install | ExtensionAction::Update => {
                vec!["--install-extension", EXTENSION_ID, "--force"]
            }
            ExtensionAction::Uninstall => vec!["--uninstall-extension", EXTENSION_ID],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub ide: IdeKind,
    pub success: bool,
    pub output: String,
}

/// Finds editors relative to a home directory and a list of `PATH` entries
#[derive(Debug, Clone)]
pub struct IdeDetector {
    home: PathBuf,
    search_path: Vec<PathBuf>,
    well_known: bool,
}

impl IdeDetector {
    /// Detector over the current user's home and `PATH`.
    pub fn from_env() -> Self {
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        let search_path = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        Self {
            home,
            search_path,
            well_known: true,
        }
    }

    /// Detector confined to the given directories; well-known system
    /// locations are not consulted.
    pub fn with_roots(home: impl Into<PathBuf>, search_path: Vec<PathBuf>) -> Self {
        Self {
            home: home.into(),
            search_path,
            well_known: false,
        }
    }

    fn find_cli(&self, kind: IdeKind) -> Option<PathBuf> {
        let on_path = self
            .search_path
            .iter()
            .map(|dir| dir.join(kind.cli_name()))
            .find(|candidate| candidate.is_file());
        if on_path.is_some() || !self.well_known {
            return on_path;
        }
        kind.well_known_cli_paths()
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file())
    }

    fn extensions_dir(&self, kind: IdeKind) -> PathBuf {
        self.home.join(kind.config_dir_name()).join("extensions")
    }

    /// An editor counts as present when its CLI or its config directory exists.
    pub fn detect(&self, kind: IdeKind) -> Option<DetectedIde> {
        let executable = self.find_cli(kind);
        let config_dir = self.home.join(kind.config_dir_name());
        if executable.is_none() && !config_dir.is_dir() {
            return None;
        }
        debug!(ide = kind.as_str(), executable = ?executable, "Detected IDE");
        Some(DetectedIde {
            kind,
            name: kind.display_name().to_string(),
            executable,
            extensions_dir: self.extensions_dir(kind),
        })
    }

    pub fn detect_all(&self) -> Vec<DetectedIde> {
        IdeKind::ALL.iter().filter_map(|k| self.detect(*k)).collect()
    }

    /// Look for `<publisher>.<name>[-<version>]` under the extensions directory.
    pub fn extension_status(&self, kind: IdeKind) -> ExtensionStatus {
        let dir = self.extensions_dir(kind);
        let prefix = format!("{EXTENSION_ID}-");
        let found = std::fs::read_dir(&dir)
            .into_iter()
            .flatten()
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .find_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                if name == EXTENSION_ID {
                    Some((entry.path(), None))
                } else {
                    name.strip_prefix(&prefix)
                        .map(|version| (entry.path(), Some(version.to_string())))
                }
            });
        match found {
            Some((path, version)) => ExtensionStatus {
                ide: kind,
                installed: true,
                version,
                path: Some(path),
            },
            None => ExtensionStatus {
                ide: kind,
                installed: false,
                version: None,
                path: None,
            },
        }
    }

    /// Run the editor CLI for `action`. A missing editor or CLI is a
    /// precondition failure; a failing CLI is reported in the outcome.
    pub async fn run(&self, kind: IdeKind, action: ExtensionAction, lang: Lang) -> Result<ActionOutcome> {
        let missing = || {
            GorevError::PreconditionFailed(i18n::tf(lang, "error.ide_not_found", &[("Ide", kind.display_name())]))
        };
        let ide = self.detect(kind).ok_or_else(missing)?;
        let executable = ide.executable.ok_or_else(missing)?;

        info!(ide = kind.as_str(), action = ?action, "Running IDE extension command");
        let output = tokio::time::timeout(
            CLI_TIMEOUT,
            tokio::process::Command::new(&executable)
                .args(action.cli_args())
                .stdin(std::process::Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| GorevError::internal(format!("{} timed out", executable.display())))??;

        let success = output.status.success();
        let text = if success {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            warn!(ide = kind.as_str(), exit_code = ?output.status.code(), "IDE extension command failed");
            String::from_utf8_lossy(&output.stderr).trim().to_string()
        };
        Ok(ActionOutcome {
            ide: kind,
            success,
            output: text,
        })
    }
}

//! Stdio MCP proxy
//!
//! Reads one JSON-RPC request per line from stdin, forwards it to the
//! daemon's MCP bridge with the proxy's workspace headers, and writes one
//! response line per request. Notifications are forwarded without a reply.
//! The proxy is cooperative: one request in flight at a time, exit on EOF.

use super::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::daemon::health::{is_daemon_healthy, wait_for_daemon};
use crate::daemon::lockfile;
use crate::workspace::WORKSPACE_DIR;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
pub const CLIENT_TTL_SECONDS: u64 = 300;
pub const AUTOSTART_TIMEOUT: Duration = Duration::from_secs(10);

pub const HEADER_WORKSPACE_ID: &str = "X-Workspace-Id";
pub const HEADER_WORKSPACE_PATH: &str = "X-Workspace-Path";
pub const HEADER_WORKSPACE_NAME: &str = "X-Workspace-Name";

/// The single workspace a proxy speaks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceContext {
    pub id: String,
    pub path: String,
    pub name: String,
}

/// Spawn-time options
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub workspace: Option<PathBuf>,
    /// Skip lock-file discovery and talk to this URL
    pub daemon_url: Option<String>,
    pub autostart: bool,
    pub lock_path: PathBuf,
    pub api_port: u16,
}

/// Command-line flags shared by `gorev mcp-proxy` and `gorev-mcp-proxy`
#[derive(Debug, Clone, clap::Args)]
pub struct ProxyArgs {
    /// Workspace directory (default: nearest `.gorev/` ancestor of the CWD)
    #[arg(long, env = "GOREV_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Daemon URL, skipping lock-file discovery
    #[arg(long)]
    pub daemon_url: Option<String>,

    /// Fail instead of starting a daemon when none is running
    #[arg(long)]
    pub no_autostart: bool,
}

impl ProxyArgs {
    pub fn into_options(self, lock_path: PathBuf, api_port: u16) -> ProxyOptions {
        ProxyOptions {
            workspace: self.workspace,
            daemon_url: self.daemon_url,
            autostart: !self.no_autostart,
            lock_path,
            api_port,
        }
    }
}

/// Resolve the workspace directory: explicit flag, `GOREV_WORKSPACE`, the
/// nearest ancestor of `cwd` holding `.gorev/`, then `cwd` itself.
pub fn discover_workspace(flag: Option<&Path>, env: Option<&str>, cwd: &Path) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Some(path) = env.map(str::trim).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    cwd.ancestors()
        .find(|dir| dir.join(WORKSPACE_DIR).is_dir())
        .unwrap_or(cwd)
        .to_path_buf()
}

/// Locate the daemon, starting one when allowed.
pub async fn resolve_daemon(options: &ProxyOptions) -> Result<String> {
    if let Some(url) = &options.daemon_url {
        if is_daemon_healthy(url).await {
            return Ok(url.clone());
        }
        if !options.autostart {
            bail!("daemon at {url} is not healthy");
        }
    } else if let Some(lock) = lockfile::running_daemon(&options.lock_path).await {
        debug!(url = %lock.daemon_url, pid = lock.pid, "Found running daemon");
        return Ok(lock.daemon_url);
    }

    if !options.autostart {
        bail!("no running daemon found (lock file {})", options.lock_path.display());
    }

    let url = options
        .daemon_url
        .clone()
        .unwrap_or_else(|| format!("http://localhost:{}", options.api_port));
    spawn_daemon()?;
    wait_for_daemon(&url, AUTOSTART_TIMEOUT).await?;
    info!(url = %url, "Daemon started");
    Ok(url)
}

/// The `gorev` binary: a sibling of the current executable, else `PATH`.
fn daemon_executable() -> PathBuf {
    let name = if cfg!(windows) { "gorev.exe" } else { "gorev" };
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(name)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(name))
}

fn spawn_daemon() -> Result<()> {
    let exe = daemon_executable();
    info!(executable = %exe.display(), "Starting daemon");
    std::process::Command::new(&exe)
        .arg("daemon")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .with_context(|| format!("failed to start {}", exe.display()))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    workspace_id: String,
}

#[derive(Debug, Deserialize)]
struct ClientRegistered {
    client_id: String,
}

/// Forwards JSON-RPC lines to a daemon on behalf of one workspace
pub struct McpProxy {
    client: reqwest::Client,
    daemon_url: String,
    workspace: WorkspaceContext,
}

impl McpProxy {
    pub fn new(daemon_url: impl Into<String>, workspace: WorkspaceContext) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            daemon_url: daemon_url.into().trim_end_matches('/').to_string(),
            workspace,
        })
    }

    /// Register `path` with the daemon and build a proxy for the returned id.
    pub async fn connect(daemon_url: &str, path: &Path) -> Result<Self> {
        let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let name = absolute
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "workspace".to_string());
        let path = absolute.display().to_string();

        let mut proxy = Self::new(
            daemon_url,
            WorkspaceContext {
                id: String::new(),
                path: path.clone(),
                name: name.clone(),
            },
        )?;
        let resp = proxy
            .client
            .post(proxy.url("/api/v1/workspaces/register"))
            .json(&json!({"name": name, "path": path}))
            .send()
            .await
            .context("workspace registration request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("workspace registration failed: HTTP {status}: {body}");
        }
        let registered: RegisterResponse = resp.json().await.context("invalid registration response")?;
        info!(workspace_id = %registered.workspace_id, path = %path, "Workspace registered");
        proxy.workspace.id = registered.workspace_id;
        Ok(proxy)
    }

    pub fn workspace(&self) -> &WorkspaceContext {
        &self.workspace
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.daemon_url, path)
    }

    /// POST `params` to the bridge for `method`.
    pub async fn forward(&self, method: &str, params: Value) -> std::result::Result<Value, JsonRpcError> {
        let resp = self
            .client
            .post(self.url(&format!("/api/v1/mcp/{method}")))
            .header(HEADER_WORKSPACE_ID, &self.workspace.id)
            .header(HEADER_WORKSPACE_PATH, &self.workspace.path)
            .header(HEADER_WORKSPACE_NAME, &self.workspace.name)
            .json(&params)
            .send()
            .await
            .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if status.as_u16() >= 400 {
            return Err(JsonRpcError::http_status(status.as_u16(), body));
        }
        Ok(body)
    }

    /// Handle one stdin line; `None` means nothing is written back.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                return Some(JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error(e.to_string())));
            }
        };

        let method = match request.validate() {
            Ok(method) => method.to_string(),
            Err(err) => {
                return (!request.is_notification()).then(|| JsonRpcResponse::error(request.response_id(), err));
            }
        };
        let params = request.params.clone().unwrap_or_else(|| json!({}));
        let result = self.forward(&method, params).await;

        if request.is_notification() {
            if let Err(err) = result {
                warn!(method = %method, code = err.code, "Notification failed: {}", err.message);
            }
            return None;
        }

        let id = request.response_id();
        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(err) => JsonRpcResponse::error(id, err),
        })
    }

    /// Process `reader` line by line until EOF.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
            if line.trim().is_empty() {
                continue;
            }
            debug!("Received: {}", line);

            if let Some(resp) = self.handle_line(&line).await {
                let json = serde_json::to_string(&resp)?;
                debug!("Sending: {}", json);
                writer.write_all(json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }

    pub async fn register_client(&self) -> Result<String> {
        let resp = self
            .client
            .post(self.url("/api/v1/daemon/clients/register"))
            .json(&json!({
                "client_type": "mcp-proxy",
                "workspace_id": self.workspace.id,
                "ttl_seconds": CLIENT_TTL_SECONDS,
            }))
            .send()
            .await?
            .error_for_status()?;
        let registered: ClientRegistered = resp.json().await?;
        Ok(registered.client_id)
    }

    pub async fn heartbeat(&self, client_id: &str) -> Result<()> {
        self.client
            .post(self.url("/api/v1/daemon/heartbeat"))
            .json(&json!({"client_id": client_id, "ttl_seconds": CLIENT_TTL_SECONDS}))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn unregister_client(&self, client_id: &str) -> Result<()> {
        self.client
            .post(self.url("/api/v1/daemon/clients/unregister"))
            .json(&json!({"client_id": client_id}))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Serve stdin/stdout with client registration and heartbeats.
    pub async fn run_stdio(self: std::sync::Arc<Self>) -> Result<()> {
        let client_id = match self.register_client().await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Client registration failed: {}", e);
                None
            }
        };

        let stop = CancellationToken::new();
        let heartbeat = client_id.clone().map(|id| {
            let proxy = std::sync::Arc::clone(&self);
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = proxy.heartbeat(&id).await {
                                warn!("Heartbeat failed: {}", e);
                            }
                        }
                        _ = stop.cancelled() => break,
                    }
                }
            })
        });

        info!(workspace_id = %self.workspace.id, daemon = %self.daemon_url, "MCP proxy serving stdio");
        let served = self
            .serve(tokio::io::BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await;

        stop.cancel();
        if let Some(handle) = heartbeat {
            let _ = handle.await;
        }
        if let Some(id) = client_id {
            if let Err(e) = self.unregister_client(&id).await {
                warn!("Client unregistration failed: {}", e);
            }
        }
        if let Err(e) = &served {
            error!("MCP proxy stopped: {:#}", e);
        }
        info!("MCP proxy shutting down");
        served
    }
}

/// Entry point shared by `gorev mcp-proxy` and the `gorev-mcp-proxy` binary.
pub async fn run(options: ProxyOptions) -> Result<()> {
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    let env = std::env::var("GOREV_WORKSPACE").ok();
    let workspace = discover_workspace(options.workspace.as_deref(), env.as_deref(), &cwd);

    let daemon_url = resolve_daemon(&options).await?;
    let proxy = McpProxy::connect(&daemon_url, &workspace).await?;
    std::sync::Arc::new(proxy).run_stdio().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_prefers_flag_then_env() {
        let cwd = TempDir::new().unwrap();
        assert_eq!(
            discover_workspace(Some(Path::new("/flag")), Some("/env"), cwd.path()),
            PathBuf::from("/flag")
        );
        assert_eq!(discover_workspace(None, Some("/env"), cwd.path()), PathBuf::from("/env"));
        assert_eq!(discover_workspace(None, Some("  "), cwd.path()), cwd.path());
    }

    #[test]
    fn test_discover_walks_up_to_marker() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join(WORKSPACE_DIR)).unwrap();
        let nested = root.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(discover_workspace(None, None, &nested), root.path());
    }

    fn offline_proxy() -> McpProxy {
        McpProxy::new(
            "http://127.0.0.1:1",
            WorkspaceContext {
                id: "ws".into(),
                path: "/tmp/ws".into(),
                name: "ws".into(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_parse_error_has_null_id() {
        let resp = offline_proxy().handle_line("{not json").await.unwrap();
        assert_eq!(resp.id, Value::Null);
        assert_eq!(resp.error.unwrap().code, JsonRpcError::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_invalid_request_keeps_id() {
        let proxy = offline_proxy();
        let resp = proxy
            .handle_line(r#"{"jsonrpc":"1.0","id":7,"method":"ping"}"#)
            .await
            .unwrap();
        assert_eq!(resp.id, json!(7));
        assert_eq!(resp.error.unwrap().code, JsonRpcError::INVALID_REQUEST);

        assert!(proxy.handle_line(r#"{"jsonrpc":"2.0"}"#).await.is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_is_internal_error() {
        let resp = offline_proxy()
            .handle_line(r#"{"jsonrpc":"2.0","id":"a","method":"ping"}"#)
            .await
            .unwrap();
        assert_eq!(resp.id, json!("a"));
        assert_eq!(resp.error.unwrap().code, JsonRpcError::INTERNAL_ERROR);
    }
}

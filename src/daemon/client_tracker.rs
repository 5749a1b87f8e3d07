//! TTL-bounded registry of connected clients
//!
//! Clients announce themselves with a heartbeat; each heartbeat pushes
//! `expires_at` forward by the client's TTL. A background sweep removes
//! expired entries every 30 seconds. Snapshots never include expired
//! entries, even between sweeps.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Interval of the expiry sweep
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// TTL applied when a client does not ask for one
pub const DEFAULT_CLIENT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientType {
    Vscode,
    McpProxy,
    WebUi,
}

impl ClientType {
    pub const NAMES: [&'static str; 3] = ["vscode", "mcp-proxy", "web-ui"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Vscode => "vscode",
            ClientType::McpProxy => "mcp-proxy",
            ClientType::WebUi => "web-ui",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "vscode" => Some(ClientType::Vscode),
            "mcp-proxy" => Some(ClientType::McpProxy),
            "web-ui" => Some(ClientType::WebUi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: String,
    pub client_type: ClientType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ClientInfo {
    pub fn new(client_id: impl Into<String>, client_type: ClientType, workspace_id: Option<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            client_id: client_id.into(),
            client_type,
            workspace_id,
            connected_at: now,
            last_activity: now,
            expires_at: now + to_chrono(ttl),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

fn to_chrono(ttl: Duration) -> ChronoDuration {
    ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(365))
}

/// `client-<pid>-<nanos>`
pub fn generate_client_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("client-{}-{}", std::process::id(), nanos)
}

/// Shared client table; clone the `Arc` to share it
#[derive(Debug, Default)]
pub struct ClientTracker {
    clients: RwLock<HashMap<String, ClientInfo>>,
}

impl ClientTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawn the expiry sweep; it stops when `shutdown` is cancelled.
    pub fn start_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = tracker.sweep_expired();
                        if removed > 0 {
                            debug!(removed, "Expired clients swept");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Client sweep stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Insert or replace a client record.
    pub fn register(&self, client: ClientInfo) {
        info!(
            client_id = %client.client_id,
            client_type = client.client_type.as_str(),
            workspace_id = ?client.workspace_id,
            "Client registered"
        );
        self.clients.write().insert(client.client_id.clone(), client);
    }

    pub fn unregister(&self, client_id: &str) -> bool {
        let removed = self.clients.write().remove(client_id).is_some();
        if removed {
            info!(client_id = %client_id, "Client unregistered");
        }
        removed
    }

    /// Refresh a client's expiry; false when the id is unknown.
    pub fn update_activity(&self, client_id: &str, ttl: Duration) -> bool {
        let mut clients = self.clients.write();
        match clients.get_mut(client_id) {
            Some(client) => {
                client.last_activity = Utc::now();
                client.expires_at = client.last_activity + to_chrono(ttl);
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        let now = Utc::now();
        self.clients
            .read()
            .values()
            .filter(|c| !c.is_expired_at(now))
            .count()
    }

    pub fn count_by_type(&self, client_type: ClientType) -> usize {
        let now = Utc::now();
        self.clients
            .read()
            .values()
            .filter(|c| c.client_type == client_type && !c.is_expired_at(now))
            .count()
    }

    /// Active counts for every client type, zeros included
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let now = Utc::now();
        let mut by_type: BTreeMap<&'static str, usize> =
            ClientType::NAMES.iter().map(|name| (*name, 0)).collect();
        for client in self.clients.read().values() {
            if !client.is_expired_at(now) {
                *by_type.entry(client.client_type.as_str()).or_default() += 1;
            }
        }
        by_type
    }

    /// Non-expired clients, oldest connection first
    pub fn clients(&self) -> Vec<ClientInfo> {
        let now = Utc::now();
        let mut clients: Vec<ClientInfo> = self
            .clients
            .read()
            .values()
            .filter(|c| !c.is_expired_at(now))
            .cloned()
            .collect();
        clients.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        clients
    }

    /// Drop expired entries; returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut clients = self.clients.write();
        let before = clients.len();
        clients.retain(|_, c| !c.is_expired_at(now));
        before - clients.len()
    }
}

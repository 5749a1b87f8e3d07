//! Workspace-scoped fan-out of change events
//!
//! A single task owns the subscriber map and serves three inbound channels
//! (register, unregister, broadcast). Each subscriber gets a bounded queue;
//! a subscriber whose queue is full when an event arrives is dropped on the
//! spot, closing its queue so its write pump ends.

use super::types::{ChangeEvent, EventEmitter};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outbound queue per subscriber
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

const INBOUND_CAPACITY: usize = 1024;

struct Registration {
    workspace_id: String,
    client_id: String,
    sender: mpsc::Sender<ChangeEvent>,
}

struct Unregistration {
    workspace_id: String,
    client_id: String,
}

/// Events for one subscriber, in hub receipt order
#[derive(Debug)]
pub struct Subscription {
    pub client_id: String,
    pub workspace_id: String,
    pub events: mpsc::Receiver<ChangeEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HubStats {
    pub total_clients: usize,
    /// Subscriber count per workspace
    pub workspaces: BTreeMap<String, usize>,
}

/// Handle to the hub loop; cheap to clone
#[derive(Clone)]
pub struct EventHub {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<Unregistration>,
    broadcast_tx: mpsc::Sender<ChangeEvent>,
    /// Counts only; written by the loop on structural changes
    counts: Arc<RwLock<BTreeMap<String, usize>>>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub").field("stats", &self.stats()).finish()
    }
}

impl EventHub {
    /// Spawn the hub loop; it stops when `shutdown` is cancelled.
    pub fn start(shutdown: CancellationToken) -> Self {
        let (register_tx, register_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(INBOUND_CAPACITY);
        let counts = Arc::new(RwLock::new(BTreeMap::new()));

        let hub_loop = HubLoop {
            subscribers: HashMap::new(),
            counts: counts.clone(),
        };
        tokio::spawn(hub_loop.run(register_rx, unregister_rx, broadcast_rx, shutdown));

        Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            counts,
        }
    }

    /// Register a subscriber; `None` once the hub has stopped.
    pub async fn subscribe(&self, workspace_id: &str, client_id: &str) -> Option<Subscription> {
        let (sender, events) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        self.register_tx
            .send(Registration {
                workspace_id: workspace_id.to_string(),
                client_id: client_id.to_string(),
                sender,
            })
            .await
            .ok()?;
        Some(Subscription {
            client_id: client_id.to_string(),
            workspace_id: workspace_id.to_string(),
            events,
        })
    }

    pub async fn unsubscribe(&self, workspace_id: &str, client_id: &str) {
        let _ = self
            .unregister_tx
            .send(Unregistration {
                workspace_id: workspace_id.to_string(),
                client_id: client_id.to_string(),
            })
            .await;
    }

    /// Enqueue an event; waits while the inbound queue is full.
    pub async fn publish(&self, event: ChangeEvent) {
        if self.broadcast_tx.send(event).await.is_err() {
            debug!("Event hub stopped, event discarded");
        }
    }

    pub fn stats(&self) -> HubStats {
        let counts = self.counts.read();
        HubStats {
            total_clients: counts.values().sum(),
            workspaces: counts.clone(),
        }
    }

    pub fn client_count(&self, workspace_id: &str) -> usize {
        self.counts.read().get(workspace_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl EventEmitter for EventHub {
    async fn emit(&self, event: ChangeEvent) {
        self.publish(event).await
    }
}

struct HubLoop {
    subscribers: HashMap<String, HashMap<String, mpsc::Sender<ChangeEvent>>>,
    counts: Arc<RwLock<BTreeMap<String, usize>>>,
}

impl HubLoop {
    async fn run(
        mut self,
        mut register_rx: mpsc::Receiver<Registration>,
        mut unregister_rx: mpsc::Receiver<Unregistration>,
        mut broadcast_rx: mpsc::Receiver<ChangeEvent>,
        shutdown: CancellationToken,
    ) {
        info!("Event hub started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(reg) = register_rx.recv() => self.register(reg),
                Some(unreg) = unregister_rx.recv() => self.unregister(&unreg.workspace_id, &unreg.client_id),
                Some(event) = broadcast_rx.recv() => self.deliver(event),
                else => break,
            }
        }
        // Dropping the senders ends every write pump
        self.subscribers.clear();
        self.counts.write().clear();
        info!("Event hub stopped");
    }

    fn register(&mut self, reg: Registration) {
        debug!(workspace_id = %reg.workspace_id, client_id = %reg.client_id, "Subscriber registered");
        self.subscribers
            .entry(reg.workspace_id.clone())
            .or_default()
            .insert(reg.client_id, reg.sender);
        self.refresh_count(&reg.workspace_id);
    }

    fn unregister(&mut self, workspace_id: &str, client_id: &str) {
        let Some(clients) = self.subscribers.get_mut(workspace_id) else {
            return;
        };
        if clients.remove(client_id).is_some() {
            debug!(workspace_id = %workspace_id, client_id = %client_id, "Subscriber unregistered");
        }
        if clients.is_empty() {
            self.subscribers.remove(workspace_id);
        }
        self.refresh_count(workspace_id);
    }

    fn deliver(&mut self, event: ChangeEvent) {
        let Some(clients) = self.subscribers.get(&event.workspace_id) else {
            return;
        };

        let mut dropped = Vec::new();
        for (client_id, sender) in clients {
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        workspace_id = %event.workspace_id,
                        client_id = %client_id,
                        "Subscriber queue full, dropping slow client"
                    );
                    dropped.push(client_id.clone());
                }
                Err(TrySendError::Closed(_)) => dropped.push(client_id.clone()),
            }
        }

        let workspace_id = event.workspace_id;
        for client_id in dropped {
            self.unregister(&workspace_id, &client_id);
        }
    }

    fn refresh_count(&self, workspace_id: &str) {
        let n = self.subscribers.get(workspace_id).map_or(0, HashMap::len);
        let mut counts = self.counts.write();
        if n == 0 {
            counts.remove(workspace_id);
        } else {
            counts.insert(workspace_id.to_string(), n);
        }
    }
}

//! WebSocket handler for workspace change events

use super::handlers::AppState;
use crate::daemon::client_tracker::generate_client_id;
use crate::events::{ChangeEvent, EventType};
use crate::mcp::proxy::HEADER_WORKSPACE_ID;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Close code for a connection without a workspace (policy violation)
const CLOSE_POLICY: u16 = 1008;

#[derive(Debug, Deserialize, Default)]
pub struct WsQuery {
    pub workspace_id: Option<String>,
}

/// WebSocket upgrade handler for `/ws`
pub async fn ws_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let workspace_id = query
        .workspace_id
        .or_else(|| {
            headers
                .get(HEADER_WORKSPACE_ID)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    ws.on_upgrade(move |socket| async move {
        match workspace_id {
            Some(workspace_id) => handle_ws(socket, state, workspace_id).await,
            None => reject(socket).await,
        }
    })
}

async fn reject(mut socket: WebSocket) {
    debug!("WebSocket connection without workspace id, closing");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY,
            reason: "workspace_id required".into(),
        })))
        .await;
}

/// Reply for an inbound text frame; only `{"type":"ping"}` gets one.
fn reply_to(text: &str) -> Option<Value> {
    let msg: Value = serde_json::from_str(text).ok()?;
    (msg.get("type").and_then(Value::as_str) == Some("ping")).then(|| {
        json!({
            "type": "pong",
            "timestamp": msg.get("timestamp").cloned().unwrap_or(Value::Null),
        })
    })
}

fn greeting(workspace_id: &str, client_id: &str) -> ChangeEvent {
    ChangeEvent::new(EventType::WorkspaceSync, workspace_id)
        .with_action("connected")
        .with_data(json!({
            "client_id": client_id,
            "message": "connected to workspace events",
        }))
}

/// Handle an individual WebSocket connection
async fn handle_ws(socket: WebSocket, state: AppState, workspace_id: String) {
    let client_id = generate_client_id();
    let Some(mut subscription) = state.hub.subscribe(&workspace_id, &client_id).await else {
        warn!(workspace_id = %workspace_id, "Event hub stopped, refusing WebSocket client");
        return;
    };
    info!(workspace_id = %workspace_id, client_id = %client_id, "WebSocket client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    if let Ok(hello) = serde_json::to_string(&greeting(&workspace_id, &client_id)) {
        if ws_sender.send(Message::Text(hello.into())).await.is_err() {
            state.hub.unsubscribe(&workspace_id, &client_id).await;
            return;
        }
    }

    let mut ping_interval = interval(PING_INTERVAL);
    // Skip the first immediate tick
    ping_interval.tick().await;

    loop {
        tokio::select! {
            // Queue closed means the hub dropped us as a slow consumer
            event = subscription.events.recv() => {
                let Some(event) = event else {
                    debug!(client_id = %client_id, "Event queue closed, disconnecting");
                    break;
                };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                            debug!("WebSocket send failed, client disconnected");
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to serialize ChangeEvent: {}", e),
                }
            }

            _ = ping_interval.tick() => {
                if ws_sender.send(Message::Ping(vec![].into())).await.is_err() {
                    debug!("Ping failed, client disconnected");
                    break;
                }
            }

            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = reply_to(text.as_str()) {
                            if ws_sender.send(Message::Text(reply.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.hub.unsubscribe(&workspace_id, &client_id).await;
    let _ = ws_sender.close().await;
    info!(workspace_id = %workspace_id, client_id = %client_id, "WebSocket connection closed");
}

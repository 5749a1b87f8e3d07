//! HTTP surface tests
//!
//! Drive the router in-process with `tower::ServiceExt::oneshot`; each test
//! gets its own registry and temporary workspace directories.

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use gorev::api::{create_router, AppState, ServerState};
use gorev::daemon::ClientTracker;
use gorev::events::{EventHub, EventType};
use gorev::workspace::WorkspaceRegistry;
use gorev::Config;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: AppState,
    _dirs: Vec<TempDir>,
}

fn test_app() -> TestApp {
    let shutdown = CancellationToken::new();
    let state = Arc::new(ServerState {
        registry: Arc::new(WorkspaceRegistry::local()),
        hub: EventHub::start(shutdown.clone()),
        tracker: ClientTracker::new(),
        config: Config::default(),
        shutdown,
        started_at: Instant::now(),
    });
    TestApp {
        router: create_router(state.clone()),
        state,
        _dirs: Vec::new(),
    }
}

impl TestApp {
    async fn call(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn send(&self, method: Method, uri: &str, workspace: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("accept-language", "en");
        if let Some(id) = workspace {
            builder = builder.header("X-Workspace-Id", id);
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.call(req).await
    }

    /// Register a fresh temporary directory and return its workspace id.
    async fn workspace(&mut self, name: &str) -> String {
        let dir = TempDir::new().unwrap();
        let (status, body) = self
            .send(
                Method::POST,
                "/api/v1/workspaces/register",
                None,
                Some(json!({"name": name, "path": dir.path().display().to_string()})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        self._dirs.push(dir);
        body["workspace_id"].as_str().unwrap().to_string()
    }

    /// Create and activate a project in `ws`.
    async fn project(&self, ws: &str, name: &str) -> String {
        let (status, project) = self
            .send(Method::POST, "/api/v1/projects", Some(ws), Some(json!({"name": name})))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{project}");
        let id = project["id"].as_str().unwrap().to_string();
        let (status, _) = self
            .send(Method::PUT, &format!("/api/v1/projects/{id}/activate"), Some(ws), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        id
    }

    async fn task(&self, ws: &str, title: &str) -> String {
        let (status, task) = self
            .send(
                Method::POST,
                "/api/v1/tasks/from-template",
                Some(ws),
                Some(json!({
                    "template_id": "feature",
                    "values": {"title": title, "description": "d", "purpose": "p", "criteria": "c"}
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{task}");
        task["id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app();
    let (status, body) = app.send(Method::GET, "/api/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], gorev::VERSION);
    assert_eq!(body["mode"], "local");
    assert_eq!(body["workspaces"], 0);
}

#[tokio::test]
async fn test_workspace_registration_is_idempotent() {
    let mut app = test_app();
    let dir = TempDir::new().unwrap();
    let body = json!({"name": "demo", "path": dir.path().display().to_string()});

    let (_, first) = app
        .send(Method::POST, "/api/v1/workspaces/register", None, Some(body.clone()))
        .await;
    let (_, second) = app
        .send(Method::POST, "/api/v1/workspaces/register", None, Some(body))
        .await;
    assert_eq!(first["created"], true);
    assert_eq!(second["created"], false);
    assert_eq!(first["workspace_id"], second["workspace_id"]);
    app._dirs.push(dir);

    let (status, list) = app.send(Method::GET, "/api/v1/workspaces", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);
}

#[tokio::test]
async fn test_get_and_unregister_workspace() {
    let mut app = test_app();
    let ws = app.workspace("lookup").await;

    let (status, info) = app.send(Method::GET, &format!("/api/v1/workspaces/{ws}"), None, None).await;
    assert_eq!(status, StatusCode::OK, "{info}");
    assert_eq!(info["id"], ws.as_str());
    assert_eq!(info["name"], "lookup");

    let (status, body) = app
        .send(Method::DELETE, &format!("/api/v1/workspaces/{ws}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workspace_id"], ws.as_str());

    let (status, body) = app.send(Method::GET, &format!("/api/v1/workspaces/{ws}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
    let (status, _) = app
        .send(Method::DELETE, &format!("/api/v1/workspaces/{ws}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_register_missing_path_is_validation_error() {
    let app = test_app();
    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/workspaces/register",
            None,
            Some(json!({"path": "/definitely/not/here/gorev"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn test_task_routes_require_workspace() {
    let app = test_app();
    let (status, body) = app.send(Method::GET, "/api/v1/tasks", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let (status, body) = app.send(Method::GET, "/api/v1/tasks", Some("nope"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_task_lifecycle_over_rest() {
    let mut app = test_app();
    let ws = app.workspace("lifecycle").await;
    app.project(&ws, "Core").await;
    let id = app.task(&ws, "Write docs").await;

    let (status, task) = app
        .send(Method::PUT, &format!("/api/v1/tasks/{id}"), Some(&ws), Some(json!({"status": "in_progress"})))
        .await;
    assert_eq!(status, StatusCode::OK, "{task}");
    assert_eq!(task["status"], "in_progress");

    let (status, list) = app.send(Method::GET, "/api/v1/tasks?limit=500", Some(&ws), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);
    assert_eq!(list["limit"], 200);

    let (status, _) = app
        .send(Method::DELETE, &format!("/api/v1/tasks/{id}"), Some(&ws), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(Method::GET, &format!("/api/v1/tasks/{id}"), Some(&ws), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains(&id));
}

#[tokio::test]
async fn test_rejected_status_change_keeps_the_edit_out() {
    let mut app = test_app();
    let ws = app.workspace("atomic").await;
    app.project(&ws, "Core").await;
    let id = app.task(&ws, "Original").await;
    let mut sub = app.state.hub.subscribe(&ws, "watcher").await.unwrap();

    // pending -> completed is not a legal transition
    let (status, body) = app
        .send(
            Method::PUT,
            &format!("/api/v1/tasks/{id}"),
            Some(&ws),
            Some(json!({"title": "Changed", "status": "completed"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(body["kind"], "precondition_failed");

    let (_, detail) = app.send(Method::GET, &format!("/api/v1/tasks/{id}"), Some(&ws), None).await;
    assert_eq!(detail["task"]["title"], "Original");
    assert_eq!(detail["task"]["status"], "pending");

    let (status, task) = app
        .send(
            Method::PUT,
            &format!("/api/v1/tasks/{id}"),
            Some(&ws),
            Some(json!({"title": "Changed", "status": "in_progress"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{task}");
    assert_eq!(task["title"], "Changed");
    assert_eq!(task["status"], "in_progress");

    // A later creation marks the end of the updates to count
    let marker = app.task(&ws, "Marker").await;
    let updates = tokio::time::timeout(Duration::from_secs(5), async {
        let mut updates = Vec::new();
        loop {
            let event = sub.events.recv().await.expect("subscription closed");
            match event.event_type {
                EventType::TaskCreated if event.entity_id.as_deref() == Some(marker.as_str()) => break,
                EventType::TaskUpdated => updates.push(event),
                _ => {}
            }
        }
        updates
    })
    .await
    .expect("marker event not received");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].entity_id.as_deref(), Some(id.as_str()));
}

#[tokio::test]
async fn test_invalid_status_lists_accepted_values() {
    let mut app = test_app();
    let ws = app.workspace("enum").await;
    app.project(&ws, "Core").await;
    let id = app.task(&ws, "T").await;

    let (status, body) = app
        .send(Method::PUT, &format!("/api/v1/tasks/{id}"), Some(&ws), Some(json!({"status": "finished"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("pending"));
    assert!(message.contains("completed"));
}

#[tokio::test]
async fn test_missing_dependency_target_is_not_found() {
    let mut app = test_app();
    let ws = app.workspace("deps").await;
    app.project(&ws, "Core").await;
    let id = app.task(&ws, "Source").await;

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/tasks/{id}/dependencies"),
            Some(&ws),
            Some(json!({"target_id": "ghost", "kind": "blocker"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_delete_project_cascades_to_tasks() {
    let mut app = test_app();
    let ws = app.workspace("cascade").await;
    let project = app.project(&ws, "Doomed").await;
    app.task(&ws, "One").await;
    app.task(&ws, "Two").await;

    let (status, _) = app
        .send(Method::DELETE, &format!("/api/v1/projects/{project}"), Some(&ws), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, list) = app
        .send(Method::GET, "/api/v1/tasks?all_projects=true", Some(&ws), None)
        .await;
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn test_mcp_bridge_protocol_and_tools() {
    let mut app = test_app();
    let ws = app.workspace("bridge").await;

    let (status, init) = app
        .send(
            Method::POST,
            "/api/v1/mcp/initialize",
            None,
            Some(json!({"protocolVersion": "2024-11-05", "capabilities": {}})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(init["serverInfo"]["name"], "gorev");

    let (status, tools) = app.send(Method::POST, "/api/v1/mcp/tools/list", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(tools["tools"].as_array().unwrap().len() >= 20);

    let (status, created) = app
        .send(Method::POST, "/api/v1/mcp/proje_olustur", Some(&ws), Some(json!({"name": "Bridge"})))
        .await;
    assert_eq!(status, StatusCode::OK, "{created}");
    assert!(created["content"][0]["text"].as_str().unwrap().contains("Bridge"));

    let (status, listed) = app
        .send(
            Method::POST,
            "/api/v1/mcp/tools/call",
            Some(&ws),
            Some(json!({"name": "proje_listele", "arguments": {}})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(listed["content"][0]["text"].as_str().unwrap().contains("Bridge"));
}

#[tokio::test]
async fn test_mcp_bridge_errors() {
    let mut app = test_app();
    let ws = app.workspace("errors").await;

    let (status, body) = app.send(Method::POST, "/api/v1/mcp/no_such_tool", Some(&ws), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    let (status, body) = app
        .send(Method::POST, "/api/v1/mcp/gorev_context", Some(&ws), Some(json!({"action": "explode"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("set_active"));

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/mcp/proje_listele")
        .header("X-Workspace-Id", &ws)
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = app.call(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_client_register_heartbeat_unregister() {
    let app = test_app();
    let (status, registered) = app
        .send(
            Method::POST,
            "/api/v1/daemon/clients/register",
            None,
            Some(json!({"client_type": "mcp-proxy"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{registered}");
    let client_id = registered["client_id"].as_str().unwrap().to_string();

    let (_, count) = app.send(Method::GET, "/api/v1/daemon/clients/count", None, None).await;
    assert_eq!(count["total"], 1);

    let (_, beat) = app
        .send(Method::POST, "/api/v1/daemon/heartbeat", None, Some(json!({"client_id": client_id})))
        .await;
    assert_eq!(beat["reregistered"], false);

    let (_, gone) = app
        .send(Method::POST, "/api/v1/daemon/clients/unregister", None, Some(json!({"client_id": client_id})))
        .await;
    assert_eq!(gone["success"], true);
    assert_eq!(app.state.tracker.active_count(), 0);

    // A heartbeat after expiry brings the client back
    let (_, beat) = app
        .send(Method::POST, "/api/v1/daemon/heartbeat", None, Some(json!({"client_id": client_id})))
        .await;
    assert_eq!(beat["reregistered"], true);
    assert_eq!(app.state.tracker.active_count(), 1);
}

#[tokio::test]
async fn test_invalid_client_type_is_rejected() {
    let app = test_app();
    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/daemon/clients/register",
            None,
            Some(json!({"client_type": "toaster"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("mcp-proxy"));
}

fn shutdown_request(peer: Option<SocketAddr>) -> Request<Body> {
    let mut req = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/daemon/shutdown")
        .body(Body::empty())
        .unwrap();
    if let Some(addr) = peer {
        req.extensions_mut().insert(ConnectInfo(addr));
    }
    req
}

#[tokio::test]
async fn test_shutdown_only_from_loopback() {
    let app = test_app();

    let (status, _) = app.call(shutdown_request(None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.call(shutdown_request(Some("10.1.2.3:4000".parse().unwrap()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!app.state.shutdown.is_cancelled());

    let (status, body) = app.call(shutdown_request(Some("127.0.0.1:4000".parse().unwrap()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(app.state.shutdown.is_cancelled());
}

#[tokio::test]
async fn test_ws_stats_start_empty() {
    let app = test_app();
    let (status, body) = app.send(Method::GET, "/api/v1/ws/stats", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_clients"], 0);
}

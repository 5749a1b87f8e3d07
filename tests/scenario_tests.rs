//! End-to-end scenarios: daemon start-up, workspace isolation, event
//! fan-out and hierarchy protection.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use gorev::api::{create_router, AppState, ServerState};
use gorev::daemon::{self, lockfile, wait_for_daemon, ClientTracker, LockFile};
use gorev::events::{ChangeEvent, EventHub, EventType};
use gorev::workspace::WorkspaceRegistry;
use gorev::Config;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Every field named `id`, at any depth, holds a string.
fn assert_ids_are_strings(value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == "id" {
                    assert!(child.is_string(), "id is not a string: {child}");
                }
                assert_ids_are_strings(child);
            }
        }
        Value::Array(items) => items.iter().for_each(assert_ids_are_strings),
        _ => {}
    }
}

struct Harness {
    router: Router,
    state: AppState,
    _dirs: Vec<TempDir>,
}

impl Harness {
    fn new() -> Self {
        let shutdown = CancellationToken::new();
        let state = Arc::new(ServerState {
            registry: Arc::new(WorkspaceRegistry::local()),
            hub: EventHub::start(shutdown.clone()),
            tracker: ClientTracker::new(),
            config: Config::default(),
            shutdown,
            started_at: Instant::now(),
        });
        Self {
            router: create_router(state.clone()),
            state,
            _dirs: Vec::new(),
        }
    }

    async fn send(&self, method: Method, uri: &str, workspace: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("X-Workspace-Id", workspace)
            .header("accept-language", "en")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_ids_are_strings(&body);
        (status, body)
    }

    async fn get(&self, uri: &str, workspace: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .uri(uri)
            .header("X-Workspace-Id", workspace)
            .header("accept-language", "en")
            .body(Body::empty())
            .unwrap();
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_ids_are_strings(&body);
        (status, body)
    }

    /// Register a temporary directory with an active project.
    async fn workspace(&mut self, name: &str) -> String {
        let dir = TempDir::new().unwrap();
        let workspace = self
            .state
            .registry
            .register(Some(name), dir.path())
            .unwrap();
        self._dirs.push(dir);

        let (status, project) = self
            .send(Method::POST, "/api/v1/projects", &workspace.id, json!({"name": format!("{name} project")}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let project_id = project["id"].as_str().unwrap().to_string();
        let (status, _) = self
            .send(Method::PUT, &format!("/api/v1/projects/{project_id}/activate"), &workspace.id, json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
        workspace.id.clone()
    }

    async fn task(&self, workspace: &str, title: &str) -> String {
        let (status, task) = self
            .send(
                Method::POST,
                "/api/v1/tasks/from-template",
                workspace,
                json!({
                    "template_id": "feature",
                    "values": {"title": title, "description": "d", "purpose": "p", "criteria": "c"}
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{task}");
        task["id"].as_str().unwrap().to_string()
    }

    async fn subtask(&self, workspace: &str, parent: &str, title: &str) -> String {
        let (status, task) = self
            .send(
                Method::POST,
                &format!("/api/v1/tasks/{parent}/subtasks"),
                workspace,
                json!({"title": title}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{task}");
        task["id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn test_health_probe_before_start() {
    let url = format!("http://127.0.0.1:{}", free_port().await);

    assert!(!daemon::is_daemon_healthy(&url).await);
    let err = wait_for_daemon(&url, Duration::from_secs(2)).await.unwrap_err();
    assert_eq!(err.to_string(), "timeout waiting for daemon to be ready after 2s");
}

#[cfg(unix)]
#[tokio::test]
async fn test_stale_lock_is_replaced_on_start() {
    let dir = TempDir::new().unwrap();
    let lock_path = dir.path().join(".lock");
    let port = free_port().await;

    let mut stale = LockFile::for_current_process(port);
    stale.pid = 99_999;
    std::fs::write(&lock_path, serde_json::to_vec(&stale).unwrap()).unwrap();

    let config = Config {
        api_port: port,
        ..Config::default()
    };
    let daemon_task = {
        let lock_path = lock_path.clone();
        tokio::spawn(async move { daemon::run_daemon(config, &lock_path).await })
    };

    let url = format!("http://127.0.0.1:{port}");
    wait_for_daemon(&url, Duration::from_secs(10)).await.unwrap();

    let lock = lockfile::read(&lock_path).unwrap().unwrap();
    assert_eq!(lock.pid, std::process::id());
    assert_eq!(lock.port, port.to_string());

    let resp = reqwest::Client::new()
        .post(format!("{url}/api/v1/daemon/shutdown"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    tokio::time::timeout(Duration::from_secs(10), daemon_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!lock_path.exists());
}

#[tokio::test]
async fn test_workspace_isolation() {
    let mut h = Harness::new();
    let a = h.workspace("a").await;
    let b = h.workspace("b").await;
    h.task(&a, "T").await;

    let (status, list) = h.get("/api/v1/tasks", &a).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);
    assert_eq!(list["items"][0]["title"], "T");

    let (status, list) = h.get("/api/v1/tasks", &b).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 0);
}

async fn next_task_created(events: &mut tokio::sync::mpsc::Receiver<ChangeEvent>) -> ChangeEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("subscription closed");
            if event.event_type == EventType::TaskCreated {
                return event;
            }
        }
    })
    .await
    .expect("no task_created event")
}

#[tokio::test]
async fn test_event_fan_out_is_workspace_scoped() {
    let mut h = Harness::new();
    let w = h.workspace("w").await;
    let other = h.workspace("other").await;

    let mut c1 = h.state.hub.subscribe(&w, "c1").await.unwrap();
    let mut c2 = h.state.hub.subscribe(&w, "c2").await.unwrap();
    let mut c3 = h.state.hub.subscribe(&other, "c3").await.unwrap();

    let id = h.task(&w, "Fan out").await;

    for sub in [&mut c1, &mut c2] {
        let event = next_task_created(&mut sub.events).await;
        assert_eq!(event.workspace_id, w);
        assert_eq!(event.entity_id.as_deref(), Some(id.as_str()));
        assert_ids_are_strings(&serde_json::to_value(&event).unwrap());
    }

    // Both W subscribers have their event, so the hub is past it
    assert!(c3.events.try_recv().is_err());
    assert_eq!(h.state.hub.client_count(&w), 2);
    assert_eq!(h.state.hub.client_count(&other), 1);
}

#[tokio::test]
async fn test_cycle_is_rejected_and_hierarchy_kept() {
    let mut h = Harness::new();
    let w = h.workspace("cycles").await;
    let a = h.task(&w, "A").await;
    let b = h.subtask(&w, &a, "B").await;
    let c = h.subtask(&w, &b, "C").await;

    let (status, body) = h
        .send(Method::PUT, &format!("/api/v1/tasks/{a}/parent"), &w, json!({"parent_id": c}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "precondition_failed");
    assert!(body["error"].as_str().unwrap().to_lowercase().contains("cycle"));

    let (_, subtasks) = h.get(&format!("/api/v1/tasks/{a}/subtasks"), &w).await;
    assert_eq!(subtasks["total"], 1);
    assert_eq!(subtasks["tasks"][0]["id"], b.as_str());
    let (_, subtasks) = h.get(&format!("/api/v1/tasks/{b}/subtasks"), &w).await;
    assert_eq!(subtasks["tasks"][0]["id"], c.as_str());
}

#[tokio::test]
async fn test_change_parent_to_current_parent_is_noop() {
    let mut h = Harness::new();
    let w = h.workspace("noop").await;
    let a = h.task(&w, "A").await;
    let b = h.subtask(&w, &a, "B").await;

    let (status, _) = h
        .send(Method::PUT, &format!("/api/v1/tasks/{b}/parent"), &w, json!({"parent_id": a}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, subtasks) = h.get(&format!("/api/v1/tasks/{a}/subtasks"), &w).await;
    assert_eq!(subtasks["total"], 1);
}

#[tokio::test]
async fn test_create_then_delete_restores_task_set() {
    let mut h = Harness::new();
    let w = h.workspace("roundtrip").await;
    h.task(&w, "Keep").await;
    let (_, before) = h.get("/api/v1/tasks", &w).await;

    let id = h.task(&w, "Drop").await;
    let (status, _) = h
        .send(Method::DELETE, &format!("/api/v1/tasks/{id}"), &w, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, after) = h.get("/api/v1/tasks", &w).await;
    let ids = |page: &Value| -> Vec<String> {
        page["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["id"].as_str().unwrap().to_string())
            .collect()
    };
    assert_eq!(ids(&before), ids(&after));
}

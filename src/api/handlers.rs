//! API request handlers

use super::middleware::RequestContext;
use crate::daemon::client_tracker::{generate_client_id, ClientInfo, ClientTracker, ClientType, DEFAULT_CLIENT_TTL};
use crate::error::GorevError;
use crate::events::{EventEmitter, EventHub, EventType};
use crate::i18n::{self, tf, Lang};
use crate::mcp::bridge::{self, Route};
use crate::mcp::handlers::{task_edit, ToolHandler};
use crate::mcp::params::Args;
use crate::store::TaskStatus;
use crate::tasks::TaskManager;
use crate::workspace::{Workspace, WorkspaceRegistry};
use crate::{Config, StorageMode};
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, Query, Request, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Shared server state
pub struct ServerState {
    pub registry: Arc<WorkspaceRegistry>,
    pub hub: EventHub,
    pub tracker: Arc<ClientTracker>,
    pub config: Config,
    /// Cancelled by `POST /api/v1/daemon/shutdown` and by signals
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

pub type AppState = Arc<ServerState>;

impl ServerState {
    pub fn emitter(&self) -> Arc<dyn EventEmitter> {
        Arc::new(self.hub.clone())
    }
}

type ApiResult = Result<Json<Value>, AppError>;

// ============================================================================
// Health check
// ============================================================================

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "time": chrono::Utc::now().to_rfc3339(),
        "mode": state.config.mode,
        "workspaces": state.registry.len(),
    }))
}

// ============================================================================
// Helpers
// ============================================================================

fn join_error(e: tokio::task::JoinError, lang: Lang) -> AppError {
    AppError::internal(anyhow::anyhow!("handler task failed: {}", e), lang)
}

/// Run a tool on the request's workspace and return its structured result.
async fn call_tool(state: &ServerState, ctx: &RequestContext, tool: &str, args: Value) -> ApiResult {
    let workspace = ctx.require_workspace()?;
    let output = ToolHandler::new(workspace, ctx.lang, state.emitter())
        .handle(tool, args)
        .await
        .map_err(|e| AppError::from_error(e, ctx.lang))?;
    Ok(Json(output.data))
}

/// Run business logic on the blocking pool for the request's workspace.
async fn with_manager<T, F>(ctx: &RequestContext, f: F) -> Result<(Arc<Workspace>, T), AppError>
where
    F: FnOnce(TaskManager) -> crate::GorevResult<T> + Send + 'static,
    T: Send + 'static,
{
    let workspace = ctx.require_workspace()?;
    let manager = workspace.manager(ctx.lang);
    let value = tokio::task::spawn_blocking(move || f(manager))
        .await
        .map_err(|e| join_error(e, ctx.lang))?
        .map_err(|e| AppError::from_error(e, ctx.lang))?;
    Ok((workspace, value))
}

/// Query strings become a tool argument object; numbers and flags parse from strings.
fn query_args(query: HashMap<String, String>) -> Value {
    Value::Object(query.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
}

/// `body` with `extra` keys layered on top
fn with_fields(body: Value, extra: Value) -> Value {
    let mut merged = match body {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Value::Object(extra) = extra {
        merged.extend(extra);
    }
    Value::Object(merged)
}

// ============================================================================
// Tasks
// ============================================================================

pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult {
    call_tool(&state, &ctx, "gorev_listele", query_args(query)).await
}

pub async fn get_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    call_tool(&state, &ctx, "gorev_detay", json!({ "id": id })).await
}

/// Partial edit with an optional status change, committed together. One event.
pub async fn update_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    let args = Args::new(&body, ctx.lang);
    let edit = task_edit(&args).map_err(|e| AppError::from_error(e, ctx.lang))?;
    let status = args
        .opt_enum("status", &TaskStatus::names(), TaskStatus::parse)
        .map_err(|e| AppError::from_error(e, ctx.lang))?;

    let (workspace, task) = with_manager(&ctx, move |tm| tm.update_task(&id, &edit, status)).await?;

    state
        .emitter()
        .emit_task(EventType::TaskUpdated, &workspace.id, &task.id, json!({"status": task.status}))
        .await;
    Ok(Json(serde_json::to_value(task).map_err(|e| AppError::internal(e, ctx.lang))?))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    call_tool(&state, &ctx, "gorev_sil", json!({ "id": id, "confirm": true })).await
}

pub async fn create_task_from_template(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<Value>,
) -> ApiResult {
    call_tool(&state, &ctx, "templateden_gorev_olustur", body).await
}

pub async fn list_subtasks(
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let (_, tasks) = with_manager(&ctx, move |tm| tm.subtasks(&id)).await?;
    Ok(Json(json!({ "tasks": tasks, "total": tasks.len() })))
}

pub async fn create_subtask(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    let args = with_fields(body, json!({"action": "create_subtask", "parent_id": id}));
    call_tool(&state, &ctx, "gorev_hierarchy", args).await
}

#[derive(Debug, Deserialize)]
pub struct ChangeParentRequest {
    /// Empty or absent makes the task a root
    #[serde(default, alias = "new_parent_id")]
    pub parent_id: Option<String>,
}

pub async fn change_parent(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(req): Json<ChangeParentRequest>,
) -> ApiResult {
    let args = json!({
        "action": "change_parent",
        "task_id": id,
        "new_parent_id": req.parent_id.unwrap_or_default(),
    });
    call_tool(&state, &ctx, "gorev_hierarchy", args).await
}

pub async fn get_hierarchy(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    call_tool(&state, &ctx, "gorev_hierarchy", json!({"action": "show", "task_id": id})).await
}

pub async fn add_dependency(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    let args = with_fields(body, json!({ "source_id": id }));
    call_tool(&state, &ctx, "gorev_bagimlilik_ekle", args).await
}

// ============================================================================
// Projects
// ============================================================================

pub async fn list_projects(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> ApiResult {
    call_tool(&state, &ctx, "proje_listele", json!({})).await
}

pub async fn create_project(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let project = call_tool(&state, &ctx, "proje_olustur", body).await?;
    Ok((StatusCode::CREATED, project))
}

pub async fn get_project(Extension(ctx): Extension<RequestContext>, Path(id): Path<String>) -> ApiResult {
    let (_, project) = with_manager(&ctx, move |tm| tm.get_project(&id)).await?;
    Ok(Json(serde_json::to_value(project).map_err(|e| AppError::internal(e, ctx.lang))?))
}

/// Cascades to the project's tasks.
pub async fn delete_project(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let (workspace, project) = with_manager(&ctx, move |tm| tm.delete_project(&id)).await?;
    state
        .emitter()
        .emit_project(EventType::ProjectDeleted, &workspace.id, &project.id)
        .await;
    Ok(Json(json!({ "success": true, "project": project })))
}

pub async fn project_tasks(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult {
    let args = with_fields(query_args(query), json!({ "project_id": id }));
    call_tool(&state, &ctx, "proje_gorevleri", args).await
}

pub async fn activate_project(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    call_tool(&state, &ctx, "aktif_proje", json!({"action": "set", "project_id": id})).await
}

pub async fn get_active_project(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> ApiResult {
    call_tool(&state, &ctx, "aktif_proje", json!({"action": "get"})).await
}

pub async fn clear_active_project(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> ApiResult {
    call_tool(&state, &ctx, "aktif_proje", json!({"action": "clear"})).await
}

// ============================================================================
// Templates, summary, export / import
// ============================================================================

pub async fn list_templates(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult {
    call_tool(&state, &ctx, "template_listele", query_args(query)).await
}

pub async fn summary(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> ApiResult {
    call_tool(&state, &ctx, "ozet_goster", json!({})).await
}

pub async fn export(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> ApiResult {
    let args = parse_body(&body, ctx.lang)?;
    call_tool(&state, &ctx, "gorev_export", args).await
}

pub async fn import(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<Value>,
) -> ApiResult {
    call_tool(&state, &ctx, "gorev_import", body).await
}

// ============================================================================
// Language
// ============================================================================

pub async fn get_language() -> Json<Value> {
    Json(json!({ "language": i18n::default_lang() }))
}

#[derive(Debug, Deserialize)]
pub struct SetLanguageRequest {
    pub language: String,
}

pub async fn set_language(
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<SetLanguageRequest>,
) -> ApiResult {
    let lang = Lang::parse(&req.language).ok_or_else(|| {
        AppError::BadRequest(tf(
            ctx.lang,
            "error.invalid_enum",
            &[("Param", "language"), ("Values", "tr, en")],
        ))
    })?;
    i18n::set_default_lang(lang);
    info!(language = %lang, "Default language changed");
    Ok(Json(json!({ "success": true, "language": lang })))
}

// ============================================================================
// Workspaces
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterWorkspaceRequest {
    pub name: Option<String>,
    pub path: Option<String>,
    /// Centralized mode only
    pub workspace_id: Option<String>,
}

/// Idempotent: a known path or id returns the existing workspace.
pub async fn register_workspace(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<RegisterWorkspaceRequest>,
) -> ApiResult {
    let lang = ctx.lang;
    let registry = state.registry.clone();
    let (workspace, created) = tokio::task::spawn_blocking(move || -> crate::GorevResult<(Arc<Workspace>, bool)> {
        let non_blank = |s: &Option<String>| s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

        if let Some(raw) = non_blank(&req.path) {
            let path = PathBuf::from(&raw);
            if let Some(existing) = registry.find_by_path(&path) {
                return Ok((existing, false));
            }
            if registry.mode() == StorageMode::Local && !path.is_dir() {
                return Err(GorevError::Validation(tf(lang, "error.path_not_found", &[("Path", &raw)])));
            }
            return registry.register(req.name.as_deref(), &path).map(|w| (w, true));
        }
        if let Some(id) = non_blank(&req.workspace_id) {
            if let Ok(existing) = registry.get(&id) {
                return Ok((existing, false));
            }
            return registry.register_id(&id, req.name.as_deref()).map(|w| (w, true));
        }
        Err(GorevError::Validation(tf(lang, "error.required_param", &[("Param", "path")])))
    })
    .await
    .map_err(|e| join_error(e, lang))?
    .map_err(|e| AppError::from_error(e, lang))?;

    let info = workspace.info().map_err(|e| AppError::from_error(e, lang))?;
    Ok(Json(json!({
        "success": true,
        "workspace_id": workspace.id,
        "workspace": info,
        "created": created,
    })))
}

pub async fn list_workspaces(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> ApiResult {
    let registry = state.registry.clone();
    let workspaces = tokio::task::spawn_blocking(move || registry.list())
        .await
        .map_err(|e| join_error(e, ctx.lang))?
        .map_err(|e| AppError::from_error(e, ctx.lang))?;
    Ok(Json(json!({ "workspaces": workspaces, "total": workspaces.len() })))
}

pub async fn get_workspace(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let registry = state.registry.clone();
    let info = tokio::task::spawn_blocking(move || registry.get(&id).and_then(|w| w.info()))
        .await
        .map_err(|e| join_error(e, ctx.lang))?
        .map_err(|e| AppError::from_error(e, ctx.lang))?;
    Ok(Json(serde_json::to_value(info).map_err(|e| AppError::internal(e, ctx.lang))?))
}

pub async fn unregister_workspace(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let registry = state.registry.clone();
    let workspace = tokio::task::spawn_blocking(move || registry.unregister(&id))
        .await
        .map_err(|e| join_error(e, ctx.lang))?
        .map_err(|e| AppError::from_error(e, ctx.lang))?;
    Ok(Json(json!({ "success": true, "workspace_id": workspace.id })))
}

// ============================================================================
// Daemon: clients, shutdown, stats
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterClientRequest {
    pub client_type: String,
    pub workspace_id: Option<String>,
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ClientIdRequest {
    pub client_id: String,
    pub ttl_seconds: Option<u64>,
    /// Used when a heartbeat has to re-register an expired client
    pub client_type: Option<String>,
    pub workspace_id: Option<String>,
}

fn client_ttl(seconds: Option<u64>) -> Duration {
    seconds
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_CLIENT_TTL)
}

fn parse_client_type(raw: &str, lang: Lang) -> Result<ClientType, AppError> {
    ClientType::parse(raw).ok_or_else(|| {
        AppError::BadRequest(tf(
            lang,
            "error.invalid_enum",
            &[("Param", "client_type"), ("Values", &ClientType::NAMES.join(", "))],
        ))
    })
}

pub async fn register_client(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<RegisterClientRequest>,
) -> ApiResult {
    let client_type = parse_client_type(&req.client_type, ctx.lang)?;
    let client_id = generate_client_id();
    state.tracker.register(ClientInfo::new(
        client_id.clone(),
        client_type,
        req.workspace_id,
        client_ttl(req.ttl_seconds),
    ));
    Ok(Json(json!({ "success": true, "client_id": client_id })))
}

pub async fn unregister_client(State(state): State<AppState>, Json(req): Json<ClientIdRequest>) -> Json<Value> {
    let removed = state.tracker.unregister(&req.client_id);
    Json(json!({ "success": removed, "client_id": req.client_id }))
}

/// Refresh a client's TTL; an unknown (expired) id is registered again.
pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<ClientIdRequest>,
) -> ApiResult {
    let ttl = client_ttl(req.ttl_seconds);
    if state.tracker.update_activity(&req.client_id, ttl) {
        return Ok(Json(json!({ "success": true, "client_id": req.client_id, "reregistered": false })));
    }

    let client_type = match req.client_type.as_deref() {
        Some(raw) => parse_client_type(raw, ctx.lang)?,
        None => ClientType::McpProxy,
    };
    info!(client_id = %req.client_id, "Heartbeat from unknown client, re-registering");
    state
        .tracker
        .register(ClientInfo::new(req.client_id.clone(), client_type, req.workspace_id, ttl));
    Ok(Json(json!({ "success": true, "client_id": req.client_id, "reregistered": true })))
}

pub async fn client_count(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "total": state.tracker.active_count(),
        "by_type": state.tracker.counts(),
    }))
}

/// Graceful shutdown trigger, accepted from loopback peers only.
pub async fn shutdown_daemon(State(state): State<AppState>, req: Request) -> Result<Json<Value>, AppError> {
    let loopback = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .is_some_and(|ConnectInfo(addr)| addr.ip().is_loopback());
    if !loopback {
        warn!("Rejected shutdown request from non-loopback peer");
        return Err(AppError::Forbidden("shutdown is only accepted from localhost".to_string()));
    }
    info!("Shutdown requested over HTTP");
    state.shutdown.cancel();
    Ok(Json(json!({ "success": true, "message": "daemon shutting down" })))
}

pub async fn ws_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.hub.stats()))
}

// ============================================================================
// MCP bridge
// ============================================================================

fn parse_body(body: &Bytes, lang: Lang) -> Result<Value, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|e| {
        AppError::BadRequest(tf(lang, "error.invalid_document", &[("Detail", &e.to_string())]))
    })
}

/// `POST /api/v1/mcp/{*name}`: protocol methods answer directly, tool calls
/// need the request's workspace.
pub async fn mcp_bridge(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult {
    let name = name.trim_start_matches('/').to_string();
    let params = parse_body(&body, ctx.lang)?;
    match bridge::route(&name, params, ctx.lang).map_err(|e| AppError::from_error(e, ctx.lang))? {
        Route::Protocol(result) => Ok(Json(result)),
        Route::ToolCall { name, arguments } => {
            let workspace = ctx.require_workspace()?;
            let output = ToolHandler::new(workspace, ctx.lang, state.emitter())
                .handle(&name, arguments)
                .await
                .map_err(|e| AppError::from_error(e, ctx.lang))?;
            Ok(Json(
                serde_json::to_value(bridge::call_result(output)).map_err(|e| AppError::internal(e, ctx.lang))?,
            ))
        }
    }
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug)]
pub enum AppError {
    /// Logged in full; the caller only sees a generic message in its language
    Internal(anyhow::Error, Lang),
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    /// An invariant would be violated
    Precondition(String),
    Conflict(String),
}

impl AppError {
    pub fn internal(err: impl Into<anyhow::Error>, lang: Lang) -> Self {
        AppError::Internal(err.into(), lang)
    }

    /// Translate a library error, rendering its message in `lang`.
    pub fn from_error(err: GorevError, lang: Lang) -> Self {
        let message = err.localized(lang);
        match err {
            GorevError::Validation(_) => AppError::BadRequest(message),
            GorevError::NotFound { .. } => AppError::NotFound(message),
            GorevError::PreconditionFailed(_) => AppError::Precondition(message),
            GorevError::Conflict(_) => AppError::Conflict(message),
            other => AppError::Internal(other.into(), lang),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Internal(..) => "internal",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "validation",
            AppError::Forbidden(_) => "forbidden",
            AppError::Precondition(_) => "precondition_failed",
            AppError::Conflict(_) => "conflict",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let kind = self.kind();
        let (status, message) = match self {
            AppError::Internal(e, lang) => {
                error!("Internal error: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, i18n::t(lang, "error.internal"))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Precondition(msg) => (StatusCode::CONFLICT, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "kind": kind,
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err, i18n::default_lang())
    }
}

impl From<GorevError> for AppError {
    fn from(err: GorevError) -> Self {
        AppError::from_error(err, i18n::default_lang())
    }
}

//! API route definitions

use super::handlers::{self, AppError, AppState};
use super::middleware::resolve_workspace;
use super::ws_handlers;
use crate::i18n;
use axum::{
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use std::any::Any as PanicPayload;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

/// Panics become a logged 500 with the usual error body.
fn handle_panic(payload: Box<dyn PanicPayload + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(panic = %detail, "Handler panicked");
    AppError::internal(anyhow::anyhow!("handler panicked: {}", detail), i18n::default_lang()).into_response()
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/api/health", get(handlers::health))
        // ====================================================================
        // Tasks
        // ====================================================================
        .route("/api/v1/tasks", get(handlers::list_tasks))
        .route("/api/v1/tasks/from-template", post(handlers::create_task_from_template))
        .route(
            "/api/v1/tasks/{id}",
            get(handlers::get_task)
                .put(handlers::update_task)
                .delete(handlers::delete_task),
        )
        .route(
            "/api/v1/tasks/{id}/subtasks",
            get(handlers::list_subtasks).post(handlers::create_subtask),
        )
        .route("/api/v1/tasks/{id}/parent", put(handlers::change_parent))
        .route("/api/v1/tasks/{id}/hierarchy", get(handlers::get_hierarchy))
        .route("/api/v1/tasks/{id}/dependencies", post(handlers::add_dependency))
        // ====================================================================
        // Projects
        // ====================================================================
        .route(
            "/api/v1/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/api/v1/projects/{id}",
            get(handlers::get_project).delete(handlers::delete_project),
        )
        .route("/api/v1/projects/{id}/tasks", get(handlers::project_tasks))
        .route("/api/v1/projects/{id}/activate", put(handlers::activate_project))
        .route(
            "/api/v1/active-project",
            get(handlers::get_active_project).delete(handlers::clear_active_project),
        )
        // ====================================================================
        // Templates, summary, language, export / import
        // ====================================================================
        .route("/api/v1/templates", get(handlers::list_templates))
        .route("/api/v1/summary", get(handlers::summary))
        .route(
            "/api/v1/language",
            get(handlers::get_language).post(handlers::set_language),
        )
        .route("/api/v1/export", post(handlers::export))
        .route("/api/v1/import", post(handlers::import))
        // ====================================================================
        // Workspaces
        // ====================================================================
        .route("/api/v1/workspaces", get(handlers::list_workspaces))
        .route("/api/v1/workspaces/register", post(handlers::register_workspace))
        .route(
            "/api/v1/workspaces/{id}",
            get(handlers::get_workspace).delete(handlers::unregister_workspace),
        )
        // ====================================================================
        // Daemon lifecycle
        // ====================================================================
        .route("/api/v1/daemon/clients/register", post(handlers::register_client))
        .route("/api/v1/daemon/clients/unregister", post(handlers::unregister_client))
        .route("/api/v1/daemon/clients/count", get(handlers::client_count))
        .route("/api/v1/daemon/heartbeat", post(handlers::heartbeat))
        .route("/api/v1/daemon/shutdown", post(handlers::shutdown_daemon))
        // ====================================================================
        // MCP bridge and WebSocket
        // ====================================================================
        .route("/api/v1/mcp/{*name}", post(handlers::mcp_bridge))
        .route("/api/v1/ws/stats", get(handlers::ws_stats))
        .route("/ws", get(ws_handlers::ws_events))
        // Middleware (last added runs first)
        .layer(from_fn_with_state(state.clone(), resolve_workspace))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

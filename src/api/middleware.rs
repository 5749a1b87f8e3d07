//! Workspace resolution middleware.
//!
//! Reads the `X-Workspace-*` headers and the caller's language into a
//! [`RequestContext`] extension. A missing or unknown workspace never fails
//! the request here: registration requests must reach their handler.
//! Handlers that need a workspace call [`RequestContext::require_workspace`].

use super::handlers::{AppError, AppState};
use crate::error::GorevError;
use crate::i18n::{self, Lang};
use crate::mcp::proxy::{HEADER_WORKSPACE_ID, HEADER_WORKSPACE_NAME, HEADER_WORKSPACE_PATH};
use crate::workspace::Workspace;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-request workspace and language
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub workspace_id: Option<String>,
    pub workspace_path: Option<String>,
    pub workspace_name: Option<String>,
    pub workspace: Option<Arc<Workspace>>,
    pub lang: Lang,
}

impl RequestContext {
    /// The resolved workspace: 400 without an id, 404 for an unknown one.
    pub fn require_workspace(&self) -> Result<Arc<Workspace>, AppError> {
        if let Some(workspace) = &self.workspace {
            return Ok(workspace.clone());
        }
        match &self.workspace_id {
            None => Err(AppError::BadRequest(i18n::t(self.lang, "error.workspace_required"))),
            Some(id) => Err(AppError::from_error(GorevError::not_found("workspace", id), self.lang)),
        }
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `Accept-Language` when it names a supported language, else the process default
pub fn request_lang(headers: &HeaderMap) -> Lang {
    header(headers, "accept-language")
        .and_then(|h| Lang::from_accept_language(&h))
        .unwrap_or_else(i18n::default_lang)
}

pub async fn resolve_workspace(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let headers = req.headers();
    let mut ctx = RequestContext {
        workspace_id: header(headers, HEADER_WORKSPACE_ID),
        workspace_path: header(headers, HEADER_WORKSPACE_PATH),
        workspace_name: header(headers, HEADER_WORKSPACE_NAME),
        workspace: None,
        lang: request_lang(headers),
    };

    if let Some(id) = ctx.workspace_id.clone() {
        // Opening a workspace may touch its database
        let registry = state.registry.clone();
        let lookup = tokio::task::spawn_blocking(move || registry.get(&id)).await;
        match lookup {
            Ok(Ok(workspace)) => ctx.workspace = Some(workspace),
            Ok(Err(e)) => debug!(method = %req.method(), path = %req.uri().path(), "Workspace not resolved: {}", e),
            Err(e) => warn!("Workspace lookup task failed: {}", e),
        }
    }

    req.extensions_mut().insert(ctx);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_request_lang_prefers_supported_tag() {
        let mut headers = HeaderMap::new();
        headers.insert("accept-language", HeaderValue::from_static("de-DE, en-US;q=0.8"));
        assert_eq!(request_lang(&headers), Lang::En);
    }

    #[test]
    fn test_require_workspace_statuses() {
        let missing = RequestContext::default().require_workspace().unwrap_err();
        assert!(matches!(missing, AppError::BadRequest(_)));

        let unknown = RequestContext {
            workspace_id: Some("nope".into()),
            ..Default::default()
        }
        .require_workspace()
        .unwrap_err();
        assert!(matches!(unknown, AppError::NotFound(_)));
    }
}

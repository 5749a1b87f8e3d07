//! Error taxonomy shared by the data layer, business logic and tool dispatcher.
//!
//! Transport boundaries translate these into their own shapes: HTTP status +
//! JSON body in [`crate::api::handlers::AppError`], JSON-RPC error objects in
//! the MCP proxy.

use crate::i18n::{self, Lang};

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, GorevError>;

#[derive(Debug, thiserror::Error)]
pub enum GorevError {
    /// Bad caller input; the message already names the parameter.
    #[error("{0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An invariant would be violated (cycle, dependency gate, bad transition).
    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    Conflict(String),

    /// Busy/locked store after the retry budget ran out.
    #[error("database busy, retry budget exhausted: {0}")]
    Transient(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl GorevError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable snake-case tag for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::Conflict(_) => "conflict",
            Self::Transient(_) => "transient",
            Self::Sqlite(_) | Self::Io(_) | Self::Json(_) | Self::Internal(_) => "internal",
        }
    }

    /// Whether this error should be hidden behind a generic message at the edge.
    pub fn is_internal(&self) -> bool {
        matches!(self.kind(), "internal" | "transient")
    }

    /// Render the error in the caller's language.
    ///
    /// Validation, precondition and conflict messages are produced already
    /// localised where they arise; not-found and internal errors are
    /// rendered here.
    pub fn localized(&self, lang: Lang) -> String {
        match self {
            Self::NotFound { entity, id } => i18n::tf(
                lang,
                "error.not_found",
                &[("Entity", &i18n::t(lang, &format!("entity.{entity}"))), ("Id", id)],
            ),
            Self::Transient(_) => i18n::t(lang, "error.busy"),
            Self::Sqlite(_) | Self::Io(_) | Self::Json(_) | Self::Internal(_) => {
                i18n::t(lang, "error.internal")
            }
            other => other.to_string(),
        }
    }
}

//! HTTP and WebSocket surface of the daemon

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod ws_handlers;

pub use handlers::{AppError, AppState, ServerState};
pub use routes::create_router;

//! MCP support: tool catalogue, dispatcher, HTTP bridge routing and the
//! stdio proxy that forwards an editor's JSON-RPC stream to the daemon.

pub mod bridge;
pub mod format;
pub mod handlers;
pub mod params;
pub mod protocol;
pub mod proxy;
pub mod tools;

pub use handlers::{ToolHandler, ToolOutput};
pub use proxy::McpProxy;

//! Routing for `POST /api/v1/mcp/<name>`
//!
//! `<name>` is either an MCP protocol method, answered without touching a
//! workspace, or a tool call that the HTTP layer dispatches to
//! [`super::handlers::ToolHandler`].

use super::handlers::ToolOutput;
use super::protocol::*;
use super::tools::{all_tools, is_tool};
use crate::error::{GorevError, Result};
use crate::i18n::{tf, Lang};
use serde_json::{json, Value};
use tracing::info;

pub const SERVER_NAME: &str = "gorev";

/// Where a bridge request goes
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Answered directly with this body
    Protocol(Value),
    /// Needs a workspace and the tool dispatcher
    ToolCall { name: String, arguments: Value },
}

pub fn route(method: &str, params: Value, lang: Lang) -> Result<Route> {
    let body = match method {
        "initialize" => initialize(params)?,
        "tools/list" => serde_json::to_value(ToolsListResult { tools: all_tools() })?,
        "notifications/initialized" | "ping" => json!({}),
        "resources/list" => json!({"resources": []}),
        "resources/templates/list" => json!({"resourceTemplates": []}),
        "tools/call" => {
            let call: ToolCallParams = serde_json::from_value(params).map_err(|e| {
                GorevError::Validation(tf(lang, "error.invalid_tool_call", &[("Detail", &e.to_string())]))
            })?;
            return Ok(Route::ToolCall {
                name: call.name,
                arguments: call.arguments.unwrap_or_else(|| json!({})),
            });
        }
        name if is_tool(name) => {
            return Ok(Route::ToolCall {
                name: name.to_string(),
                arguments: params,
            })
        }
        other => return Err(GorevError::not_found("tool", other)),
    };
    Ok(Route::Protocol(body))
}

fn initialize(params: Value) -> Result<Value> {
    let params: InitializeParams = serde_json::from_value(params).unwrap_or_default();
    info!(
        client_protocol = %params.protocol_version,
        client = params.client_info.as_ref().map(|c| c.name.as_str()).unwrap_or("unknown"),
        "MCP client initializing"
    );
    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities {
            tools: ToolsCapability { list_changed: false },
            resources: json!({}),
        },
        server_info: ServerInfo {
            name: SERVER_NAME.to_string(),
            version: crate::VERSION.to_string(),
        },
    };
    Ok(serde_json::to_value(result)?)
}

/// Wrap handler output in the MCP CallToolResult shape.
pub fn call_result(output: ToolOutput) -> ToolCallResult {
    ToolCallResult::success(output.text, output.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_reports_protocol_and_server() {
        let Route::Protocol(body) = route(
            "initialize",
            json!({"protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": {"name": "claude"}}),
            Lang::En,
        )
        .unwrap() else {
            panic!("expected protocol route");
        };
        assert_eq!(body["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(body["serverInfo"]["name"], "gorev");
    }

    #[test]
    fn test_protocol_methods_need_no_workspace() {
        for method in ["tools/list", "ping", "notifications/initialized", "resources/list", "resources/templates/list"] {
            assert!(matches!(route(method, json!({}), Lang::En).unwrap(), Route::Protocol(_)), "{method}");
        }
        let Route::Protocol(empty) = route("resources/list", json!({}), Lang::En).unwrap() else {
            unreachable!()
        };
        assert_eq!(empty, json!({"resources": []}));
    }

    #[test]
    fn test_tool_routes() {
        assert_eq!(
            route("tools/call", json!({"name": "proje_listele"}), Lang::En).unwrap(),
            Route::ToolCall {
                name: "proje_listele".into(),
                arguments: json!({})
            }
        );
        assert_eq!(
            route("gorev_detay", json!({"id": "t1"}), Lang::En).unwrap(),
            Route::ToolCall {
                name: "gorev_detay".into(),
                arguments: json!({"id": "t1"})
            }
        );
        assert_eq!(route("tools/call", json!({}), Lang::En).unwrap_err().kind(), "validation");
        assert_eq!(route("bogus", json!({}), Lang::En).unwrap_err().kind(), "not_found");
    }

    #[test]
    fn test_call_result_wraps_text_and_data() {
        let result = call_result(ToolOutput {
            text: "ok".into(),
            data: json!({"id": "1"}),
        });
        let json = serde_json::to_value(result).unwrap();
        assert_eq!(json["content"][0]["text"], "ok");
        assert_eq!(json["structuredContent"]["id"], "1");
    }
}

//! Unit tests for MCP protocol types.
//!
//! Tests JSON-RPC 2.0 request/response handling, tool listing types,
//! and the connection state machine.

use super::*;
use crate::context::ContextPolicy;
use crate::error::ToolError;
use crate::registry::{typed, ToolContext};
use serde_json::json;

// ============================================================================
// JsonRpcResponse tests
// ============================================================================

#[test]
fn test_jsonrpc_response_success_with_id() {
    let response = JsonRpcResponse::success(Some(json!(1)), json!({"result": "ok"}));

    assert_eq!(response.jsonrpc, "2.0");
    assert_eq!(response.id, json!(1));
    assert!(response.error.is_none());
    assert_eq!(response.result.unwrap()["result"], "ok");
}

#[test]
fn test_jsonrpc_response_success_without_id() {
    let response = JsonRpcResponse::success(None, json!({"data": "value"}));

    assert_eq!(response.id, Value::Null);
    assert!(response.result.is_some());
}

#[test]
fn test_jsonrpc_response_error() {
    let response = JsonRpcResponse::error(Some(json!("req-7")), -32600, "Invalid request");

    assert_eq!(response.id, json!("req-7"));
    assert!(response.result.is_none());
    let error = response.error.unwrap();
    assert_eq!(error.code, -32600);
    assert_eq!(error.message, "Invalid request");
    assert!(error.data.is_none());
}

#[test]
fn test_jsonrpc_response_serialization_omits_absent_fields() {
    let success = serde_json::to_string(&JsonRpcResponse::success(Some(json!(1)), json!({})))
        .unwrap();
    assert!(success.contains("\"jsonrpc\":\"2.0\""));
    assert!(success.contains("\"result\""));
    assert!(!success.contains("\"error\""));

    let failure =
        serde_json::to_string(&JsonRpcResponse::error(Some(json!(1)), -32601, "nope")).unwrap();
    assert!(failure.contains("\"error\""));
    assert!(!failure.contains("\"result\""));
    assert!(!failure.contains("\"data\""));
}

#[test]
fn test_from_mcp_error_carries_kind_and_correlation_id() {
    let err = McpError::ContextRequired {
        tool_name: "save_session".to_string(),
    };
    let response =
        JsonRpcResponse::from_mcp_error(Some(json!(3)), &err, Some("20250101_120000_000001"));

    let error = response.error.unwrap();
    assert_eq!(error.code, -32002);
    let data = error.data.unwrap();
    assert_eq!(data["kind"], "ContextRequiredError");
    assert_eq!(data["correlation_id"], "20250101_120000_000001");
}

#[test]
fn test_from_mcp_error_without_correlation_id() {
    let err = McpError::MethodNotFound {
        method: "resources/list".to_string(),
    };
    let response = JsonRpcResponse::from_mcp_error(None, &err, None);

    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert!(error.message.contains("resources/list"));
    let data = error.data.unwrap();
    assert_eq!(data["kind"], "ProtocolError");
    assert!(data.get("correlation_id").is_none());
}

#[test]
fn test_from_mcp_error_hides_handler_details() {
    let err = McpError::HandlerExecution {
        tool_name: "end_session".to_string(),
        message: "database is locked at /home/alice/project/.research/research.db".to_string(),
    };
    let response = JsonRpcResponse::from_mcp_error(Some(json!(1)), &err, None);

    let error = response.error.unwrap();
    assert!(!error.message.contains("/home/alice"));
    assert!(error.message.contains("end_session"));
}

#[test]
fn test_to_value_round_trips_shape() {
    let value = JsonRpcResponse::success(Some(json!(9)), json!({"ok": true})).to_value();
    assert_eq!(value["id"], 9);
    assert_eq!(value["result"]["ok"], true);
}

// ============================================================================
// Request deserialization tests
// ============================================================================

#[test]
fn test_request_deserialization() {
    let request: JsonRpcRequest = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": {"name": "get_project_info", "arguments": {}}
    }))
    .unwrap();

    assert_eq!(request.jsonrpc, "2.0");
    assert_eq!(request.id, Some(json!(1)));
    assert_eq!(request.method, "tools/call");
    assert!(request.params.is_some());
}

#[test]
fn test_notification_has_no_id() {
    let request: JsonRpcRequest = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "method": "notifications/initialized"
    }))
    .unwrap();

    assert!(request.id.is_none());
    assert!(request.params.is_none());
}

#[test]
fn test_request_without_method_is_rejected() {
    let result: Result<JsonRpcRequest, _> =
        serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1}));
    assert!(result.is_err());
}

#[test]
fn test_tool_call_params() {
    let params: ToolCallParams = serde_json::from_value(json!({
        "name": "save_session",
        "arguments": {"data": {"step": 2}}
    }))
    .unwrap();
    assert_eq!(params.name, "save_session");
    assert_eq!(params.arguments.unwrap()["data"]["step"], 2);

    let bare: ToolCallParams = serde_json::from_value(json!({"name": "reset_context"})).unwrap();
    assert!(bare.arguments.is_none());
}

#[test]
fn test_initialize_params() {
    let params: InitializeParams = serde_json::from_value(json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {},
        "clientInfo": {"name": "test-client", "version": "1.0"}
    }))
    .unwrap();
    assert_eq!(params.protocol_version, "2024-11-05");
    assert!(SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()));
}

// ============================================================================
// MCP type serialization tests
// ============================================================================

#[test]
fn test_initialize_result_serialization() {
    let result = InitializeResult {
        protocol_version: "2024-11-05".to_string(),
        capabilities: Capabilities {
            tools: ToolCapabilities {
                list_changed: false,
            },
        },
        server_info: ServerInfo {
            name: "mcp-research-context".to_string(),
            version: "0.1.0".to_string(),
        },
    };

    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["protocolVersion"], "2024-11-05");
    assert_eq!(value["capabilities"]["tools"]["listChanged"], false);
    assert_eq!(value["serverInfo"]["name"], "mcp-research-context");
}

#[test]
fn test_tool_from_definition() {
    let def = ToolDefinition::new(
        "session",
        "demo_tool",
        "A demo tool",
        json!({"type": "object", "properties": {}}),
        ContextPolicy::Optional,
        typed(|_ctx: ToolContext, _params: Value| async move {
            Ok::<_, ToolError>(json!({}))
        }),
    );

    let tool = Tool::from(&def);
    let value = serde_json::to_value(&tool).unwrap();
    assert_eq!(value["name"], "demo_tool");
    assert_eq!(value["description"], "A demo tool");
    assert_eq!(value["inputSchema"]["type"], "object");
}

#[test]
fn test_tool_call_result_from_value() {
    let result = ToolCallResult::from_value(&json!({"session_id": "s1"}));
    assert_eq!(result.content.len(), 1);
    assert_eq!(result.content[0].content_type, "text");
    assert!(result.content[0].text.contains("\"session_id\": \"s1\""));

    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["content"][0]["type"], "text");
    assert!(value.get("isError").is_none());
}

// ============================================================================
// Connection state machine tests
// ============================================================================

#[test]
fn test_connection_starts_uninitialized() {
    let conn = Connection::new(ClientInfo::stdio());
    assert_eq!(conn.state(), ConnectionState::Uninitialized);
    assert!(conn.protocol_version().is_none());
    assert!(!conn.is_closed());
    assert_eq!(conn.client().transport, "stdio");
}

#[test]
fn test_connection_handshake_transitions() {
    let mut conn = Connection::new(ClientInfo::websocket("127.0.0.1:50000"));

    // Serving is only reachable from Initialized
    conn.mark_serving();
    assert_eq!(conn.state(), ConnectionState::Uninitialized);

    conn.mark_initialized("2025-03-26".to_string());
    assert_eq!(conn.state(), ConnectionState::Initialized);
    assert_eq!(conn.protocol_version(), Some("2025-03-26"));

    conn.mark_serving();
    assert_eq!(conn.state(), ConnectionState::Serving);

    conn.close();
    assert!(conn.is_closed());
    conn.mark_serving();
    assert_eq!(conn.state(), ConnectionState::Closed);
}

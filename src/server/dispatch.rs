//! Request dispatch.
//!
//! Every message runs through [`Dispatcher::handle_message`], which enforces
//! the connection state machine and routes methods. `tools/call` follows a
//! fixed pipeline: resolve context, log request and context, run the
//! interceptor chain, invoke the handler under a timer, log execution,
//! persist the invocation, then log response and summary.

use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use super::chain::InterceptorChain;
use super::mcp::{
    Capabilities, Connection, ConnectionState, InitializeParams, InitializeResult,
    JsonRpcRequest, JsonRpcResponse, ServerInfo, Tool, ToolCallParams, ToolCallResult,
    ToolCapabilities, SUPPORTED_PROTOCOL_VERSIONS,
};
use super::SharedState;
use crate::audit::{ExecutionStatus, RequestLogSet};
use crate::context::{explicit_project_path, ContextPolicy, ResolvedContext};
use crate::error::{ContextError, McpError, StorageError, ToolError};
use crate::registry::{ToolContext, ToolDefinition};
use crate::storage::{InvocationRecord, Storage};

/// Longest result summary stored with a usage row.
const RESULT_SUMMARY_CHARS: usize = 200;

/// Routes messages for any number of connections.
pub struct Dispatcher {
    state: SharedState,
    chain: InterceptorChain,
}

impl Dispatcher {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            chain: InterceptorChain::standard(),
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Handle one raw message. Returns `None` for notifications.
    pub async fn handle_message(
        &self,
        connection: &mut Connection,
        raw: &str,
    ) -> Option<JsonRpcResponse> {
        if connection.is_closed() {
            debug!("Ignoring message on closed connection");
            return None;
        }

        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Failed to parse request");
                let err = McpError::Parse {
                    message: e.to_string(),
                };
                return Some(JsonRpcResponse::from_mcp_error(None, &err, None));
            }
        };

        let id = value.get("id").cloned().filter(|v| !v.is_null());
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                let err = McpError::Protocol {
                    message: format!("Malformed JSON-RPC request: {}", e),
                };
                return Some(JsonRpcResponse::from_mcp_error(id, &err, None));
            }
        };

        if request.id.is_none() {
            self.handle_notification(connection, &request);
            return None;
        }

        Some(self.handle_request(connection, request).await)
    }

    fn handle_notification(&self, connection: &mut Connection, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" | "initialized" => {
                connection.mark_serving();
                debug!(state = ?connection.state(), "Client initialized");
            }
            method => debug!(method = %method, "Ignoring notification"),
        }
    }

    async fn handle_request(
        &self,
        connection: &mut Connection,
        request: JsonRpcRequest,
    ) -> JsonRpcResponse {
        if request.method == "tools/call" && request.jsonrpc == "2.0" {
            if connection.state() == ConnectionState::Uninitialized {
                return self
                    .reply_simple(connection, &request, Err(not_initialized()))
                    .await;
            }
            connection.mark_serving();
            return self.handle_tool_call(connection, request).await;
        }

        let outcome = self.route(connection, &request);
        self.reply_simple(connection, &request, outcome).await
    }

    /// Methods other than `tools/call`.
    fn route(&self, connection: &mut Connection, request: &JsonRpcRequest) -> Result<Value, McpError> {
        if request.jsonrpc != "2.0" {
            return Err(McpError::Protocol {
                message: format!("Unsupported jsonrpc version: {}", request.jsonrpc),
            });
        }

        match (connection.state(), request.method.as_str()) {
            (_, "ping") => Ok(json!({})),
            (ConnectionState::Uninitialized, "initialize") => {
                self.handle_initialize(connection, request.params.clone())
            }
            (ConnectionState::Uninitialized, _) => Err(not_initialized()),
            (_, "initialize") => Err(McpError::Protocol {
                message: "Connection is already initialized".to_string(),
            }),
            (_, "tools/list") => {
                connection.mark_serving();
                Ok(self.handle_tools_list())
            }
            (_, method) => Err(McpError::MethodNotFound {
                method: method.to_string(),
            }),
        }
    }

    fn handle_initialize(
        &self,
        connection: &mut Connection,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let params: InitializeParams = match params.map(serde_json::from_value) {
            Some(Ok(p)) => p,
            Some(Err(e)) => {
                connection.close();
                return Err(McpError::Protocol {
                    message: format!("Invalid initialize params: {}", e),
                });
            }
            None => {
                connection.close();
                return Err(McpError::Protocol {
                    message: "Missing initialize params".to_string(),
                });
            }
        };

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
            connection.close();
            return Err(McpError::Protocol {
                message: format!(
                    "Unsupported protocol version {}; supported: {}",
                    params.protocol_version,
                    SUPPORTED_PROTOCOL_VERSIONS.join(", ")
                ),
            });
        }

        info!(
            protocol_version = %params.protocol_version,
            client = ?params.client_info,
            "Handling initialize request"
        );

        let result = InitializeResult {
            protocol_version: params.protocol_version.clone(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "mcp-research-context".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let value = serde_json::to_value(result)?;
        connection.mark_initialized(params.protocol_version);
        Ok(value)
    }

    fn handle_tools_list(&self) -> Value {
        let tools: Vec<Tool> = self
            .state
            .registry
            .list()
            .iter()
            .map(|def| Tool::from(def.as_ref()))
            .collect();
        debug!(count = tools.len(), "Handling tools/list request");
        json!({ "tools": tools })
    }

    /// Reply to a non-tool request, writing request, response and summary
    /// artifacts to the ambient log directory.
    async fn reply_simple(
        &self,
        connection: &Connection,
        request: &JsonRpcRequest,
        outcome: Result<Value, McpError>,
    ) -> JsonRpcResponse {
        let context = self.state.detector.resolve_ambient();
        let mut log = self.begin_log(&context);
        log.log_request(
            &request.method,
            request.params.as_ref(),
            connection.client(),
            request.id.as_ref(),
        )
        .await;

        let (response, status) = match outcome {
            Ok(result) => (
                JsonRpcResponse::success(request.id.clone(), result),
                ExecutionStatus::Success,
            ),
            Err(err) => {
                debug!(method = %request.method, error = %err, "Request rejected");
                (
                    JsonRpcResponse::from_mcp_error(
                        request.id.clone(),
                        &err,
                        Some(log.correlation_id()),
                    ),
                    ExecutionStatus::Error,
                )
            }
        };

        log.log_response(&response.to_value()).await;
        log.finish(None, status).await;
        response
    }

    async fn handle_tool_call(
        &self,
        connection: &Connection,
        request: JsonRpcRequest,
    ) -> JsonRpcResponse {
        let id = request.id.clone();

        let parsed = match request.params.clone() {
            Some(p) => serde_json::from_value::<ToolCallParams>(p).map_err(|e| e.to_string()),
            None => Err("Missing params".to_string()),
        };
        let (name, args) = match parsed {
            Ok(params) => match params.arguments {
                None | Some(Value::Null) => (params.name, Map::new()),
                Some(Value::Object(map)) => (params.name, map),
                Some(_) => {
                    let err = McpError::Validation {
                        tool_name: params.name,
                        message: "arguments must be an object".to_string(),
                    };
                    return self.reply_simple(connection, &request, Err(err)).await;
                }
            },
            Err(message) => {
                let err = McpError::Validation {
                    tool_name: "tools/call".to_string(),
                    message,
                };
                return self.reply_simple(connection, &request, Err(err)).await;
            }
        };

        let context = self.state.detector.resolve(explicit_project_path(&args));
        let mut log = self.begin_log(&context);
        log.log_request(
            "tools/call",
            request.params.as_ref(),
            connection.client(),
            id.as_ref(),
        )
        .await;

        info!(
            tool = %name,
            correlation_id = %log.correlation_id(),
            project = ?context.project_path(),
            "Handling tool call"
        );

        let Some(tool) = self.state.registry.get(&name) else {
            let err = McpError::UnknownTool { tool_name: name.clone() };
            warn!(tool = %name, correlation_id = %log.correlation_id(), "Unknown tool");
            return finish_with_error(log, id, &name, &err).await;
        };

        log.log_context(&context, &self.state.registry.names()).await;

        let args = match self.chain.apply(&tool, &context, &args) {
            Ok(a) => a,
            Err(err) => {
                debug!(tool = %name, error = %err, "Call rejected before handler");
                return finish_with_error(log, id, &name, &err).await;
            }
        };

        let ctx = ToolContext {
            state: self.state.clone(),
            context: context.clone(),
            correlation_id: log.correlation_id().to_string(),
        };

        let started_at = Utc::now();
        let timer = Instant::now();
        let outcome = tool.handler.call(ctx, args.clone()).await;
        let duration_ms = timer.elapsed().as_millis() as i64;
        let ended_at = Utc::now();

        let error_text = outcome.as_ref().err().map(|e| e.to_string());
        log.log_execution(
            &name,
            started_at,
            ended_at,
            duration_ms,
            match &outcome {
                Ok(v) => Ok(v),
                Err(_) => Err(error_text.as_deref().unwrap_or_default()),
            },
        )
        .await;

        self.persist(&tool, &context, &args, &outcome, duration_ms, log.correlation_id())
            .await;

        match outcome {
            Ok(value) => {
                let response = match serde_json::to_value(ToolCallResult::from_value(&value)) {
                    Ok(result) => JsonRpcResponse::success(id, result),
                    Err(e) => JsonRpcResponse::from_mcp_error(
                        id,
                        &McpError::Json(e),
                        Some(log.correlation_id()),
                    ),
                };
                log.log_response(&response.to_value()).await;
                log.finish(Some(&name), ExecutionStatus::Success).await;
                response
            }
            Err(tool_err) => {
                let err = to_mcp_error(&name, tool_err);
                if matches!(err, McpError::HandlerExecution { .. }) {
                    error!(
                        tool = %name,
                        correlation_id = %log.correlation_id(),
                        error = %err,
                        "Tool handler failed"
                    );
                }
                finish_with_error(log, id, &name, &err).await
            }
        }
    }

    /// Record the invocation in the project it ran against. Failures are
    /// logged and never change the reply.
    async fn persist(
        &self,
        tool: &ToolDefinition,
        context: &ResolvedContext,
        args: &Map<String, Value>,
        outcome: &Result<Value, ToolError>,
        duration_ms: i64,
        correlation_id: &str,
    ) {
        // Context-managing tools run against whatever project is current afterwards.
        let target = if tool.policy == ContextPolicy::None {
            self.state.detector.resolve_ambient()
        } else {
            context.clone()
        };
        let Some(project) = target.project() else {
            debug!(tool = %tool.name, "No project resolved; invocation not persisted");
            return;
        };

        let record = InvocationRecord {
            project_id: project.id().to_string(),
            session_id: outcome
                .as_ref()
                .ok()
                .and_then(|v| v.get("session_id"))
                .and_then(Value::as_str)
                .map(String::from),
            tool_name: tool.name.clone(),
            classification: tool
                .classification
                .map(|(act, category)| (act.to_string(), category.to_string())),
            arguments: Value::Object(args.clone()),
            result_summary: outcome.as_ref().ok().map(summarize),
            execution_time_ms: duration_ms,
            success: outcome.is_ok(),
            error_message: outcome.as_ref().err().map(|e| e.to_string()),
            correlation_id: Some(correlation_id.to_string()),
        };

        let result = match self.state.stores.for_project(project).await {
            Ok(store) => store.record_invocation(&record).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => debug!(
                tool = %tool.name,
                usage_id = %outcome.usage_id,
                milestones = outcome.milestones.len(),
                "Invocation persisted"
            ),
            Err(e) => {
                let err = McpError::Persistence {
                    message: e.to_string(),
                };
                error!(
                    tool = %tool.name,
                    correlation_id = %correlation_id,
                    kind = err.kind(),
                    error = %err,
                    "Failed to persist invocation"
                );
            }
        }
    }

    fn begin_log(&self, context: &ResolvedContext) -> RequestLogSet {
        let logger = &self.state.logger;
        logger.begin(logger.next_correlation_id(), logger.log_dir_for(context))
    }
}

async fn finish_with_error(
    mut log: RequestLogSet,
    id: Option<Value>,
    tool_name: &str,
    err: &McpError,
) -> JsonRpcResponse {
    let response = JsonRpcResponse::from_mcp_error(id, err, Some(log.correlation_id()));
    log.log_response(&response.to_value()).await;
    log.finish(Some(tool_name), ExecutionStatus::Error).await;
    response
}

fn not_initialized() -> McpError {
    McpError::Protocol {
        message: "Server not initialized; send initialize first".to_string(),
    }
}

/// Map a handler failure onto the wire taxonomy.
fn to_mcp_error(tool_name: &str, err: ToolError) -> McpError {
    match err {
        ToolError::InvalidArguments { message } => McpError::Validation {
            tool_name: tool_name.to_string(),
            message,
        },
        ToolError::Validation { field, reason } => McpError::Validation {
            tool_name: tool_name.to_string(),
            message: format!("{}: {}", field, reason),
        },
        ToolError::NoProject => McpError::ContextRequired {
            tool_name: tool_name.to_string(),
        },
        // Caller-correctable state errors.
        ToolError::Context(e @ ContextError::AlreadyExists { .. }) => McpError::Validation {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        },
        ToolError::Storage(
            e @ (StorageError::NoActiveSession { .. } | StorageError::SessionNotFound { .. }),
        ) => McpError::Validation {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        },
        other => McpError::HandlerExecution {
            tool_name: tool_name.to_string(),
            message: other.to_string(),
        },
    }
}

fn summarize(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() <= RESULT_SUMMARY_CHARS {
        return text;
    }
    let mut summary: String = text.chars().take(RESULT_SUMMARY_CHARS).collect();
    summary.push_str("...");
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_mapping() {
        let err = to_mcp_error(
            "t",
            ToolError::InvalidArguments {
                message: "missing field `name`".to_string(),
            },
        );
        assert_eq!(err.code(), -32602);

        let err = to_mcp_error("t", ToolError::NoProject);
        assert_eq!(err.kind(), "ContextRequiredError");

        let err = to_mcp_error(
            "t",
            ToolError::Execution {
                message: "boom".to_string(),
            },
        );
        assert_eq!(err.code(), -32003);
        assert!(!err.client_message().contains("boom"));
    }

    #[test]
    fn test_caller_state_errors_are_validation() {
        let err = to_mcp_error(
            "initialize_project",
            ToolError::Context(ContextError::AlreadyExists {
                path: std::path::PathBuf::from("/tmp/p"),
            }),
        );
        assert_eq!(err.kind(), "ValidationError");
        assert!(err.client_message().contains("already exists"));

        let err = to_mcp_error(
            "end_session",
            ToolError::Storage(StorageError::NoActiveSession {
                project_id: "p1".to_string(),
            }),
        );
        assert_eq!(err.code(), -32602);
        assert!(err.client_message().contains("No active session"));

        let err = to_mcp_error(
            "get_project_info",
            ToolError::Storage(StorageError::Query {
                message: "disk I/O".to_string(),
            }),
        );
        assert_eq!(err.kind(), "HandlerExecutionError");
    }

    #[test]
    fn test_summarize_truncates() {
        let short = json!({"a": 1});
        assert_eq!(summarize(&short), short.to_string());

        let long = json!({"text": "y".repeat(1000)});
        let s = summarize(&long);
        assert!(s.ends_with("..."));
        assert_eq!(s.chars().count(), RESULT_SUMMARY_CHARS + 3);
    }
}

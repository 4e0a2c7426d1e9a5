use std::path::PathBuf;

use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Project not found: {project}")]
    ProjectNotFound { project: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("No active session for project {project_id}")]
    NoActiveSession { project_id: String },

    #[error("Unknown research category: {act}/{category}")]
    UnknownCategory { act: String, category: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Project context resolution errors
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Project directory not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid project config at {path}: {message}")]
    InvalidConfig { path: PathBuf, message: String },

    #[error("Project already exists at {path}")]
    AlreadyExists { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Tool registration errors. All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Tool registered twice: {name}")]
    DuplicateTool { name: String },

    #[error("Module {module} registered {actual} tools, expected {expected}")]
    ModuleCountMismatch {
        module: String,
        expected: usize,
        actual: usize,
    },

    #[error("Registry holds {actual} tools, expected {expected}")]
    TotalCountMismatch { expected: usize, actual: usize },
}

/// Audit artifact write errors. Always recoverable; never reach the client.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// MCP protocol errors, one variant per wire-visible taxonomy entry.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Invalid request: {message}")]
    Protocol { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Tool {tool_name} requires an active research project")]
    ContextRequired { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    Validation { tool_name: String, message: String },

    #[error("Tool execution failed for {tool_name}: {message}")]
    HandlerExecution { tool_name: String, message: String },

    #[error("Persistence failed: {message}")]
    Persistence { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stable wire codes for [`McpError`].
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const UNKNOWN_TOOL: i32 = -32001;
    pub const CONTEXT_REQUIRED: i32 = -32002;
    pub const HANDLER_EXECUTION: i32 = -32003;
    pub const PERSISTENCE: i32 = -32004;
}

impl McpError {
    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            McpError::Parse { .. } => codes::PARSE_ERROR,
            McpError::Protocol { .. } => codes::INVALID_REQUEST,
            McpError::MethodNotFound { .. } => codes::METHOD_NOT_FOUND,
            McpError::UnknownTool { .. } => codes::UNKNOWN_TOOL,
            McpError::ContextRequired { .. } => codes::CONTEXT_REQUIRED,
            McpError::Validation { .. } => codes::INVALID_PARAMS,
            McpError::HandlerExecution { .. } => codes::HANDLER_EXECUTION,
            McpError::Persistence { .. } => codes::PERSISTENCE,
            McpError::Json(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Taxonomy name reported in the error `data.kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            McpError::Parse { .. } | McpError::Protocol { .. } | McpError::MethodNotFound { .. } => {
                "ProtocolError"
            }
            McpError::UnknownTool { .. } => "UnknownToolError",
            McpError::ContextRequired { .. } => "ContextRequiredError",
            McpError::Validation { .. } => "ValidationError",
            McpError::HandlerExecution { .. } => "HandlerExecutionError",
            McpError::Persistence { .. } => "PersistenceError",
            McpError::Json(_) => "InternalError",
        }
    }

    /// Message safe to put on the wire. Handler failures are reduced to a
    /// generic message; the full text stays in the server logs.
    pub fn client_message(&self) -> String {
        match self {
            McpError::HandlerExecution { tool_name, .. } => {
                format!("Tool {} failed; see server logs for details", tool_name)
            }
            McpError::Json(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Errors raised by tool bodies.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {message}")]
    InvalidArguments { message: String },

    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("No research project is active")]
    NoProject,

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Tool failed: {message}")]
    Execution { message: String },
}

impl From<ToolError> for AppError {
    fn from(err: ToolError) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::Execution {
            message: format!("Failed to serialize result: {}", err),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for context resolution
pub type ContextResult<T> = Result<T, ContextError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

/// Result type alias for tool bodies
pub type ToolResult<T> = Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::SessionNotFound {
            session_id: "sess-123".to_string(),
        };
        assert_eq!(err.to_string(), "Session not found: sess-123");

        let err = StorageError::UnknownCategory {
            act: "design".to_string(),
            category: "nope".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown research category: design/nope");
    }

    #[test]
    fn test_mcp_error_codes_are_stable() {
        let cases = [
            (
                McpError::UnknownTool {
                    tool_name: "x".into(),
                },
                -32001,
                "UnknownToolError",
            ),
            (
                McpError::ContextRequired {
                    tool_name: "x".into(),
                },
                -32002,
                "ContextRequiredError",
            ),
            (
                McpError::Validation {
                    tool_name: "x".into(),
                    message: "m".into(),
                },
                -32602,
                "ValidationError",
            ),
            (
                McpError::HandlerExecution {
                    tool_name: "x".into(),
                    message: "m".into(),
                },
                -32003,
                "HandlerExecutionError",
            ),
            (
                McpError::Protocol {
                    message: "m".into(),
                },
                -32600,
                "ProtocolError",
            ),
        ];

        for (err, code, kind) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn test_handler_execution_message_hides_detail() {
        let err = McpError::HandlerExecution {
            tool_name: "save_session".to_string(),
            message: "disk I/O at /secret/path".to_string(),
        };
        let msg = err.client_message();
        assert!(msg.contains("save_session"));
        assert!(!msg.contains("/secret/path"));
    }

    #[test]
    fn test_tool_error_conversion_to_app_error() {
        let tool_err = ToolError::Validation {
            field: "name".to_string(),
            reason: "empty".to_string(),
        };
        let app_err: AppError = tool_err.into();
        assert!(matches!(app_err, AppError::Internal { .. }));
        assert!(app_err.to_string().contains("Validation failed"));
    }

    #[test]
    fn test_storage_error_conversion_to_app_error() {
        let storage_err = StorageError::SessionNotFound {
            session_id: "test-123".to_string(),
        };
        let app_err: AppError = storage_err.into();
        assert!(matches!(app_err, AppError::Storage(_)));
    }
}

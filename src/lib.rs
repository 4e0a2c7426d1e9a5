//! # MCP Research Context Server
//!
//! Core of a Model Context Protocol (MCP) server for research assistants.
//! Every tool call is resolved against the active research project, audited
//! under a correlation id, and counted toward the project's workflow progress.
//!
//! ## Features
//!
//! - **Context Detection**: explicit path, environment, config marker, switched
//!   project, then upward directory search
//! - **Tool Registry**: named tools with JSON schemas and per-module counts
//!   verified at startup
//! - **Context Injection**: `project_path` added to tool arguments before
//!   schema validation
//! - **Session/Progress Store**: per-project SQLite database for sessions,
//!   tool usage, category progress, milestones and recommendations
//! - **Request Logging**: one correlation id per request, five JSON artifacts
//!   per tool call
//! - **Transports**: JSON-RPC 2.0 over stdio or WebSocket
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → Dispatcher → Interceptors → Tool handler
//!                  ↓             ↓              ↓
//!            Request logs   Context detector   SQLite (per project)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_research_context::{Config, AppState, McpServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = Arc::new(AppState::new(config)?);
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

/// Request correlation ids and per-request JSON artifacts.
pub mod audit;
/// Configuration management for the MCP server.
pub mod config;
/// Research project detection and context resolution.
pub mod context;
/// Error types and result aliases for the application.
pub mod error;
/// Tool definitions and the registry that holds them.
pub mod registry;
/// MCP server implementation and request handling.
pub mod server;
/// SQLite storage layer for sessions and workflow progress.
pub mod storage;
/// Built-in tool modules.
pub mod tools;
/// The research workflow catalog.
pub mod workflow;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};

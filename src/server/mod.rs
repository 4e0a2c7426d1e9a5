//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - JSON-RPC 2.0 types and the per-connection protocol state machine
//! - The `tools/call` pipeline (context, interceptors, audit, persistence)
//! - Stdio and WebSocket transports
//! - Shared application state

mod chain;
mod dispatch;
mod mcp;
mod websocket;

pub use chain::{ContextInjection, Interceptor, InterceptorChain, SchemaValidation};
pub use dispatch::Dispatcher;
pub use mcp::*;
pub use websocket::{router, serve_websocket};

use std::sync::Arc;

use tracing::info;

use crate::audit::RequestLogger;
use crate::config::Config;
use crate::context::ContextDetector;
use crate::error::AppResult;
use crate::registry::ToolRegistry;
use crate::storage::ProjectStores;
use crate::tools;

/// Application state shared by every connection.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Active project resolution and its cache.
    pub detector: ContextDetector,
    /// Registered tools.
    pub registry: ToolRegistry,
    /// Per-project databases.
    pub stores: ProjectStores,
    /// Request audit trail.
    pub logger: RequestLogger,
}

impl AppState {
    /// Build the state and register every tool module.
    ///
    /// # Errors
    /// Fails when tool registration does not produce the expected tool set.
    pub fn new(config: Config) -> AppResult<Self> {
        let registry = ToolRegistry::new();
        tools::register_all(&registry)?;

        let detector = ContextDetector::new(config.context.clone());
        let stores = ProjectStores::new(config.database.clone());
        let logger = RequestLogger::new(config.audit.clone(), &config.context.home_dir);

        info!(
            tools = registry.count(),
            home = %config.context.home_dir.display(),
            "Application state initialized"
        );

        Ok(Self {
            config,
            detector,
            registry,
            stores,
            logger,
        })
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

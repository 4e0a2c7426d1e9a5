//! Tool registry.
//!
//! Tool modules register [`ToolDefinition`]s at startup. The dispatcher looks
//! tools up by name and `tools/list` enumerates them in registration order.

pub mod schema;

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::context::{ContextPolicy, ProjectContext, ResolvedContext};
use crate::error::{RegistryError, ToolError, ToolResult};
use crate::server::SharedState;
use crate::storage::SqliteStorage;

/// Everything a handler sees besides its arguments.
#[derive(Clone)]
pub struct ToolContext {
    pub state: SharedState,
    pub context: ResolvedContext,
    pub correlation_id: String,
}

impl ToolContext {
    /// The resolved project, or [`ToolError::NoProject`].
    pub fn project(&self) -> ToolResult<&ProjectContext> {
        self.context.project().ok_or(ToolError::NoProject)
    }

    /// Store of the resolved project.
    pub async fn store(&self) -> ToolResult<SqliteStorage> {
        let project = self.project()?;
        Ok(self.state.stores.for_project(project).await?)
    }
}

/// Executes one tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: ToolContext, args: Map<String, Value>) -> ToolResult<Value>;
}

/// Adapts an async function over a typed parameter struct into a handler.
///
/// Deserialization failures surface as [`ToolError::InvalidArguments`].
pub struct TypedHandler<P, F> {
    func: F,
    _params: PhantomData<fn() -> P>,
}

impl<P, F> TypedHandler<P, F> {
    pub fn new(func: F) -> Self {
        Self {
            func,
            _params: PhantomData,
        }
    }
}

#[async_trait]
impl<P, F, Fut> ToolHandler for TypedHandler<P, F>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(ToolContext, P) -> Fut + Send + Sync,
    Fut: Future<Output = ToolResult<Value>> + Send + 'static,
{
    async fn call(&self, ctx: ToolContext, args: Map<String, Value>) -> ToolResult<Value> {
        let params: P = serde_json::from_value(Value::Object(args)).map_err(|e| {
            ToolError::InvalidArguments {
                message: e.to_string(),
            }
        })?;
        (self.func)(ctx, params).await
    }
}

/// Wrap `func` as a shareable handler.
pub fn typed<P, F, Fut>(func: F) -> Arc<dyn ToolHandler>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(ToolContext, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolResult<Value>> + Send + 'static,
{
    Arc::new(TypedHandler::new(func))
}

/// A registered tool.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments.
    pub input_schema: Value,
    /// Owning tool module (e.g., "session").
    pub module: &'static str,
    pub policy: ContextPolicy,
    /// (act, category) for workflow guidance tools.
    pub classification: Option<(&'static str, &'static str)>,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(
        module: &'static str,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        policy: ContextPolicy,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            module,
            policy,
            classification: None,
            handler,
        }
    }

    /// Attach the (act, category) this tool contributes to.
    pub fn classified(mut self, act: &'static str, category: &'static str) -> Self {
        self.classification = Some((act, category));
        self
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("policy", &self.policy)
            .field("classification", &self.classification)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryInner {
    order: Vec<Arc<ToolDefinition>>,
    by_name: HashMap<String, Arc<ToolDefinition>>,
}

/// Thread-safe tool table.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    ///
    /// # Errors
    /// Returns [`RegistryError::DuplicateTool`] if the name is taken.
    pub fn register(&self, tool: ToolDefinition) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.by_name.contains_key(&tool.name) {
            return Err(RegistryError::DuplicateTool { name: tool.name });
        }

        debug!(tool = %tool.name, module = tool.module, "Registered tool");
        let tool = Arc::new(tool);
        inner.by_name.insert(tool.name.clone(), tool.clone());
        inner.order.push(tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<ToolDefinition>> {
        self.read().by_name.get(name).cloned()
    }

    /// All tools in registration order.
    pub fn list(&self) -> Vec<Arc<ToolDefinition>> {
        self.read().order.clone()
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.read().order.iter().map(|t| t.name.clone()).collect()
    }

    /// Number of registered tools.
    pub fn count(&self) -> usize {
        self.read().order.len()
    }

    /// Number of tools owned by `module`.
    pub fn count_module(&self, module: &str) -> usize {
        self.read()
            .order
            .iter()
            .filter(|t| t.module == module)
            .count()
    }

    /// Check per-module and total counts against `expected`.
    pub fn verify(&self, expected: &[(&str, usize)]) -> Result<(), RegistryError> {
        for (module, count) in expected {
            let actual = self.count_module(module);
            if actual != *count {
                return Err(RegistryError::ModuleCountMismatch {
                    module: module.to_string(),
                    expected: *count,
                    actual,
                });
            }
        }

        let total: usize = expected.iter().map(|(_, n)| n).sum();
        let actual = self.count();
        if actual != total {
            return Err(RegistryError::TotalCountMismatch {
                expected: total,
                actual,
            });
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct EchoParams {
        text: String,
    }

    async fn echo(_ctx: ToolContext, params: EchoParams) -> ToolResult<Value> {
        Ok(json!({ "echo": params.text }))
    }

    fn tool(module: &'static str, name: &str) -> ToolDefinition {
        ToolDefinition::new(
            module,
            name,
            "test tool",
            json!({"type": "object"}),
            ContextPolicy::Optional,
            typed(echo),
        )
    }

    #[test]
    fn test_register_and_get() {
        let registry = ToolRegistry::new();
        registry.register(tool("a", "first")).unwrap();
        registry.register(tool("a", "second")).unwrap();

        assert_eq!(registry.count(), 2);
        assert!(registry.get("first").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["first", "second"]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = ToolRegistry::new();
        registry.register(tool("a", "dup")).unwrap();
        let err = registry.register(tool("b", "dup")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTool { name } if name == "dup"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_verify_counts() {
        let registry = ToolRegistry::new();
        registry.register(tool("a", "one")).unwrap();
        registry.register(tool("b", "two")).unwrap();
        registry.register(tool("b", "three")).unwrap();

        assert!(registry.verify(&[("a", 1), ("b", 2)]).is_ok());
        assert!(matches!(
            registry.verify(&[("a", 2), ("b", 2)]),
            Err(RegistryError::ModuleCountMismatch { .. })
        ));
        assert!(matches!(
            registry.verify(&[("a", 1)]),
            Err(RegistryError::TotalCountMismatch {
                expected: 1,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_classification_builder() {
        let def = tool("research", "plan").classified("design", "methodology");
        assert_eq!(def.classification, Some(("design", "methodology")));
    }
}

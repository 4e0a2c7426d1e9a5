//! Pre-invocation interceptors.
//!
//! The chain is composed once and every `tools/call` runs through it before
//! the handler. Each step may rewrite the argument map or reject the call.

use serde_json::{Map, Value};

use crate::context::{inject_context, ResolvedContext};
use crate::error::{McpError, McpResult};
use crate::registry::schema::validate_arguments;
use crate::registry::ToolDefinition;

/// One step before handler invocation.
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    fn intercept(
        &self,
        tool: &ToolDefinition,
        context: &ResolvedContext,
        args: Map<String, Value>,
    ) -> McpResult<Map<String, Value>>;
}

/// Applies the tool's context policy.
pub struct ContextInjection;

impl Interceptor for ContextInjection {
    fn name(&self) -> &'static str {
        "context_injection"
    }

    fn intercept(
        &self,
        tool: &ToolDefinition,
        context: &ResolvedContext,
        args: Map<String, Value>,
    ) -> McpResult<Map<String, Value>> {
        inject_context(&tool.name, &args, context, tool.policy)
    }
}

/// Checks arguments against the tool's input schema.
pub struct SchemaValidation;

impl Interceptor for SchemaValidation {
    fn name(&self) -> &'static str {
        "schema_validation"
    }

    fn intercept(
        &self,
        tool: &ToolDefinition,
        _context: &ResolvedContext,
        args: Map<String, Value>,
    ) -> McpResult<Map<String, Value>> {
        validate_arguments(&tool.input_schema, &args).map_err(|message| McpError::Validation {
            tool_name: tool.name.clone(),
            message,
        })?;
        Ok(args)
    }
}

/// Ordered interceptors.
pub struct InterceptorChain {
    steps: Vec<Box<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new(steps: Vec<Box<dyn Interceptor>>) -> Self {
        Self { steps }
    }

    /// Context injection, then schema validation.
    pub fn standard() -> Self {
        Self::new(vec![Box::new(ContextInjection), Box::new(SchemaValidation)])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step; the caller's map is left untouched.
    pub fn apply(
        &self,
        tool: &ToolDefinition,
        context: &ResolvedContext,
        args: &Map<String, Value>,
    ) -> McpResult<Map<String, Value>> {
        self.steps
            .iter()
            .try_fold(args.clone(), |acc, step| step.intercept(tool, context, acc))
    }
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextPolicy;
    use crate::error::ToolResult;
    use crate::registry::{typed, ToolContext};
    use serde_json::json;

    async fn noop(_ctx: ToolContext, _params: Value) -> ToolResult<Value> {
        Ok(Value::Null)
    }

    fn tool(policy: ContextPolicy) -> ToolDefinition {
        ToolDefinition::new(
            "test",
            "needs_name",
            "",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "project_path": {"type": "string"}
                },
                "required": ["name"],
                "additionalProperties": false
            }),
            policy,
            typed(noop),
        )
    }

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_standard_order() {
        assert_eq!(
            InterceptorChain::standard().names(),
            vec!["context_injection", "schema_validation"]
        );
    }

    #[test]
    fn test_required_fails_before_validation() {
        let chain = InterceptorChain::standard();
        let err = chain
            .apply(
                &tool(ContextPolicy::Required),
                &ResolvedContext::unresolved(),
                &map(json!({})),
            )
            .unwrap_err();
        assert!(matches!(err, McpError::ContextRequired { .. }));
    }

    #[test]
    fn test_validation_error() {
        let chain = InterceptorChain::standard();
        let err = chain
            .apply(
                &tool(ContextPolicy::Optional),
                &ResolvedContext::unresolved(),
                &map(json!({"name": 3})),
            )
            .unwrap_err();
        assert!(matches!(err, McpError::Validation { .. }));
        assert_eq!(err.code(), -32602);
    }

    #[test]
    fn test_passes_valid_arguments_through() {
        let chain = InterceptorChain::standard();
        let args = map(json!({"name": "ok"}));
        let out = chain
            .apply(
                &tool(ContextPolicy::Optional),
                &ResolvedContext::unresolved(),
                &args,
            )
            .unwrap();
        assert_eq!(out, args);
    }
}

//! Context injection policies applied to tool arguments.

use serde::Serialize;
use serde_json::{Map, Value};

use super::detector::{ContextSource, ResolvedContext};
use crate::error::{McpError, McpResult};

/// Argument key carrying the project path.
pub const PROJECT_PATH_ARG: &str = "project_path";

/// How a tool consumes the resolved project context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextPolicy {
    /// The tool manages context itself; arguments pass through untouched.
    None,
    /// Inject the project path when one is resolved; run stateless otherwise.
    Optional,
    /// Refuse to run without a resolved project.
    Required,
}

/// The caller's explicit `project_path`, when present and non-empty.
pub fn explicit_project_path(args: &Map<String, Value>) -> Option<&str> {
    args.get(PROJECT_PATH_ARG)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Return a copy of `args` augmented according to `policy`.
///
/// A caller-supplied `project_path` is always kept as-is, and must be the
/// project the call resolved to.
pub fn inject_context(
    tool_name: &str,
    args: &Map<String, Value>,
    context: &ResolvedContext,
    policy: ContextPolicy,
) -> McpResult<Map<String, Value>> {
    let mut augmented = args.clone();

    if policy == ContextPolicy::None {
        return Ok(augmented);
    }

    if let Some(raw) = explicit_project_path(args) {
        if context.source() != Some(ContextSource::Explicit) {
            return Err(McpError::Validation {
                tool_name: tool_name.to_string(),
                message: format!("project_path: no research project at {}", raw),
            });
        }
    }

    if policy == ContextPolicy::Required && !context.is_resolved() {
        return Err(McpError::ContextRequired {
            tool_name: tool_name.to_string(),
        });
    }

    if explicit_project_path(args).is_none() {
        if let Some(path) = context.project_path() {
            augmented.insert(
                PROJECT_PATH_ARG.to_string(),
                Value::String(path.display().to_string()),
            );
        }
    }

    Ok(augmented)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::project::{create_project, ProjectConfig};
    use serde_json::json;

    fn resolved_context() -> (tempfile::TempDir, ResolvedContext) {
        resolved_from(ContextSource::Environment)
    }

    fn resolved_from(source: ContextSource) -> (tempfile::TempDir, ResolvedContext) {
        let dir = tempfile::tempdir().unwrap();
        let project = create_project(dir.path(), &ProjectConfig::new("P", "", "General")).unwrap();
        (dir, ResolvedContext::resolved(project, source))
    }

    fn as_map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_optional_injects_when_resolved() {
        let (_dir, ctx) = resolved_context();
        let args = as_map(json!({"topic": "x"}));

        let out = inject_context("t", &args, &ctx, ContextPolicy::Optional).unwrap();
        assert_eq!(
            out[PROJECT_PATH_ARG],
            json!(ctx.project_path().unwrap().display().to_string())
        );
        assert!(!args.contains_key(PROJECT_PATH_ARG), "caller map untouched");
    }

    #[test]
    fn test_optional_without_context_passes_through() {
        let args = as_map(json!({"topic": "x"}));
        let out =
            inject_context("t", &args, &ResolvedContext::unresolved(), ContextPolicy::Optional)
                .unwrap();
        assert_eq!(out, args);
    }

    #[test]
    fn test_required_without_context_fails() {
        let args = as_map(json!({}));
        let err =
            inject_context("save_session", &args, &ResolvedContext::unresolved(), ContextPolicy::Required)
                .unwrap_err();
        assert!(matches!(err, McpError::ContextRequired { .. }));
    }

    #[test]
    fn test_explicit_value_wins() {
        let (_dir, ctx) = resolved_from(ContextSource::Explicit);
        let caller = format!("{}/", ctx.project_path().unwrap().display());
        let args = as_map(json!({"project_path": caller}));

        let out = inject_context("t", &args, &ctx, ContextPolicy::Required).unwrap();
        assert_eq!(out[PROJECT_PATH_ARG], json!(caller));
    }

    #[test]
    fn test_unresolvable_explicit_value_is_rejected() {
        let (_dir, ctx) = resolved_context();
        let args = as_map(json!({"project_path": "/no/such/typo"}));

        for policy in [ContextPolicy::Optional, ContextPolicy::Required] {
            let err = inject_context("save_session", &args, &ctx, policy).unwrap_err();
            assert!(matches!(err, McpError::Validation { .. }));
            assert!(err.to_string().contains("/no/such/typo"));
        }

        let err = inject_context("t", &args, &ResolvedContext::unresolved(), ContextPolicy::Required)
            .unwrap_err();
        assert!(matches!(err, McpError::Validation { .. }));
    }

    #[test]
    fn test_empty_explicit_value_is_replaced() {
        let (_dir, ctx) = resolved_context();
        let args = as_map(json!({"project_path": "  "}));

        let out = inject_context("t", &args, &ctx, ContextPolicy::Optional).unwrap();
        assert_ne!(out[PROJECT_PATH_ARG], json!("  "));
    }

    #[test]
    fn test_policy_none_never_injects() {
        let (_dir, ctx) = resolved_context();
        let args = as_map(json!({"name": "Demo"}));
        let out = inject_context("initialize_project", &args, &ctx, ContextPolicy::None).unwrap();
        assert_eq!(out, args);
    }
}

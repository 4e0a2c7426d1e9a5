//! Tool modules.
//!
//! Each module registers its tools with the [`ToolRegistry`];
//! [`register_all`] then checks the result against [`EXPECTED_TOOL_COUNTS`].

pub mod progress;
pub mod project;
pub mod research;
pub mod session;

use serde_json::{json, Value};

use crate::context::PROJECT_PATH_ARG;
use crate::error::{RegistryError, ToolError, ToolResult};
use crate::registry::ToolRegistry;

/// Tools per module.
pub const EXPECTED_TOOL_COUNTS: &[(&str, usize)] = &[
    ("project", 5),
    ("session", 4),
    ("progress", 5),
    ("research", 16),
];

/// Register every tool module and verify the counts.
pub fn register_all(registry: &ToolRegistry) -> Result<(), RegistryError> {
    project::register(registry)?;
    session::register(registry)?;
    progress::register(registry)?;
    research::register(registry)?;
    registry.verify(EXPECTED_TOOL_COUNTS)
}

/// Closed object schema. Every tool also accepts `project_path`.
pub(crate) fn object_schema(properties: Value, required: &[&str]) -> Value {
    let mut properties = match properties {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    properties.entry(PROJECT_PATH_ARG).or_insert_with(|| {
        json!({
            "type": "string",
            "description": "Research project directory. Defaults to the active project."
        })
    });

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

/// Reject blank strings.
pub(crate) fn require_non_empty(field: &str, value: &str) -> ToolResult<()> {
    if value.trim().is_empty() {
        return Err(ToolError::Validation {
            field: field.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all_counts() {
        let registry = ToolRegistry::new();
        register_all(&registry).unwrap();
        assert_eq!(registry.count(), 30);
        for (module, count) in EXPECTED_TOOL_COUNTS {
            assert_eq!(registry.count_module(module), *count, "module {}", module);
        }
    }

    #[test]
    fn test_register_all_twice_fails() {
        let registry = ToolRegistry::new();
        register_all(&registry).unwrap();
        assert!(matches!(
            register_all(&registry),
            Err(RegistryError::DuplicateTool { .. })
        ));
    }

    #[test]
    fn test_every_schema_is_closed_and_accepts_project_path() {
        let registry = ToolRegistry::new();
        register_all(&registry).unwrap();
        for tool in registry.list() {
            let schema = &tool.input_schema;
            assert_eq!(schema["type"], "object", "{}", tool.name);
            assert_eq!(schema["additionalProperties"], false, "{}", tool.name);
            assert!(
                schema["properties"].get(PROJECT_PATH_ARG).is_some(),
                "{}",
                tool.name
            );
        }
    }

    #[test]
    fn test_object_schema_keeps_explicit_project_path() {
        let schema = object_schema(
            json!({"project_path": {"type": "string", "description": "Target"}}),
            &["project_path"],
        );
        assert_eq!(schema["properties"]["project_path"]["description"], "Target");
        assert_eq!(schema["required"], json!(["project_path"]));
    }
}

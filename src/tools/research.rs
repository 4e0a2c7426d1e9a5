//! Research guidance tools, one per checklist entry of the workflow catalog.
//!
//! Each tool returns its guidance steps. With a resolved project the answer
//! also reports the category's checklist coverage; without one it runs
//! stateless.

use serde::Deserialize;
use serde_json::{json, Value};

use super::object_schema;
use crate::context::ContextPolicy;
use crate::error::{RegistryError, ToolResult};
use crate::registry::{typed, ToolContext, ToolDefinition, ToolRegistry};
use crate::storage::Storage;
use crate::workflow::{self, CategoryRef, GuidanceTool};

const MODULE: &str = "research";

pub fn register(registry: &ToolRegistry) -> Result<(), RegistryError> {
    for category in workflow::categories() {
        for tool in category.category.tools {
            let description = format!(
                "{} ({} / {})",
                tool.description, category.act.title, category.category.title
            );
            registry.register(
                ToolDefinition::new(
                    MODULE,
                    tool.name,
                    description,
                    object_schema(
                        json!({
                            "topic": {"type": "string", "description": "Subject to apply the guidance to"},
                            "notes": {"type": "string", "description": "Context or constraints to take into account"}
                        }),
                        &[],
                    ),
                    ContextPolicy::Optional,
                    typed(move |ctx: ToolContext, params: GuidanceParams| {
                        guide(ctx, params, category, tool)
                    }),
                )
                .classified(category.act.name, category.category.name),
            )?;
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct GuidanceParams {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

async fn guide(
    ctx: ToolContext,
    params: GuidanceParams,
    category: CategoryRef,
    tool: &'static GuidanceTool,
) -> ToolResult<Value> {
    let steps: Vec<String> = tool
        .steps
        .iter()
        .map(|step| match params.topic.as_deref() {
            Some(topic) => format!("{} (topic: {})", step, topic),
            None => step.to_string(),
        })
        .collect();

    let mut result = json!({
        "tool": tool.name,
        "research_act": category.act.name,
        "research_category": category.category.name,
        "title": category.category.title,
        "guidance": tool.description,
        "steps": steps,
        "topic": params.topic,
        "notes": params.notes,
        "project": Value::Null,
    });

    if let Some(project) = ctx.context.project() {
        let store = ctx.store().await?;
        let checklist = category.checklist();
        let done = store
            .get_progress(project.id())
            .await?
            .into_iter()
            .find(|r| {
                r.research_act == category.act.name
                    && r.research_category == category.category.name
            })
            .map(|r| r.tools_used)
            .unwrap_or_default();
        let remaining: Vec<&str> = checklist
            .iter()
            .copied()
            .filter(|t| *t != tool.name && !done.iter().any(|d| d == t))
            .collect();

        result["project"] = json!({
            "project_id": project.id(),
            "project_path": project.root().display().to_string(),
        });
        result["checklist_remaining"] = json!(remaining);
    }

    Ok(result)
}

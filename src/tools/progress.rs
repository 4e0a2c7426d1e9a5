//! Progress tools: workflow progress, reviews, recommendations and resets.

use serde::Deserialize;
use serde_json::{json, Value};

use super::object_schema;
use crate::context::ContextPolicy;
use crate::error::{RegistryError, ToolError, ToolResult};
use crate::registry::{typed, ToolContext, ToolDefinition, ToolRegistry};
use crate::storage::{next_recommendation, RecommendationStatus, ResearchProgress, Storage};
use crate::workflow;

const MODULE: &str = "progress";

pub fn register(registry: &ToolRegistry) -> Result<(), RegistryError> {
    let act_names: Vec<&str> = workflow::CATALOG.iter().map(|a| a.name).collect();
    let category_names: Vec<&str> = workflow::categories().map(|c| c.category.name).collect();

    registry.register(ToolDefinition::new(
        MODULE,
        "get_research_progress",
        "Show workflow progress for the active project: every category's status and checklist coverage, per-act totals and milestones.",
        object_schema(
            json!({
                "research_act": {"type": "string", "enum": act_names.clone(), "description": "Only this act"}
            }),
            &[],
        ),
        ContextPolicy::Required,
        typed(get_research_progress),
    ))?;

    registry.register(ToolDefinition::new(
        MODULE,
        "review_category",
        "Mark a completed category as reviewed.",
        object_schema(
            json!({
                "research_act": {"type": "string", "enum": act_names.clone()},
                "research_category": {"type": "string", "enum": category_names.clone()}
            }),
            &["research_act", "research_category"],
        ),
        ContextPolicy::Required,
        typed(review_category),
    ))?;

    registry.register(ToolDefinition::new(
        MODULE,
        "get_workflow_recommendations",
        "List workflow recommendations for the active project and suggest the next category to work on.",
        object_schema(
            json!({
                "status": {"type": "string", "enum": ["pending", "accepted", "dismissed"]}
            }),
            &[],
        ),
        ContextPolicy::Required,
        typed(get_workflow_recommendations),
    ))?;

    registry.register(ToolDefinition::new(
        MODULE,
        "update_recommendation",
        "Accept or dismiss a workflow recommendation.",
        object_schema(
            json!({
                "recommendation_id": {"type": "string", "minLength": 1},
                "status": {"type": "string", "enum": ["accepted", "dismissed"]}
            }),
            &["recommendation_id", "status"],
        ),
        ContextPolicy::Required,
        typed(update_recommendation),
    ))?;

    registry.register(ToolDefinition::new(
        MODULE,
        "reset_progress",
        "Reset progress to not_started for the whole project, one act, or one category. Requires confirm=true.",
        object_schema(
            json!({
                "research_act": {"type": "string", "enum": act_names},
                "research_category": {"type": "string", "enum": category_names},
                "confirm": {"type": "boolean", "description": "Must be true"}
            }),
            &["confirm"],
        ),
        ContextPolicy::Required,
        typed(reset_progress),
    ))?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct ProgressParams {
    #[serde(default)]
    research_act: Option<String>,
}

async fn get_research_progress(ctx: ToolContext, params: ProgressParams) -> ToolResult<Value> {
    let project = ctx.project()?;
    let store = ctx.store().await?;

    let rows = store.get_progress(project.id()).await?;
    let milestones = store.list_milestones(project.id()).await?;

    let acts: Vec<Value> = workflow::CATALOG
        .iter()
        .filter(|act| params.research_act.as_deref().map_or(true, |a| a == act.name))
        .map(|act| {
            let act_rows: Vec<&ResearchProgress> =
                rows.iter().filter(|r| r.research_act == act.name).collect();
            json!({
                "research_act": act.name,
                "title": act.title,
                "completion_percentage": average(act_rows.iter().map(|r| r.completion_percentage)),
                "categories": act_rows,
            })
        })
        .collect();

    Ok(json!({
        "project_id": project.id(),
        "overall_percentage": average(rows.iter().map(|r| r.completion_percentage)),
        "acts": acts,
        "milestones": milestones,
    }))
}

#[derive(Debug, Deserialize)]
struct ReviewParams {
    research_act: String,
    research_category: String,
}

async fn review_category(ctx: ToolContext, params: ReviewParams) -> ToolResult<Value> {
    let project = ctx.project()?;
    if workflow::find_category(&params.research_act, &params.research_category).is_none() {
        return Err(ToolError::Validation {
            field: "research_category".to_string(),
            reason: format!(
                "{} is not a category of {}",
                params.research_category, params.research_act
            ),
        });
    }

    let store = ctx.store().await?;
    let current = store
        .get_progress(project.id())
        .await?
        .into_iter()
        .find(|r| {
            r.research_act == params.research_act && r.research_category == params.research_category
        });
    if !current.map(|r| r.status.is_done()).unwrap_or(false) {
        return Err(ToolError::Validation {
            field: "research_category".to_string(),
            reason: format!(
                "{}/{} must be completed before it can be reviewed",
                params.research_act, params.research_category
            ),
        });
    }

    let (progress, milestones) = store
        .review_category(project.id(), &params.research_act, &params.research_category)
        .await?;

    Ok(json!({
        "progress": progress,
        "new_milestones": milestones,
    }))
}

#[derive(Debug, Deserialize)]
struct RecommendationsParams {
    #[serde(default)]
    status: Option<RecommendationStatus>,
}

async fn get_workflow_recommendations(
    ctx: ToolContext,
    params: RecommendationsParams,
) -> ToolResult<Value> {
    let project = ctx.project()?;
    let store = ctx.store().await?;

    let recommendations = store
        .list_recommendations(project.id(), params.status)
        .await?;
    let rows = store.get_progress(project.id()).await?;
    let current_act = store
        .get_active_session(project.id())
        .await?
        .and_then(|s| s.research_act);
    let suggestion = next_recommendation(&rows, current_act.as_deref()).map(|draft| {
        json!({
            "research_act": draft.next_act,
            "research_category": draft.next_category,
            "tools": draft.tools,
            "priority": draft.priority,
            "reasoning": draft.reasoning,
        })
    });

    Ok(json!({
        "recommendations": recommendations,
        "suggested_next": suggestion,
    }))
}

#[derive(Debug, Deserialize)]
struct UpdateRecommendationParams {
    recommendation_id: String,
    status: RecommendationStatus,
}

async fn update_recommendation(
    ctx: ToolContext,
    params: UpdateRecommendationParams,
) -> ToolResult<Value> {
    let project = ctx.project()?;
    if params.status == RecommendationStatus::Pending {
        return Err(ToolError::Validation {
            field: "status".to_string(),
            reason: "must be accepted or dismissed".to_string(),
        });
    }

    let store = ctx.store().await?;
    let owned = store
        .list_recommendations(project.id(), None)
        .await?
        .into_iter()
        .any(|r| r.id == params.recommendation_id);
    if !owned {
        return Err(ToolError::Validation {
            field: "recommendation_id".to_string(),
            reason: format!("no recommendation {} in this project", params.recommendation_id),
        });
    }

    let updated = store
        .update_recommendation(&params.recommendation_id, params.status)
        .await?;
    Ok(json!({ "recommendation": updated }))
}

#[derive(Debug, Deserialize)]
struct ResetParams {
    #[serde(default)]
    research_act: Option<String>,
    #[serde(default)]
    research_category: Option<String>,
    confirm: bool,
}

async fn reset_progress(ctx: ToolContext, params: ResetParams) -> ToolResult<Value> {
    let project = ctx.project()?;
    if !params.confirm {
        return Err(ToolError::Validation {
            field: "confirm".to_string(),
            reason: "must be true to reset progress".to_string(),
        });
    }

    let store = ctx.store().await?;
    let reset = store
        .reset_progress(
            project.id(),
            params.research_act.as_deref(),
            params.research_category.as_deref(),
        )
        .await?;

    Ok(json!({
        "project_id": project.id(),
        "categories_reset": reset,
    }))
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        return 0.0;
    }
    ((sum / count as f64) * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average() {
        assert_eq!(average(std::iter::empty()), 0.0);
        assert_eq!(average([100.0, 50.0].into_iter()), 75.0);
        assert_eq!(average([100.0, 0.0, 0.0].into_iter()), 33.3);
    }
}

//! Project tools: create, inspect and switch research projects.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{object_schema, require_non_empty};
use crate::context::{create_project, slugify, ContextPolicy, ProjectConfig, ProjectContext};
use crate::error::{RegistryError, ToolError, ToolResult};
use crate::registry::{typed, ToolContext, ToolDefinition, ToolRegistry};
use crate::storage::{Project, Session, Storage};
use crate::workflow;

const MODULE: &str = "project";

pub fn register(registry: &ToolRegistry) -> Result<(), RegistryError> {
    registry.register(ToolDefinition::new(
        MODULE,
        "initialize_project",
        "Create a new research project directory with its config, database, a default session and an empty progress table, and make it the active project.",
        object_schema(
            json!({
                "name": {"type": "string", "minLength": 1, "description": "Project name"},
                "description": {"type": "string", "description": "What the project investigates"},
                "domain": {"type": "string", "description": "Research domain (default: General)"},
                "methodology": {"type": "string", "description": "Planned methodology"},
                "novel_theory_mode": {"type": "boolean", "description": "Project develops new theory"},
                "project_path": {
                    "type": "string",
                    "description": "Directory to create. Empty means <projects root>/<slug of name>."
                }
            }),
            &["name"],
        ),
        ContextPolicy::None,
        typed(initialize_project),
    ))?;

    registry.register(ToolDefinition::new(
        MODULE,
        "get_project_info",
        "Describe the active research project: config, how it was resolved, its active session and usage totals.",
        object_schema(json!({}), &[]),
        ContextPolicy::Required,
        typed(get_project_info),
    ))?;

    registry.register(ToolDefinition::new(
        MODULE,
        "switch_project",
        "Make another existing research project the active one for subsequent calls.",
        object_schema(
            json!({
                "project_path": {"type": "string", "minLength": 1, "description": "Project directory to activate"}
            }),
            &["project_path"],
        ),
        ContextPolicy::None,
        typed(switch_project),
    ))?;

    registry.register(ToolDefinition::new(
        MODULE,
        "reset_context",
        "Forget any switched project and re-detect the active project from the environment.",
        object_schema(json!({}), &[]),
        ContextPolicy::None,
        typed(reset_context),
    ))?;

    registry.register(ToolDefinition::new(
        MODULE,
        "list_project_sessions",
        "List the sessions of the active project, newest first.",
        object_schema(
            json!({
                "limit": {"type": "integer", "minimum": 1, "description": "Maximum sessions to return"}
            }),
            &[],
        ),
        ContextPolicy::Required,
        typed(list_project_sessions),
    ))?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct InitializeProjectParams {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    methodology: Option<String>,
    #[serde(default)]
    novel_theory_mode: bool,
    #[serde(default)]
    project_path: Option<String>,
}

async fn initialize_project(ctx: ToolContext, params: InitializeProjectParams) -> ToolResult<Value> {
    require_non_empty("name", &params.name)?;

    let root = match params.project_path.as_deref().map(str::trim) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => ctx.state.detector.projects_root().join(slugify(&params.name)),
    };

    let domain = params
        .domain
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| "General".to_string());
    let mut config = ProjectConfig::new(params.name.trim(), params.description, domain);
    config.project.methodology = params.methodology;
    config.project.novel_theory_mode = params.novel_theory_mode;

    let project = create_project(&root, &config)?;
    let session = Session::new(project.id(), "default");
    if let Err(e) = seed_project(&ctx, &project, &session).await {
        ctx.state.stores.evict(project.root()).await;
        let marker = project.layout.marker_dir();
        if let Err(io) = std::fs::remove_dir_all(&marker) {
            warn!(path = %marker.display(), error = %io, "Failed to remove partial project");
        }
        return Err(e);
    }

    ctx.state.detector.switch_project(project.root())?;
    info!(project_id = %project.id(), path = %project.root().display(), "Research project initialized");

    Ok(json!({
        "project_id": project.id(),
        "name": project.name(),
        "project_path": project.root().display().to_string(),
        "session_id": session.id,
        "categories_seeded": workflow::categories().count(),
        "active": true,
    }))
}

async fn seed_project(ctx: &ToolContext, project: &ProjectContext, session: &Session) -> ToolResult<()> {
    let store = ctx.state.stores.for_project(project).await?;
    store
        .initialize_project(&Project::from_context(project), session)
        .await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct NoParams {}

async fn get_project_info(ctx: ToolContext, _params: NoParams) -> ToolResult<Value> {
    let project = ctx.project()?;
    let store = ctx.store().await?;

    let active = store.get_active_session(project.id()).await?;
    let sessions = store.list_sessions(project.id()).await?;
    let usage = store.count_project_usage(project.id()).await?;
    let progress = store.get_progress(project.id()).await?;
    let completed = progress.iter().filter(|p| p.status.is_done()).count();

    Ok(json!({
        "project": describe(project),
        "source": ctx.context.source(),
        "active_session": active,
        "session_count": sessions.len(),
        "tool_usage_count": usage,
        "categories_completed": completed,
        "categories_total": progress.len(),
    }))
}

#[derive(Debug, Deserialize)]
struct SwitchProjectParams {
    project_path: String,
}

async fn switch_project(ctx: ToolContext, params: SwitchProjectParams) -> ToolResult<Value> {
    require_non_empty("project_path", &params.project_path)?;

    let project = ctx
        .state
        .detector
        .switch_project(Path::new(params.project_path.trim()))
        .map_err(|e| ToolError::Validation {
            field: "project_path".to_string(),
            reason: e.to_string(),
        })?;
    ctx.state.stores.for_project(&project).await?;

    Ok(json!({
        "project": describe(&project),
        "switched": true,
    }))
}

async fn reset_context(ctx: ToolContext, _params: NoParams) -> ToolResult<Value> {
    ctx.state.detector.reset_context();
    let resolved = ctx.state.detector.resolve_ambient();

    Ok(json!({
        "project": resolved.project().map(describe),
        "source": resolved.source(),
        "resolved": resolved.is_resolved(),
    }))
}

#[derive(Debug, Deserialize)]
struct ListSessionsParams {
    #[serde(default)]
    limit: Option<usize>,
}

async fn list_project_sessions(ctx: ToolContext, params: ListSessionsParams) -> ToolResult<Value> {
    let project = ctx.project()?;
    let store = ctx.store().await?;

    let mut sessions = store.list_sessions(project.id()).await?;
    let total = sessions.len();
    if let Some(limit) = params.limit {
        sessions.truncate(limit);
    }

    Ok(json!({
        "project_id": project.id(),
        "total": total,
        "sessions": sessions,
    }))
}

fn describe(project: &ProjectContext) -> Value {
    let section = &project.config.project;
    json!({
        "id": section.id,
        "name": section.name,
        "description": section.description,
        "domain": section.domain,
        "methodology": section.methodology,
        "novel_theory_mode": section.novel_theory_mode,
        "created_at": section.created_at,
        "project_path": project.root().display().to_string(),
    })
}

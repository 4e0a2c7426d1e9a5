//! Session tools.
//!
//! A project has at most one active session. Tools that need one and find
//! none open an implicit session rather than failing.

use serde::Deserialize;
use serde_json::{json, Value};

use super::object_schema;
use crate::context::ContextPolicy;
use crate::error::{RegistryError, StorageError, ToolError, ToolResult};
use crate::registry::{typed, ToolContext, ToolDefinition, ToolRegistry};
use crate::storage::{Session, Storage};
use crate::workflow;

const MODULE: &str = "session";

pub fn register(registry: &ToolRegistry) -> Result<(), RegistryError> {
    let act_names: Vec<&str> = workflow::CATALOG.iter().map(|a| a.name).collect();

    registry.register(ToolDefinition::new(
        MODULE,
        "start_session",
        "Start a new working session in the active project, ending the current one.",
        object_schema(
            json!({
                "session_type": {"type": "string", "description": "Kind of session (default: default)"},
                "research_act": {"type": "string", "enum": act_names, "description": "Act this session focuses on"},
                "research_focus": {"type": "string", "description": "Free-text focus"},
                "goals": {"type": "array", "items": {"type": "string"}, "description": "Session goals"}
            }),
            &[],
        ),
        ContextPolicy::Required,
        typed(start_session),
    ))?;

    registry.register(ToolDefinition::new(
        MODULE,
        "save_session",
        "Save arbitrary session state to the active session so work can resume later.",
        object_schema(
            json!({
                "data": {"type": "object", "description": "State to store; replaces the previous payload"}
            }),
            &["data"],
        ),
        ContextPolicy::Required,
        typed(save_session),
    ))?;

    registry.register(ToolDefinition::new(
        MODULE,
        "end_session",
        "End a session of the active project (the active session by default).",
        object_schema(
            json!({
                "session_id": {"type": "string", "description": "Session to end"}
            }),
            &[],
        ),
        ContextPolicy::Required,
        typed(end_session),
    ))?;

    registry.register(ToolDefinition::new(
        MODULE,
        "get_session_status",
        "Show a session of the active project (the active session by default) and the tools used in it.",
        object_schema(
            json!({
                "session_id": {"type": "string", "description": "Session to inspect"}
            }),
            &[],
        ),
        ContextPolicy::Required,
        typed(get_session_status),
    ))?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct StartSessionParams {
    #[serde(default)]
    session_type: Option<String>,
    #[serde(default)]
    research_act: Option<String>,
    #[serde(default)]
    research_focus: Option<String>,
    #[serde(default)]
    goals: Vec<String>,
}

async fn start_session(ctx: ToolContext, params: StartSessionParams) -> ToolResult<Value> {
    let project = ctx.project()?;
    let store = ctx.store().await?;

    let session_type = params
        .session_type
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "default".to_string());
    let mut session = Session::new(project.id(), session_type).with_goals(params.goals);
    if let Some(act) = params.research_act {
        session = session.with_act(act);
    }
    if let Some(focus) = params.research_focus {
        session = session.with_focus(focus);
    }

    let previous = store.get_active_session(project.id()).await?;
    let session = store.start_session(&session).await?;

    Ok(json!({
        "session_id": session.id,
        "session": session,
        "ended_previous": previous.map(|s| s.id),
    }))
}

#[derive(Debug, Deserialize)]
struct SaveSessionParams {
    data: Value,
}

async fn save_session(ctx: ToolContext, params: SaveSessionParams) -> ToolResult<Value> {
    let project = ctx.project()?;
    let store = ctx.store().await?;

    let active = store.open_session(project.id(), "auto").await?;
    let session = store.save_session_data(&active.id, &params.data).await?;

    Ok(json!({
        "session_id": session.id,
        "saved_at": session.updated_at,
        "correlation_id": ctx.correlation_id,
    }))
}

#[derive(Debug, Deserialize)]
struct SessionRef {
    #[serde(default)]
    session_id: Option<String>,
}

async fn end_session(ctx: ToolContext, params: SessionRef) -> ToolResult<Value> {
    let project = ctx.project()?;
    let store = ctx.store().await?;

    let session_id = match params.session_id {
        Some(id) => owned_session(&store, project.id(), &id).await?.id,
        None => store
            .get_active_session(project.id())
            .await?
            .ok_or_else(|| StorageError::NoActiveSession {
                project_id: project.id().to_string(),
            })?
            .id,
    };

    let session = store.end_session(&session_id).await?;
    Ok(json!({
        "session_id": session.id,
        "session": session,
    }))
}

async fn get_session_status(ctx: ToolContext, params: SessionRef) -> ToolResult<Value> {
    let project = ctx.project()?;
    let store = ctx.store().await?;

    let session = match params.session_id {
        Some(id) => Some(owned_session(&store, project.id(), &id).await?),
        None => store.get_active_session(project.id()).await?,
    };

    let Some(session) = session else {
        return Ok(json!({
            "active": false,
            "project_id": project.id(),
        }));
    };

    let usage = store.get_session_usage(&session.id).await?;
    let tools_used: Vec<&str> = usage.iter().map(|u| u.tool_name.as_str()).collect();
    Ok(json!({
        "active": session.status == crate::storage::SessionStatus::Active,
        "session_id": session.id,
        "session": session,
        "tool_count": usage.len(),
        "tools_used": tools_used,
    }))
}

/// Fetch a session and check that it belongs to `project_id`.
async fn owned_session<S: Storage>(store: &S, project_id: &str, id: &str) -> ToolResult<Session> {
    match store.get_session(id).await? {
        Some(session) if session.project_id == project_id => Ok(session),
        _ => Err(ToolError::Validation {
            field: "session_id".to_string(),
            reason: format!("no session {} in this project", id),
        }),
    }
}

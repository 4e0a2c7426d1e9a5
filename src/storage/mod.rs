//! Storage layer for research session and progress persistence.
//!
//! Every project owns a SQLite database inside its `.research` directory.
//! This module provides the domain types stored there, the [`Storage`]
//! trait, the SQLite implementation and the per-project store registry.

mod progress;
mod sqlite;

pub use progress::{
    apply_tool_use, coverage_percentage, is_act_complete, next_recommendation,
    RecommendationDraft,
};
pub use sqlite::{ProjectStores, SqliteStorage};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ProjectContext;
use crate::error::StorageResult;

/// A research project, mirrored from its on-disk config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project identifier from the config file.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Research domain (e.g., "General", "Biology").
    pub domain: String,
    /// Canonical project root. Unique across projects.
    pub project_path: String,
    /// Chosen methodology, if any.
    pub methodology: Option<String>,
    /// Whether the project develops new theory rather than testing existing theory.
    pub novel_theory_mode: bool,
    /// When the project was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last synced.
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Build the relational view of a validated project directory.
    pub fn from_context(ctx: &ProjectContext) -> Self {
        let section = &ctx.config.project;
        Self {
            id: section.id.clone(),
            name: section.name.clone(),
            description: section.description.clone(),
            domain: section.domain.clone(),
            project_path: ctx.root().display().to_string(),
            methodology: section.methodology.clone(),
            novel_theory_mode: section.novel_theory_mode,
            created_at: section.created_at,
            updated_at: Utc::now(),
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Ended,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Ended => write!(f, "ended"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SessionStatus::Active),
            "ended" => Ok(SessionStatus::Ended),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// A working session within a project. At most one is active per project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Kind of session (e.g., "default", "auto", "writing").
    pub session_type: String,
    /// Act the session focuses on, if declared.
    pub research_act: Option<String>,
    /// Free-text focus.
    pub research_focus: Option<String>,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the session ended.
    pub ended_at: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Session goals.
    pub goals: Vec<String>,
    /// Opaque payload written by `save_session`.
    pub data: Option<serde_json::Value>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new active session.
    pub fn new(project_id: impl Into<String>, session_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            session_type: session_type.into(),
            research_act: None,
            research_focus: None,
            started_at: now,
            ended_at: None,
            status: SessionStatus::Active,
            goals: Vec::new(),
            data: None,
            updated_at: now,
        }
    }

    /// Set the research act.
    pub fn with_act(mut self, act: impl Into<String>) -> Self {
        self.research_act = Some(act.into());
        self
    }

    /// Set the research focus.
    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.research_focus = Some(focus.into());
        self
    }

    /// Set the session goals.
    pub fn with_goals(mut self, goals: Vec<String>) -> Self {
        self.goals = goals;
        self
    }
}

/// Append-only record of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub id: String,
    pub session_id: String,
    pub tool_name: String,
    pub research_act: Option<String>,
    pub research_category: Option<String>,
    pub arguments: serde_json::Value,
    pub result_summary: Option<String>,
    pub execution_time_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Progress state of one (act, category).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Reviewed,
}

impl ProgressStatus {
    /// Completed or reviewed.
    pub fn is_done(self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Reviewed)
    }
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressStatus::NotStarted => write!(f, "not_started"),
            ProgressStatus::InProgress => write!(f, "in_progress"),
            ProgressStatus::Completed => write!(f, "completed"),
            ProgressStatus::Reviewed => write!(f, "reviewed"),
        }
    }
}

impl std::str::FromStr for ProgressStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "not_started" => Ok(ProgressStatus::NotStarted),
            "in_progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            "reviewed" => Ok(ProgressStatus::Reviewed),
            _ => Err(format!("Unknown progress status: {}", s)),
        }
    }
}

/// Progress row for one (project, act, category).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchProgress {
    pub project_id: String,
    pub research_act: String,
    pub research_category: String,
    pub status: ProgressStatus,
    /// Checklist coverage in percent. Never decreases outside an explicit reset.
    pub completion_percentage: f64,
    /// Distinct checklist tools that have succeeded at least once.
    pub tools_used: Vec<String>,
    pub milestone_reached: bool,
    pub last_activity: Option<DateTime<Utc>>,
}

impl ResearchProgress {
    /// A fresh `not_started` row.
    pub fn not_started(
        project_id: impl Into<String>,
        act: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            research_act: act.into(),
            research_category: category.into(),
            status: ProgressStatus::NotStarted,
            completion_percentage: 0.0,
            tools_used: Vec::new(),
            milestone_reached: false,
            last_activity: None,
        }
    }
}

/// Kind of milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneType {
    CategoryCompleted,
    CategoryReviewed,
    ActCompleted,
}

impl std::fmt::Display for MilestoneType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MilestoneType::CategoryCompleted => write!(f, "category_completed"),
            MilestoneType::CategoryReviewed => write!(f, "category_reviewed"),
            MilestoneType::ActCompleted => write!(f, "act_completed"),
        }
    }
}

impl std::str::FromStr for MilestoneType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "category_completed" => Ok(MilestoneType::CategoryCompleted),
            "category_reviewed" => Ok(MilestoneType::CategoryReviewed),
            "act_completed" => Ok(MilestoneType::ActCompleted),
            _ => Err(format!("Unknown milestone type: {}", s)),
        }
    }
}

/// Append-only record of a qualifying progress transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub project_id: String,
    pub milestone_type: MilestoneType,
    pub name: String,
    pub research_act: String,
    /// `None` for act-level milestones.
    pub research_category: Option<String>,
    pub achieved_at: DateTime<Utc>,
    pub impact_score: f64,
}

impl Milestone {
    pub fn new(
        project_id: impl Into<String>,
        milestone_type: MilestoneType,
        name: impl Into<String>,
        act: impl Into<String>,
        category: Option<String>,
        impact_score: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            milestone_type,
            name: name.into(),
            research_act: act.into(),
            research_category: category,
            achieved_at: Utc::now(),
            impact_score,
        }
    }
}

/// Lifecycle state of a recommendation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    #[default]
    Pending,
    Accepted,
    Dismissed,
}

impl std::fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecommendationStatus::Pending => write!(f, "pending"),
            RecommendationStatus::Accepted => write!(f, "accepted"),
            RecommendationStatus::Dismissed => write!(f, "dismissed"),
        }
    }
}

impl std::str::FromStr for RecommendationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RecommendationStatus::Pending),
            "accepted" => Ok(RecommendationStatus::Accepted),
            "dismissed" => Ok(RecommendationStatus::Dismissed),
            _ => Err(format!("Unknown recommendation status: {}", s)),
        }
    }
}

/// Recommendation priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// Suggested next step in the workflow. Superseded, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecommendation {
    pub id: String,
    pub project_id: String,
    pub session_id: Option<String>,
    pub current_research_act: Option<String>,
    pub recommended_next_act: String,
    pub recommended_category: String,
    pub recommended_tools: Vec<String>,
    pub reasoning: String,
    pub priority: Priority,
    pub status: RecommendationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything known about one finished invocation, ready to persist.
#[derive(Debug, Clone)]
pub struct InvocationRecord {
    pub project_id: String,
    /// Session the handler worked on, when it names one. The project's active
    /// session (created on demand) is used otherwise.
    pub session_id: Option<String>,
    pub tool_name: String,
    /// (act, category) when the tool is on a category checklist.
    pub classification: Option<(String, String)>,
    pub arguments: serde_json::Value,
    pub result_summary: Option<String>,
    pub execution_time_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub correlation_id: Option<String>,
}

/// Rows written by [`Storage::record_invocation`].
#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub usage_id: String,
    pub session_id: String,
    pub progress: Option<ResearchProgress>,
    pub milestones: Vec<Milestone>,
    pub recommendation: Option<WorkflowRecommendation>,
}

/// Storage trait for research persistence.
#[async_trait]
pub trait Storage: Send + Sync {
    // Project operations

    /// Insert or refresh the project row.
    async fn upsert_project(&self, project: &Project) -> StorageResult<()>;
    /// Get a project by id.
    async fn get_project(&self, id: &str) -> StorageResult<Option<Project>>;
    /// Create the project row, its first session and `not_started` progress
    /// for every catalog category, atomically.
    async fn initialize_project(&self, project: &Project, session: &Session) -> StorageResult<()>;

    // Session operations

    /// Return the active session, creating one of `session_type` if none is active.
    async fn open_session(&self, project_id: &str, session_type: &str) -> StorageResult<Session>;
    /// End any active session and make `session` the active one.
    async fn start_session(&self, session: &Session) -> StorageResult<Session>;
    /// Get a session by id.
    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>>;
    /// Get the active session of a project.
    async fn get_active_session(&self, project_id: &str) -> StorageResult<Option<Session>>;
    /// All sessions of a project, newest first.
    async fn list_sessions(&self, project_id: &str) -> StorageResult<Vec<Session>>;
    /// Replace the data payload of a session.
    async fn save_session_data(
        &self,
        session_id: &str,
        data: &serde_json::Value,
    ) -> StorageResult<Session>;
    /// Mark a session ended.
    async fn end_session(&self, session_id: &str) -> StorageResult<Session>;

    // Usage and progress

    /// Persist a usage row plus its derived progress, milestones and
    /// recommendation as one unit.
    async fn record_invocation(&self, record: &InvocationRecord) -> StorageResult<RecordOutcome>;
    /// Usage rows of a session, oldest first.
    async fn get_session_usage(&self, session_id: &str) -> StorageResult<Vec<ToolUsage>>;
    /// Number of usage rows across a project.
    async fn count_project_usage(&self, project_id: &str) -> StorageResult<i64>;
    /// Progress rows of a project, in catalog order.
    async fn get_progress(&self, project_id: &str) -> StorageResult<Vec<ResearchProgress>>;
    /// Move a completed category to `reviewed`.
    async fn review_category(
        &self,
        project_id: &str,
        act: &str,
        category: &str,
    ) -> StorageResult<(ResearchProgress, Vec<Milestone>)>;
    /// Reset progress rows to `not_started`. `None` filters match everything.
    async fn reset_progress(
        &self,
        project_id: &str,
        act: Option<&str>,
        category: Option<&str>,
    ) -> StorageResult<u64>;

    // Milestones and recommendations

    /// Milestones of a project, oldest first.
    async fn list_milestones(&self, project_id: &str) -> StorageResult<Vec<Milestone>>;
    /// Recommendations of a project, newest first.
    async fn list_recommendations(
        &self,
        project_id: &str,
        status: Option<RecommendationStatus>,
    ) -> StorageResult<Vec<WorkflowRecommendation>>;
    /// Accept or dismiss a recommendation.
    async fn update_recommendation(
        &self,
        id: &str,
        status: RecommendationStatus,
    ) -> StorageResult<WorkflowRecommendation>;
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trips() {
        for status in [
            ProgressStatus::NotStarted,
            ProgressStatus::InProgress,
            ProgressStatus::Completed,
            ProgressStatus::Reviewed,
        ] {
            assert_eq!(status.to_string().parse::<ProgressStatus>(), Ok(status));
        }
        assert_eq!("ACTIVE".parse::<SessionStatus>(), Ok(SessionStatus::Active));
        assert!("paused".parse::<SessionStatus>().is_err());
        assert_eq!(
            "act_completed".parse::<MilestoneType>(),
            Ok(MilestoneType::ActCompleted)
        );
    }

    #[test]
    fn test_progress_status_ordering() {
        assert!(ProgressStatus::NotStarted < ProgressStatus::InProgress);
        assert!(ProgressStatus::Completed < ProgressStatus::Reviewed);
        assert!(ProgressStatus::Reviewed.is_done());
        assert!(!ProgressStatus::InProgress.is_done());
    }

    #[test]
    fn test_session_builder() {
        let session = Session::new("p1", "writing")
            .with_act("dissemination")
            .with_focus("discussion section")
            .with_goals(vec!["finish draft".to_string()]);
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.research_act.as_deref(), Some("dissemination"));
        assert_eq!(session.goals.len(), 1);
        assert!(session.ended_at.is_none());
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let a = format_timestamp(&Utc::now());
        let b = format_timestamp(&(Utc::now() + chrono::Duration::seconds(1)));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(format_timestamp(&parse_timestamp(&a)), a);
    }
}

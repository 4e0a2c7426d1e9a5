use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::progress::{apply_tool_use, is_act_complete, next_recommendation};
use super::{
    format_timestamp, parse_timestamp, InvocationRecord, Milestone, MilestoneType, Priority,
    ProgressStatus, Project, RecommendationStatus, RecordOutcome, ResearchProgress, Session,
    SessionStatus, Storage, ToolUsage, WorkflowRecommendation,
};
use crate::config::DatabaseConfig;
use crate::context::ProjectContext;
use crate::error::{StorageError, StorageResult};
use crate::workflow;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage for one project database.
///
/// Reads go straight to the pool. Writes take `write_lock` for the whole
/// transaction so that one project has a single writer at a time.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl SqliteStorage {
    /// Open (creating if needed) the database at `path`.
    pub async fn new(path: &Path, config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self::from_pool(pool);
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory database. Used by tests.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self::from_pool(pool);
        storage.run_migrations().await?;
        Ok(storage)
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        debug!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn upsert_project(&self, project: &Project) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        upsert_project_row(&mut *self.pool.acquire().await?, project).await
    }

    async fn get_project(&self, id: &str) -> StorageResult<Option<Project>> {
        let row: Option<ProjectRow> = sqlx::query_as(
            r#"
            SELECT id, name, description, domain, project_path, methodology,
                   novel_theory_mode, created_at, updated_at
            FROM projects
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn initialize_project(&self, project: &Project, session: &Session) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        upsert_project_row(&mut tx, project).await?;
        insert_session(&mut tx, session).await?;

        for c in workflow::categories() {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO research_progress
                    (project_id, research_act, research_category, status,
                     completion_percentage, tools_used, milestone_reached, last_activity)
                VALUES (?, ?, ?, 'not_started', 0, '[]', 0, NULL)
                "#,
            )
            .bind(&project.id)
            .bind(c.act.name)
            .bind(c.category.name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(project_id = %project.id, session_id = %session.id, "Project initialized");
        Ok(())
    }

    async fn open_session(&self, project_id: &str, session_type: &str) -> StorageResult<Session> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let session = ensure_active_session(&mut tx, project_id, session_type).await?;
        tx.commit().await?;
        Ok(session)
    }

    async fn start_session(&self, session: &Session) -> StorageResult<Session> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let now = format_timestamp(&Utc::now());
        sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'ended', ended_at = ?, updated_at = ?
            WHERE project_id = ? AND status = 'active'
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(&session.project_id)
        .execute(&mut *tx)
        .await?;

        insert_session(&mut tx, session).await?;
        tx.commit().await?;
        Ok(session.clone())
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>> {
        fetch_session(&mut *self.pool.acquire().await?, id).await
    }

    async fn get_active_session(&self, project_id: &str) -> StorageResult<Option<Session>> {
        fetch_active_session(&mut *self.pool.acquire().await?, project_id).await
    }

    async fn list_sessions(&self, project_id: &str) -> StorageResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "{} WHERE project_id = ? ORDER BY started_at DESC, rowid DESC",
            SESSION_SELECT
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn save_session_data(
        &self,
        session_id: &str,
        data: &serde_json::Value,
    ) -> StorageResult<Session> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await?;

        let result = sqlx::query("UPDATE sessions SET data = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(data).unwrap_or_default())
            .bind(format_timestamp(&Utc::now()))
            .bind(session_id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }

        fetch_session(&mut conn, session_id)
            .await?
            .ok_or_else(|| StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn end_session(&self, session_id: &str) -> StorageResult<Session> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await?;

        let now = format_timestamp(&Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'ended', ended_at = COALESCE(ended_at, ?), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(session_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }

        fetch_session(&mut conn, session_id)
            .await?
            .ok_or_else(|| StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn record_invocation(&self, record: &InvocationRecord) -> StorageResult<RecordOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let named = match &record.session_id {
            Some(id) => fetch_session(&mut tx, id)
                .await?
                .filter(|s| s.project_id == record.project_id),
            None => None,
        };
        let session = match named {
            Some(session) => session,
            None if !record.success => {
                // Failed calls must not open a session as a side effect.
                match fetch_latest_session(&mut tx, &record.project_id).await? {
                    Some(session) => session,
                    None => ensure_active_session(&mut tx, &record.project_id, "auto").await?,
                }
            }
            None => ensure_active_session(&mut tx, &record.project_id, "auto").await?,
        };

        let usage_id = Uuid::new_v4().to_string();
        let (act, category) = match &record.classification {
            Some((a, c)) => (Some(a.as_str()), Some(c.as_str())),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO tool_usage
                (id, session_id, tool_name, research_act, research_category, arguments,
                 result_summary, execution_time_ms, success, error_message, correlation_id,
                 timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&usage_id)
        .bind(&session.id)
        .bind(&record.tool_name)
        .bind(act)
        .bind(category)
        .bind(serde_json::to_string(&record.arguments).unwrap_or_default())
        .bind(&record.result_summary)
        .bind(record.execution_time_ms)
        .bind(record.success)
        .bind(&record.error_message)
        .bind(&record.correlation_id)
        .bind(format_timestamp(&now))
        .execute(&mut *tx)
        .await?;

        let mut outcome = RecordOutcome {
            usage_id,
            session_id: session.id.clone(),
            progress: None,
            milestones: Vec::new(),
            recommendation: None,
        };

        if let Some((act, category)) = &record.classification {
            let cref = workflow::find_category(act, category).ok_or_else(|| {
                StorageError::UnknownCategory {
                    act: act.clone(),
                    category: category.clone(),
                }
            })?;

            let current = fetch_progress(&mut tx, &record.project_id, act, category)
                .await?
                .unwrap_or_else(|| ResearchProgress::not_started(&record.project_id, act, category));
            let mut next = apply_tool_use(
                &current,
                &cref.checklist(),
                &record.tool_name,
                record.success,
                now,
            );

            if next.status == ProgressStatus::Completed && !current.status.is_done() {
                let milestone = Milestone::new(
                    &record.project_id,
                    MilestoneType::CategoryCompleted,
                    format!("{} completed", cref.category.title),
                    act,
                    Some(category.clone()),
                    1.0,
                );
                if insert_milestone(&mut tx, &milestone).await? {
                    outcome.milestones.push(milestone);
                }
                next.milestone_reached = true;
            }

            write_progress(&mut tx, &next).await?;

            if next.status.is_done() {
                let rows = fetch_all_progress(&mut tx, &record.project_id).await?;
                if is_act_complete(act, &rows) {
                    let milestone = Milestone::new(
                        &record.project_id,
                        MilestoneType::ActCompleted,
                        format!("{} act completed", cref.act.title),
                        act,
                        None,
                        2.0,
                    );
                    if insert_milestone(&mut tx, &milestone).await? {
                        outcome.milestones.push(milestone);
                    }
                }
            }

            outcome.recommendation =
                refresh_recommendation(&mut tx, &record.project_id, &session.id, act).await?;
            outcome.progress = Some(next);
        }

        tx.commit().await?;
        debug!(
            tool = %record.tool_name,
            session_id = %outcome.session_id,
            milestones = outcome.milestones.len(),
            "Invocation recorded"
        );
        Ok(outcome)
    }

    async fn get_session_usage(&self, session_id: &str) -> StorageResult<Vec<ToolUsage>> {
        let rows: Vec<ToolUsageRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, tool_name, research_act, research_category, arguments,
                   result_summary, execution_time_ms, success, error_message, correlation_id,
                   timestamp
            FROM tool_usage
            WHERE session_id = ?
            ORDER BY timestamp ASC, rowid ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn count_project_usage(&self, project_id: &str) -> StorageResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM tool_usage u
            JOIN sessions s ON s.id = u.session_id
            WHERE s.project_id = ?
            "#,
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn get_progress(&self, project_id: &str) -> StorageResult<Vec<ResearchProgress>> {
        let rows = fetch_all_progress(&mut *self.pool.acquire().await?, project_id).await?;
        Ok(sort_by_catalog(rows))
    }

    async fn review_category(
        &self,
        project_id: &str,
        act: &str,
        category: &str,
    ) -> StorageResult<(ResearchProgress, Vec<Milestone>)> {
        let cref = workflow::find_category(act, category).ok_or_else(|| {
            StorageError::UnknownCategory {
                act: act.to_string(),
                category: category.to_string(),
            }
        })?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut row = fetch_progress(&mut tx, project_id, act, category)
            .await?
            .ok_or_else(|| StorageError::Query {
                message: format!("No progress recorded for {}/{}", act, category),
            })?;

        if row.status != ProgressStatus::Completed && row.status != ProgressStatus::Reviewed {
            return Err(StorageError::Query {
                message: format!(
                    "{}/{} is {} and must be completed before review",
                    act, category, row.status
                ),
            });
        }

        let mut milestones = Vec::new();
        if row.status == ProgressStatus::Completed {
            row.status = ProgressStatus::Reviewed;
            row.last_activity = Some(Utc::now());
            write_progress(&mut tx, &row).await?;
        }

        let milestone = Milestone::new(
            project_id,
            MilestoneType::CategoryReviewed,
            format!("{} reviewed", cref.category.title),
            act,
            Some(category.to_string()),
            1.5,
        );
        if insert_milestone(&mut tx, &milestone).await? {
            milestones.push(milestone);
        }

        tx.commit().await?;
        Ok((row, milestones))
    }

    async fn reset_progress(
        &self,
        project_id: &str,
        act: Option<&str>,
        category: Option<&str>,
    ) -> StorageResult<u64> {
        let _guard = self.write_lock.lock().await;

        let result = sqlx::query(
            r#"
            UPDATE research_progress
            SET status = 'not_started', completion_percentage = 0, tools_used = '[]',
                milestone_reached = 0, last_activity = ?
            WHERE project_id = ?
              AND (? IS NULL OR research_act = ?)
              AND (? IS NULL OR research_category = ?)
            "#,
        )
        .bind(format_timestamp(&Utc::now()))
        .bind(project_id)
        .bind(act)
        .bind(act)
        .bind(category)
        .bind(category)
        .execute(&self.pool)
        .await?;

        info!(project_id = %project_id, rows = result.rows_affected(), "Progress reset");
        Ok(result.rows_affected())
    }

    async fn list_milestones(&self, project_id: &str) -> StorageResult<Vec<Milestone>> {
        let rows: Vec<MilestoneRow> = sqlx::query_as(
            r#"
            SELECT id, project_id, milestone_type, name, research_act, research_category,
                   achieved_at, impact_score
            FROM milestones
            WHERE project_id = ?
            ORDER BY achieved_at ASC, rowid ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn list_recommendations(
        &self,
        project_id: &str,
        status: Option<RecommendationStatus>,
    ) -> StorageResult<Vec<WorkflowRecommendation>> {
        let status = status.map(|s| s.to_string());
        let rows: Vec<RecommendationRow> = sqlx::query_as(&format!(
            "{} WHERE project_id = ? AND (? IS NULL OR status = ?) ORDER BY created_at DESC, rowid DESC",
            RECOMMENDATION_SELECT
        ))
        .bind(project_id)
        .bind(&status)
        .bind(&status)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn update_recommendation(
        &self,
        id: &str,
        status: RecommendationStatus,
    ) -> StorageResult<WorkflowRecommendation> {
        let _guard = self.write_lock.lock().await;

        let result = sqlx::query(
            "UPDATE workflow_recommendations SET status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.to_string())
        .bind(format_timestamp(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Query {
                message: format!("Recommendation not found: {}", id),
            });
        }

        let row: RecommendationRow =
            sqlx::query_as(&format!("{} WHERE id = ?", RECOMMENDATION_SELECT))
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.into())
    }
}

/// Open-once registry of per-project stores.
///
/// Every connection that touches a project shares the same [`SqliteStorage`],
/// and therefore the same write lock.
#[derive(Clone)]
pub struct ProjectStores {
    config: DatabaseConfig,
    stores: Arc<Mutex<HashMap<PathBuf, SqliteStorage>>>,
}

impl ProjectStores {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            stores: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Store for `project`, opening its database and syncing the project row
    /// on first use.
    pub async fn for_project(&self, project: &ProjectContext) -> StorageResult<SqliteStorage> {
        let mut stores = self.stores.lock().await;
        if let Some(store) = stores.get(project.root()) {
            return Ok(store.clone());
        }

        let store = SqliteStorage::new(&project.layout.database_path(), &self.config).await?;
        store.upsert_project(&Project::from_context(project)).await?;
        info!(project = %project.root().display(), "Opened project database");

        stores.insert(project.root().to_path_buf(), store.clone());
        Ok(store)
    }

    /// Close and forget the store opened for `root`, if any.
    pub async fn evict(&self, root: &Path) {
        let removed = self.stores.lock().await.remove(root);
        if let Some(store) = removed {
            store.pool.close().await;
            debug!(project = %root.display(), "Closed project database");
        }
    }

    /// Number of open project databases.
    pub async fn open_count(&self) -> usize {
        self.stores.lock().await.len()
    }
}

// ============================================================================
// Transaction helpers
// ============================================================================

const SESSION_SELECT: &str = r#"
    SELECT id, project_id, session_type, research_act, research_focus, started_at,
           ended_at, status, goals, data, updated_at
    FROM sessions
"#;

const RECOMMENDATION_SELECT: &str = r#"
    SELECT id, project_id, session_id, current_research_act, recommended_next_act,
           recommended_category, recommended_tools, reasoning, priority, status,
           created_at, updated_at
    FROM workflow_recommendations
"#;

async fn upsert_project_row(conn: &mut SqliteConnection, project: &Project) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO projects
            (id, name, description, domain, project_path, methodology, novel_theory_mode,
             created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            domain = excluded.domain,
            project_path = excluded.project_path,
            methodology = excluded.methodology,
            novel_theory_mode = excluded.novel_theory_mode,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&project.id)
    .bind(&project.name)
    .bind(&project.description)
    .bind(&project.domain)
    .bind(&project.project_path)
    .bind(&project.methodology)
    .bind(project.novel_theory_mode)
    .bind(format_timestamp(&project.created_at))
    .bind(format_timestamp(&project.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_session(conn: &mut SqliteConnection, session: &Session) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sessions
            (id, project_id, session_type, research_act, research_focus, started_at,
             ended_at, status, goals, data, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.id)
    .bind(&session.project_id)
    .bind(&session.session_type)
    .bind(&session.research_act)
    .bind(&session.research_focus)
    .bind(format_timestamp(&session.started_at))
    .bind(session.ended_at.as_ref().map(format_timestamp))
    .bind(session.status.to_string())
    .bind(serde_json::to_string(&session.goals).unwrap_or_else(|_| "[]".to_string()))
    .bind(
        session
            .data
            .as_ref()
            .map(|d| serde_json::to_string(d).unwrap_or_default()),
    )
    .bind(format_timestamp(&session.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn fetch_session(conn: &mut SqliteConnection, id: &str) -> StorageResult<Option<Session>> {
    let row: Option<SessionRow> = sqlx::query_as(&format!("{} WHERE id = ?", SESSION_SELECT))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|r| r.into()))
}

async fn fetch_active_session(
    conn: &mut SqliteConnection,
    project_id: &str,
) -> StorageResult<Option<Session>> {
    let row: Option<SessionRow> = sqlx::query_as(&format!(
        "{} WHERE project_id = ? AND status = 'active' LIMIT 1",
        SESSION_SELECT
    ))
    .bind(project_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|r| r.into()))
}

/// The active session if there is one, otherwise the most recently started.
async fn fetch_latest_session(
    conn: &mut SqliteConnection,
    project_id: &str,
) -> StorageResult<Option<Session>> {
    if let Some(session) = fetch_active_session(conn, project_id).await? {
        return Ok(Some(session));
    }
    let row: Option<SessionRow> = sqlx::query_as(&format!(
        "{} WHERE project_id = ? ORDER BY started_at DESC, rowid DESC LIMIT 1",
        SESSION_SELECT
    ))
    .bind(project_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|r| r.into()))
}

async fn ensure_active_session(
    conn: &mut SqliteConnection,
    project_id: &str,
    session_type: &str,
) -> StorageResult<Session> {
    if let Some(session) = fetch_active_session(conn, project_id).await? {
        return Ok(session);
    }

    let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM projects WHERE id = ?")
        .bind(project_id)
        .fetch_optional(&mut *conn)
        .await?;
    if exists.is_none() {
        return Err(StorageError::ProjectNotFound {
            project: project_id.to_string(),
        });
    }

    let session = Session::new(project_id, session_type);
    insert_session(conn, &session).await?;
    info!(project_id = %project_id, session_id = %session.id, "Opened session implicitly");
    Ok(session)
}

async fn fetch_progress(
    conn: &mut SqliteConnection,
    project_id: &str,
    act: &str,
    category: &str,
) -> StorageResult<Option<ResearchProgress>> {
    let row: Option<ProgressRow> = sqlx::query_as(
        r#"
        SELECT project_id, research_act, research_category, status, completion_percentage,
               tools_used, milestone_reached, last_activity
        FROM research_progress
        WHERE project_id = ? AND research_act = ? AND research_category = ?
        "#,
    )
    .bind(project_id)
    .bind(act)
    .bind(category)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|r| r.into()))
}

async fn fetch_all_progress(
    conn: &mut SqliteConnection,
    project_id: &str,
) -> StorageResult<Vec<ResearchProgress>> {
    let rows: Vec<ProgressRow> = sqlx::query_as(
        r#"
        SELECT project_id, research_act, research_category, status, completion_percentage,
               tools_used, milestone_reached, last_activity
        FROM research_progress
        WHERE project_id = ?
        "#,
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(|r| r.into()).collect())
}

async fn write_progress(conn: &mut SqliteConnection, row: &ResearchProgress) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO research_progress
            (project_id, research_act, research_category, status, completion_percentage,
             tools_used, milestone_reached, last_activity)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id, research_act, research_category) DO UPDATE SET
            status = excluded.status,
            completion_percentage = MAX(research_progress.completion_percentage,
                                        excluded.completion_percentage),
            tools_used = excluded.tools_used,
            milestone_reached = excluded.milestone_reached,
            last_activity = excluded.last_activity
        "#,
    )
    .bind(&row.project_id)
    .bind(&row.research_act)
    .bind(&row.research_category)
    .bind(row.status.to_string())
    .bind(row.completion_percentage)
    .bind(serde_json::to_string(&row.tools_used).unwrap_or_else(|_| "[]".to_string()))
    .bind(row.milestone_reached)
    .bind(row.last_activity.as_ref().map(format_timestamp))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Returns true when a new row was written.
async fn insert_milestone(conn: &mut SqliteConnection, milestone: &Milestone) -> StorageResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO milestones
            (id, project_id, milestone_type, name, research_act, research_category,
             achieved_at, impact_score)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&milestone.id)
    .bind(&milestone.project_id)
    .bind(milestone.milestone_type.to_string())
    .bind(&milestone.name)
    .bind(&milestone.research_act)
    .bind(milestone.research_category.as_deref().unwrap_or(""))
    .bind(format_timestamp(&milestone.achieved_at))
    .bind(milestone.impact_score)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn refresh_recommendation(
    conn: &mut SqliteConnection,
    project_id: &str,
    session_id: &str,
    current_act: &str,
) -> StorageResult<Option<WorkflowRecommendation>> {
    let rows = fetch_all_progress(conn, project_id).await?;
    let Some(draft) = next_recommendation(&rows, Some(current_act)) else {
        return Ok(None);
    };

    let pending: Option<RecommendationRow> = sqlx::query_as(&format!(
        "{} WHERE project_id = ? AND status = 'pending' ORDER BY created_at DESC, rowid DESC LIMIT 1",
        RECOMMENDATION_SELECT
    ))
    .bind(project_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(existing) = &pending {
        if existing.recommended_next_act == draft.next_act
            && existing.recommended_category == draft.next_category
        {
            return Ok(None);
        }
    }

    let now = Utc::now();
    sqlx::query(
        r#"
        UPDATE workflow_recommendations
        SET status = 'dismissed', updated_at = ?
        WHERE project_id = ? AND status = 'pending'
        "#,
    )
    .bind(format_timestamp(&now))
    .bind(project_id)
    .execute(&mut *conn)
    .await?;

    let recommendation = WorkflowRecommendation {
        id: Uuid::new_v4().to_string(),
        project_id: project_id.to_string(),
        session_id: Some(session_id.to_string()),
        current_research_act: Some(current_act.to_string()),
        recommended_next_act: draft.next_act,
        recommended_category: draft.next_category,
        recommended_tools: draft.tools,
        reasoning: draft.reasoning,
        priority: draft.priority,
        status: RecommendationStatus::Pending,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO workflow_recommendations
            (id, project_id, session_id, current_research_act, recommended_next_act,
             recommended_category, recommended_tools, reasoning, priority, status,
             created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&recommendation.id)
    .bind(&recommendation.project_id)
    .bind(&recommendation.session_id)
    .bind(&recommendation.current_research_act)
    .bind(&recommendation.recommended_next_act)
    .bind(&recommendation.recommended_category)
    .bind(serde_json::to_string(&recommendation.recommended_tools).unwrap_or_default())
    .bind(&recommendation.reasoning)
    .bind(recommendation.priority.to_string())
    .bind(recommendation.status.to_string())
    .bind(format_timestamp(&recommendation.created_at))
    .bind(format_timestamp(&recommendation.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(Some(recommendation))
}

fn sort_by_catalog(mut rows: Vec<ResearchProgress>) -> Vec<ResearchProgress> {
    rows.sort_by_key(|row| {
        workflow::find_category(&row.research_act, &row.research_category)
            .map(|c| c.position)
            .unwrap_or(usize::MAX)
    });
    rows
}

// Internal row types for SQLx mapping

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    name: String,
    description: String,
    domain: String,
    project_path: String,
    methodology: Option<String>,
    novel_theory_mode: bool,
    created_at: String,
    updated_at: String,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            domain: row.domain,
            project_path: row.project_path,
            methodology: row.methodology,
            novel_theory_mode: row.novel_theory_mode,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    project_id: String,
    session_type: String,
    research_act: Option<String>,
    research_focus: Option<String>,
    started_at: String,
    ended_at: Option<String>,
    status: String,
    goals: String,
    data: Option<String>,
    updated_at: String,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            session_type: row.session_type,
            research_act: row.research_act,
            research_focus: row.research_focus,
            started_at: parse_timestamp(&row.started_at),
            ended_at: row.ended_at.as_deref().map(parse_timestamp),
            status: row.status.parse().unwrap_or(SessionStatus::Ended),
            goals: serde_json::from_str(&row.goals).unwrap_or_default(),
            data: row.data.and_then(|s| serde_json::from_str(&s).ok()),
            updated_at: parse_timestamp(&row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ToolUsageRow {
    id: String,
    session_id: String,
    tool_name: String,
    research_act: Option<String>,
    research_category: Option<String>,
    arguments: String,
    result_summary: Option<String>,
    execution_time_ms: i64,
    success: bool,
    error_message: Option<String>,
    correlation_id: Option<String>,
    timestamp: String,
}

impl From<ToolUsageRow> for ToolUsage {
    fn from(row: ToolUsageRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            tool_name: row.tool_name,
            research_act: row.research_act,
            research_category: row.research_category,
            arguments: serde_json::from_str(&row.arguments).unwrap_or(serde_json::Value::Null),
            result_summary: row.result_summary,
            execution_time_ms: row.execution_time_ms,
            success: row.success,
            error_message: row.error_message,
            correlation_id: row.correlation_id,
            timestamp: parse_timestamp(&row.timestamp),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    project_id: String,
    research_act: String,
    research_category: String,
    status: String,
    completion_percentage: f64,
    tools_used: String,
    milestone_reached: bool,
    last_activity: Option<String>,
}

impl From<ProgressRow> for ResearchProgress {
    fn from(row: ProgressRow) -> Self {
        Self {
            project_id: row.project_id,
            research_act: row.research_act,
            research_category: row.research_category,
            status: row.status.parse().unwrap_or_default(),
            completion_percentage: row.completion_percentage,
            tools_used: serde_json::from_str(&row.tools_used).unwrap_or_default(),
            milestone_reached: row.milestone_reached,
            last_activity: row.last_activity.as_deref().map(parse_timestamp),
        }
    }
}

#[derive(sqlx::FromRow)]
struct MilestoneRow {
    id: String,
    project_id: String,
    milestone_type: String,
    name: String,
    research_act: String,
    research_category: String,
    achieved_at: String,
    impact_score: f64,
}

impl From<MilestoneRow> for Milestone {
    fn from(row: MilestoneRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            milestone_type: row
                .milestone_type
                .parse()
                .unwrap_or(MilestoneType::CategoryCompleted),
            name: row.name,
            research_act: row.research_act,
            research_category: Some(row.research_category).filter(|c| !c.is_empty()),
            achieved_at: parse_timestamp(&row.achieved_at),
            impact_score: row.impact_score,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RecommendationRow {
    id: String,
    project_id: String,
    session_id: Option<String>,
    current_research_act: Option<String>,
    recommended_next_act: String,
    recommended_category: String,
    recommended_tools: String,
    reasoning: String,
    priority: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl From<RecommendationRow> for WorkflowRecommendation {
    fn from(row: RecommendationRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            session_id: row.session_id,
            current_research_act: row.current_research_act,
            recommended_next_act: row.recommended_next_act,
            recommended_category: row.recommended_category,
            recommended_tools: serde_json::from_str(&row.recommended_tools).unwrap_or_default(),
            reasoning: row.reasoning,
            priority: row.priority.parse().unwrap_or(Priority::Medium),
            status: row.status.parse().unwrap_or_default(),
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        }
    }
}

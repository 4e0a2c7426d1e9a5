//! Correlated request audit trail.
//!
//! Each request gets a correlation id and up to five JSON artifacts
//! (`{kind}_{correlation_id}.json`) in the log directory of the project it
//! resolved to, plus lines in `requests.log`. Failures to write are reported
//! as [`LoggingError`] through `tracing` and never reach the client.

mod correlation;

pub use correlation::{CorrelationIdGenerator, CORRELATION_ID_FORMAT};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::config::AuditConfig;
use crate::context::{ResolvedContext, LOG_DIR};
use crate::error::LoggingError;

/// Append-only text log shared by every request in a directory.
pub const REQUEST_LOG_FILE: &str = "requests.log";

/// The five artifacts of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Request,
    Context,
    Execution,
    Response,
    Summary,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Request => "request",
            ArtifactKind::Context => "context",
            ArtifactKind::Execution => "execution",
            ArtifactKind::Response => "response",
            ArtifactKind::Summary => "summary",
        }
    }

    /// File name of this artifact for `correlation_id`.
    pub fn file_name(&self, correlation_id: &str) -> String {
        format!("{}_{}.json", self.as_str(), correlation_id)
    }
}

/// Who sent a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientInfo {
    pub transport: &'static str,
    pub peer: Option<String>,
}

impl ClientInfo {
    pub fn stdio() -> Self {
        Self {
            transport: "stdio",
            peer: None,
        }
    }

    pub fn websocket(peer: impl Into<String>) -> Self {
        Self {
            transport: "websocket",
            peer: Some(peer.into()),
        }
    }
}

/// Outcome of a tool execution as recorded in the execution artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// Hands out correlation ids and log sets.
#[derive(Debug)]
pub struct RequestLogger {
    config: AuditConfig,
    fallback_dir: PathBuf,
    ids: CorrelationIdGenerator,
}

impl RequestLogger {
    /// `home_dir` receives logs of requests with no resolved project.
    pub fn new(config: AuditConfig, home_dir: &Path) -> Self {
        Self {
            config,
            fallback_dir: home_dir.join(LOG_DIR),
            ids: CorrelationIdGenerator::new(),
        }
    }

    pub fn next_correlation_id(&self) -> String {
        self.ids.next_id()
    }

    /// Log directory for a request in `context`.
    pub fn log_dir_for(&self, context: &ResolvedContext) -> PathBuf {
        context
            .project()
            .map(|p| p.layout.log_dir())
            .unwrap_or_else(|| self.fallback_dir.clone())
    }

    /// Start the artifact set of one request.
    pub fn begin(&self, correlation_id: impl Into<String>, dir: PathBuf) -> RequestLogSet {
        RequestLogSet {
            correlation_id: correlation_id.into(),
            dir,
            enabled: self.config.enabled,
            max_result_chars: self.config.max_result_chars,
            written: Vec::new(),
        }
    }
}

/// Artifacts of one request, tracking what was actually written.
#[derive(Debug)]
pub struct RequestLogSet {
    correlation_id: String,
    dir: PathBuf,
    enabled: bool,
    max_result_chars: usize,
    written: Vec<(ArtifactKind, PathBuf)>,
}

impl RequestLogSet {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Artifacts written so far, in order.
    pub fn written(&self) -> &[(ArtifactKind, PathBuf)] {
        &self.written
    }

    pub async fn log_request(
        &mut self,
        method: &str,
        params: Option<&Value>,
        client: &ClientInfo,
        jsonrpc_id: Option<&Value>,
    ) {
        let tool = params
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("-")
            .to_string();
        let artifact = json!({
            "correlation_id": self.correlation_id,
            "timestamp": Utc::now().to_rfc3339(),
            "method": method,
            "params": params,
            "client": client,
            "jsonrpc_id": jsonrpc_id,
        });
        self.record(ArtifactKind::Request, &artifact).await;
        self.append_line(&format!("REQUEST {} {} {}", self.correlation_id, method, tool))
            .await;
    }

    pub async fn log_context(&mut self, context: &ResolvedContext, tool_names: &[String]) {
        let artifact = json!({
            "correlation_id": self.correlation_id,
            "timestamp": Utc::now().to_rfc3339(),
            "project_path": context.project_path().map(|p| p.display().to_string()),
            "project_id": context.project().map(|p| p.id().to_string()),
            "source": context.source(),
            "tool_count": tool_names.len(),
            "available_tools": tool_names,
        });
        self.record(ArtifactKind::Context, &artifact).await;
    }

    pub async fn log_execution(
        &mut self,
        tool_name: &str,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        duration_ms: i64,
        outcome: Result<&Value, &str>,
    ) {
        let (status, result, error) = match outcome {
            Ok(value) => (
                ExecutionStatus::Success,
                truncate_result(value, self.max_result_chars),
                None,
            ),
            Err(message) => (ExecutionStatus::Error, Value::Null, Some(message)),
        };
        let artifact = json!({
            "correlation_id": self.correlation_id,
            "tool_name": tool_name,
            "started_at": started_at.to_rfc3339(),
            "ended_at": ended_at.to_rfc3339(),
            "duration_ms": duration_ms,
            "status": status,
            "result": result,
            "error": error,
        });
        self.record(ArtifactKind::Execution, &artifact).await;
        self.append_line(&format!(
            "EXECUTION {} {} {} {}ms",
            self.correlation_id,
            tool_name,
            if status == ExecutionStatus::Success { "success" } else { "error" },
            duration_ms
        ))
        .await;
    }

    pub async fn log_response(&mut self, response: &Value) {
        self.record(ArtifactKind::Response, response).await;
    }

    /// Write the summary, listing every other artifact written for this id.
    pub async fn finish(&mut self, tool_name: Option<&str>, status: ExecutionStatus) {
        let artifacts: serde_json::Map<String, Value> = self
            .written
            .iter()
            .map(|(kind, path)| {
                (
                    kind.as_str().to_string(),
                    Value::String(path.display().to_string()),
                )
            })
            .collect();
        let artifact = json!({
            "correlation_id": self.correlation_id,
            "timestamp": Utc::now().to_rfc3339(),
            "tool_name": tool_name,
            "status": status,
            "artifacts": artifacts,
        });
        self.record(ArtifactKind::Summary, &artifact).await;
    }

    /// Write one artifact file.
    pub async fn write_artifact(
        &self,
        kind: ArtifactKind,
        value: &Value,
    ) -> Result<PathBuf, LoggingError> {
        let path = self.dir.join(kind.file_name(&self.correlation_id));
        let body = serde_json::to_vec_pretty(value)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| LoggingError::Io {
                path: self.dir.clone(),
                source,
            })?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| LoggingError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    async fn record(&mut self, kind: ArtifactKind, value: &Value) {
        if !self.enabled {
            return;
        }
        match self.write_artifact(kind, value).await {
            Ok(path) => self.written.push((kind, path)),
            Err(e) => {
                warn!(
                    correlation_id = %self.correlation_id,
                    artifact = kind.as_str(),
                    error = %e,
                    "Failed to write audit artifact"
                );
                self.append_line(&format!(
                    "LOGGING_ERROR {} {} {}",
                    self.correlation_id,
                    kind.as_str(),
                    e
                ))
                .await;
            }
        }
    }

    /// Best-effort line in `requests.log`.
    async fn append_line(&self, line: &str) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.try_append_line(line).await {
            warn!(correlation_id = %self.correlation_id, error = %e, "Failed to append request log");
        }
    }

    async fn try_append_line(&self, line: &str) -> Result<(), LoggingError> {
        let path = self.dir.join(REQUEST_LOG_FILE);
        let io_err = |source| LoggingError::Io {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        let entry = format!("{} {}\n", Utc::now().to_rfc3339(), line);
        file.write_all(entry.as_bytes()).await.map_err(io_err)?;
        Ok(())
    }
}

/// Replace results longer than `max_chars` serialized characters by a preview.
pub fn truncate_result(value: &Value, max_chars: usize) -> Value {
    let text = value.to_string();
    let original_length = text.chars().count();
    if original_length <= max_chars {
        return value.clone();
    }
    json!({
        "truncated": true,
        "original_length": original_length,
        "preview": text.chars().take(max_chars).collect::<String>(),
    })
}

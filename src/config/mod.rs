use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::AppError;

/// Environment variable carrying the active project path.
pub const PROJECT_PATH_ENV: &str = "RESEARCH_PROJECT_PATH";
/// Environment variable carrying an explicit project config file path.
pub const CONFIG_PATH_ENV: &str = "RESEARCH_CONFIG_PATH";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub context: ContextConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub audit: AuditConfig,
    pub transport: TransportConfig,
}

/// Project context signals and per-user locations
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Value of `RESEARCH_PROJECT_PATH` at startup.
    pub project_path: Option<PathBuf>,
    /// Value of `RESEARCH_CONFIG_PATH` at startup.
    pub config_path: Option<PathBuf>,
    /// Global per-user location, used as last-resort project and log fallback.
    pub home_dir: PathBuf,
    /// Parent directory for projects initialized without an explicit path.
    pub projects_root: PathBuf,
    /// Directory traversal starts here; `None` means the process working directory.
    pub search_start: Option<PathBuf>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Request audit trail configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Tool results longer than this are truncated in the execution artifact.
    pub max_result_chars: usize,
}

/// Transport selection
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub listen_addr: SocketAddr,
}

/// Wire transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    WebSocket,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdio" => Ok(TransportKind::Stdio),
            "ws" | "websocket" => Ok(TransportKind::WebSocket),
            _ => Err(format!("Unknown transport: {}", s)),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let home_dir = match non_empty_var("RESEARCH_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .map(|h| h.join(".research-mcp"))
                .ok_or_else(|| AppError::Config {
                    message: "RESEARCH_HOME is unset and no home directory is available"
                        .to_string(),
                })?,
        };

        let projects_root = non_empty_var("RESEARCH_PROJECTS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join("ResearchProjects"))
                    .unwrap_or_else(|| home_dir.join("projects"))
            });

        let context = ContextConfig {
            project_path: non_empty_var(PROJECT_PATH_ENV).map(PathBuf::from),
            config_path: non_empty_var(CONFIG_PATH_ENV).map(PathBuf::from),
            home_dir,
            projects_root,
            search_start: None,
        };

        let database = DatabaseConfig {
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let audit = AuditConfig {
            enabled: env::var("AUDIT_ENABLED")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
            max_result_chars: env::var("AUDIT_MAX_RESULT_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),
        };

        let transport = TransportConfig {
            kind: match env::var("MCP_TRANSPORT") {
                Ok(v) => v.parse().map_err(|message| AppError::Config { message })?,
                Err(_) => TransportKind::Stdio,
            },
            listen_addr: env::var("MCP_LISTEN_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8765".to_string())
                .parse()
                .map_err(|e| AppError::Config {
                    message: format!("Invalid MCP_LISTEN_ADDR: {}", e),
                })?,
        };

        Ok(Config {
            context,
            database,
            logging,
            audit,
            transport,
        })
    }

    /// Configuration rooted entirely under `home`, with no environment signals.
    ///
    /// Used by tests and embedders that must not pick up ambient state.
    pub fn isolated(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Config {
            context: ContextConfig {
                project_path: None,
                config_path: None,
                projects_root: home.join("projects"),
                search_start: Some(home.clone()),
                home_dir: home,
            },
            database: DatabaseConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            audit: AuditConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_result_chars: 10_000,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Stdio,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8765)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_from_str() {
        assert_eq!("stdio".parse::<TransportKind>(), Ok(TransportKind::Stdio));
        assert_eq!("WebSocket".parse::<TransportKind>(), Ok(TransportKind::WebSocket));
        assert_eq!("ws".parse::<TransportKind>(), Ok(TransportKind::WebSocket));
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_isolated_config_has_no_signals() {
        let config = Config::isolated("/tmp/research-home");
        assert!(config.context.project_path.is_none());
        assert!(config.context.config_path.is_none());
        assert_eq!(
            config.context.projects_root,
            PathBuf::from("/tmp/research-home/projects")
        );
        assert_eq!(config.audit.max_result_chars, 10_000);
    }
}

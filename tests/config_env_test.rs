//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use std::env;
use std::path::PathBuf;

use mcp_research_context::config::{Config, LogFormat, TransportKind};
use serial_test::serial;

const HOME: &str = "/tmp/research-home-test";

fn with_home() {
    env::set_var("RESEARCH_HOME", HOME);
}

#[test]
#[serial]
fn test_config_from_env_research_home() {
    with_home();

    let config = Config::from_env().unwrap();
    assert_eq!(config.context.home_dir, PathBuf::from(HOME));
    assert!(config.context.search_start.is_none());
}

#[test]
#[serial]
fn test_config_from_env_project_signals() {
    with_home();
    env::set_var("RESEARCH_PROJECT_PATH", "/data/projects/sleep");
    env::set_var("RESEARCH_CONFIG_PATH", "/data/projects/sleep/.research/config.toml");

    let config = Config::from_env().unwrap();
    assert_eq!(
        config.context.project_path,
        Some(PathBuf::from("/data/projects/sleep"))
    );
    assert_eq!(
        config.context.config_path,
        Some(PathBuf::from("/data/projects/sleep/.research/config.toml"))
    );

    env::remove_var("RESEARCH_PROJECT_PATH");
    env::remove_var("RESEARCH_CONFIG_PATH");
}

#[test]
#[serial]
fn test_config_blank_project_path_is_ignored() {
    with_home();
    env::set_var("RESEARCH_PROJECT_PATH", "   ");

    let config = Config::from_env().unwrap();
    assert!(config.context.project_path.is_none());

    env::remove_var("RESEARCH_PROJECT_PATH");
}

#[test]
#[serial]
fn test_config_from_env_projects_root() {
    with_home();
    env::set_var("RESEARCH_PROJECTS_ROOT", "/srv/research");

    let config = Config::from_env().unwrap();
    assert_eq!(config.context.projects_root, PathBuf::from("/srv/research"));

    env::remove_var("RESEARCH_PROJECTS_ROOT");
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    with_home();
    env::set_var("LOG_FORMAT", "json");
    env::set_var("LOG_LEVEL", "debug");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.logging.level, "debug");

    env::remove_var("LOG_FORMAT");
    env::remove_var("LOG_LEVEL");
}

#[test]
#[serial]
fn test_config_invalid_number_uses_default() {
    with_home();
    env::set_var("DATABASE_MAX_CONNECTIONS", "not-a-number");
    env::set_var("AUDIT_MAX_RESULT_CHARS", "lots");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.max_connections, 5);
    assert_eq!(config.audit.max_result_chars, 10_000);

    env::remove_var("DATABASE_MAX_CONNECTIONS");
    env::remove_var("AUDIT_MAX_RESULT_CHARS");
}

#[test]
#[serial]
fn test_config_audit_can_be_disabled() {
    with_home();
    env::set_var("AUDIT_ENABLED", "FALSE");

    let config = Config::from_env().unwrap();
    assert!(!config.audit.enabled);

    env::remove_var("AUDIT_ENABLED");
}

#[test]
#[serial]
fn test_config_transport_selection() {
    with_home();
    env::set_var("MCP_TRANSPORT", "websocket");
    env::set_var("MCP_LISTEN_ADDR", "0.0.0.0:9000");

    let config = Config::from_env().unwrap();
    assert_eq!(config.transport.kind, TransportKind::WebSocket);
    assert_eq!(config.transport.listen_addr.port(), 9000);

    env::remove_var("MCP_TRANSPORT");
    env::remove_var("MCP_LISTEN_ADDR");
}

#[test]
#[serial]
fn test_config_invalid_transport_is_an_error() {
    with_home();
    env::set_var("MCP_TRANSPORT", "carrier-pigeon");
    assert!(Config::from_env().is_err());
    env::remove_var("MCP_TRANSPORT");

    env::set_var("MCP_LISTEN_ADDR", "not-an-address");
    assert!(Config::from_env().is_err());
    env::remove_var("MCP_LISTEN_ADDR");
}

//! On-disk project layout and the structural check that makes a directory a
//! resolvable research project.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ContextError, ContextResult};

/// Directory that marks a project root.
pub const MARKER_DIR: &str = ".research";
/// Project config file inside [`MARKER_DIR`].
pub const CONFIG_FILE: &str = "config.toml";
/// SQLite database file inside [`MARKER_DIR`].
pub const DATABASE_FILE: &str = "research.db";
/// Audit log directory inside [`MARKER_DIR`].
pub const LOG_DIR: &str = "logs";

/// Contents of `.research/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project: ProjectSection,
}

/// The `[project]` table of the project config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methodology: Option<String>,
    #[serde(default)]
    pub novel_theory_mode: bool,
    pub created_at: DateTime<Utc>,
}

fn default_domain() -> String {
    "General".to_string()
}

impl ProjectConfig {
    /// Build a config for a brand-new project.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            project: ProjectSection {
                id: uuid::Uuid::new_v4().to_string(),
                name: name.into(),
                description: description.into(),
                domain: domain.into(),
                methodology: None,
                novel_theory_mode: false,
                created_at: Utc::now(),
            },
        }
    }
}

/// Paths of the files that make up one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn marker_dir(&self) -> PathBuf {
        self.root.join(MARKER_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.marker_dir().join(CONFIG_FILE)
    }

    pub fn database_path(&self) -> PathBuf {
        self.marker_dir().join(DATABASE_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.marker_dir().join(LOG_DIR)
    }

    /// True when the marker config file exists, without validating it.
    pub fn has_marker(&self) -> bool {
        self.config_path().is_file()
    }
}

/// A project that passed the structural check.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectContext {
    pub layout: ProjectLayout,
    pub config: ProjectConfig,
}

impl ProjectContext {
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn id(&self) -> &str {
        &self.config.project.id
    }

    pub fn name(&self) -> &str {
        &self.config.project.name
    }
}

/// Load and validate the project rooted at `root`.
pub fn load_project(root: &Path) -> ContextResult<ProjectContext> {
    if !root.is_dir() {
        return Err(ContextError::NotFound {
            path: root.to_path_buf(),
        });
    }

    let root = root.canonicalize().map_err(|source| ContextError::Io {
        path: root.to_path_buf(),
        source,
    })?;
    let layout = ProjectLayout::new(root);
    let config_path = layout.config_path();

    let raw = fs::read_to_string(&config_path).map_err(|source| ContextError::Io {
        path: config_path.clone(),
        source,
    })?;

    let config: ProjectConfig = toml::from_str(&raw).map_err(|e| ContextError::InvalidConfig {
        path: config_path.clone(),
        message: e.to_string(),
    })?;

    if config.project.id.trim().is_empty() {
        return Err(ContextError::InvalidConfig {
            path: config_path,
            message: "project.id is empty".to_string(),
        });
    }
    if config.project.name.trim().is_empty() {
        return Err(ContextError::InvalidConfig {
            path: config_path,
            message: "project.name is empty".to_string(),
        });
    }

    Ok(ProjectContext { layout, config })
}

/// Create the project directory structure and write its config.
///
/// Fails with [`ContextError::AlreadyExists`] if `root` already holds a project.
pub fn create_project(root: &Path, config: &ProjectConfig) -> ContextResult<ProjectContext> {
    let layout = ProjectLayout::new(root);
    if layout.has_marker() {
        return Err(ContextError::AlreadyExists {
            path: root.to_path_buf(),
        });
    }

    let log_dir = layout.log_dir();
    fs::create_dir_all(&log_dir).map_err(|source| ContextError::Io {
        path: log_dir.clone(),
        source,
    })?;

    let body = toml::to_string_pretty(config).map_err(|e| ContextError::InvalidConfig {
        path: layout.config_path(),
        message: e.to_string(),
    })?;
    let config_path = layout.config_path();
    fs::write(&config_path, body).map_err(|source| ContextError::Io {
        path: config_path,
        source,
    })?;

    load_project(root)
}

/// Directory-name form of a project name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("demo");
        let config = ProjectConfig::new("Demo", "d", "General");

        let created = create_project(&root, &config).unwrap();
        assert_eq!(created.config, config);
        assert!(created.layout.log_dir().is_dir());

        let loaded = load_project(&root).unwrap();
        assert_eq!(loaded.id(), config.project.id);
        assert_eq!(loaded.name(), "Demo");
    }

    #[test]
    fn test_create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProjectConfig::new("Demo", "", "General");
        create_project(dir.path(), &config).unwrap();

        let err = create_project(dir.path(), &config).unwrap_err();
        assert!(matches!(err, ContextError::AlreadyExists { .. }));
    }

    #[test]
    fn test_malformed_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        fs::create_dir_all(layout.marker_dir()).unwrap();
        fs::write(layout.config_path(), "this is = = not toml").unwrap();

        let err = load_project(dir.path()).unwrap_err();
        assert!(matches!(err, ContextError::InvalidConfig { .. }));
    }

    #[test]
    fn test_config_with_empty_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        fs::create_dir_all(layout.marker_dir()).unwrap();
        fs::write(
            layout.config_path(),
            "[project]\nid = \"abc\"\nname = \"\"\ncreated_at = \"2024-01-01T00:00:00Z\"\n",
        )
        .unwrap();

        let err = load_project(dir.path()).unwrap_err();
        assert!(err.to_string().contains("project.name"));
    }

    #[test]
    fn test_missing_directory() {
        let err = load_project(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, ContextError::NotFound { .. }));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Demo"), "demo");
        assert_eq!(slugify("  Climate & Health: 2024 "), "climate-health-2024");
        assert_eq!(slugify("***"), "project");
    }
}

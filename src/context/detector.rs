//! Active project resolution.
//!
//! Signals are tried in priority order: the explicit `project_path` argument,
//! the environment signal (possibly replaced by `switch_project`), upward
//! traversal from the working directory, and the global per-user project.
//! The ambient part of the result (everything but the explicit argument) is
//! cached until [`ContextDetector::invalidate`] is called.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::project::{load_project, ProjectContext, MARKER_DIR};
use crate::config::ContextConfig;
use crate::error::ContextResult;

/// Which signal produced a resolved context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    Explicit,
    Environment,
    Switched,
    Traversal,
    GlobalDefault,
}

/// Request-scoped resolution result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedContext {
    project: Option<ProjectContext>,
    source: Option<ContextSource>,
}

impl ResolvedContext {
    pub fn resolved(project: ProjectContext, source: ContextSource) -> Self {
        Self {
            project: Some(project),
            source: Some(source),
        }
    }

    pub fn unresolved() -> Self {
        Self::default()
    }

    pub fn is_resolved(&self) -> bool {
        self.project.is_some()
    }

    pub fn project(&self) -> Option<&ProjectContext> {
        self.project.as_ref()
    }

    pub fn project_path(&self) -> Option<&Path> {
        self.project.as_ref().map(|p| p.root())
    }

    pub fn source(&self) -> Option<ContextSource> {
        self.source
    }
}

#[derive(Default)]
struct DetectorState {
    /// Environment signal replaced in-process by `switch_project`.
    switched: Option<PathBuf>,
    ambient: Option<ResolvedContext>,
    explicit: HashMap<PathBuf, ProjectContext>,
    invalidations: u64,
}

/// Resolves and caches the active research project.
pub struct ContextDetector {
    config: ContextConfig,
    state: RwLock<DetectorState>,
}

impl ContextDetector {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            state: RwLock::new(DetectorState::default()),
        }
    }

    /// Resolve the context for one call. `explicit` is the caller's
    /// `project_path` argument, if any.
    pub fn resolve(&self, explicit: Option<&str>) -> ResolvedContext {
        if let Some(raw) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(project) = self.resolve_explicit(Path::new(raw)) {
                return ResolvedContext::resolved(project, ContextSource::Explicit);
            }
        }
        self.resolve_ambient()
    }

    /// Resolve from ambient signals only, using the cache when warm.
    pub fn resolve_ambient(&self) -> ResolvedContext {
        loop {
            let generation = {
                let state = self.read();
                if let Some(cached) = &state.ambient {
                    return cached.clone();
                }
                state.invalidations
            };

            let resolved = self.detect_ambient();
            let mut state = self.write();
            // Detection must not outlive a switch or invalidation that ran meanwhile.
            if state.invalidations != generation {
                debug!("Context changed during detection; retrying");
                continue;
            }
            return state.ambient.get_or_insert(resolved).clone();
        }
    }

    /// Drop every cached resolution.
    pub fn invalidate(&self) {
        let mut state = self.write();
        state.ambient = None;
        state.explicit.clear();
        state.invalidations += 1;
        debug!(invalidations = state.invalidations, "Context cache invalidated");
    }

    /// Make `path` the active project for subsequent ambient resolutions.
    pub fn switch_project(&self, path: &Path) -> ContextResult<ProjectContext> {
        let project = load_project(path)?;
        {
            let mut state = self.write();
            state.switched = Some(project.root().to_path_buf());
            state.ambient = None;
            state.explicit.clear();
            state.invalidations += 1;
        }
        info!(project = %project.root().display(), "Switched active project");
        Ok(project)
    }

    /// Forget any switched project and fall back to the configured signals.
    pub fn reset_context(&self) {
        let mut state = self.write();
        state.switched = None;
        state.ambient = None;
        state.explicit.clear();
        state.invalidations += 1;
        info!("Project context reset");
    }

    /// Number of cache invalidations so far.
    pub fn invalidations(&self) -> u64 {
        self.read().invalidations
    }

    /// Global per-user fallback directory.
    pub fn home_dir(&self) -> &Path {
        &self.config.home_dir
    }

    /// Parent directory for projects created without an explicit path.
    pub fn projects_root(&self) -> &Path {
        &self.config.projects_root
    }

    fn resolve_explicit(&self, path: &Path) -> Option<ProjectContext> {
        if let Some(hit) = self.read().explicit.get(path) {
            return Some(hit.clone());
        }
        match load_project(path) {
            Ok(project) => {
                self.write()
                    .explicit
                    .insert(path.to_path_buf(), project.clone());
                Some(project)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Explicit project path rejected");
                None
            }
        }
    }

    fn detect_ambient(&self) -> ResolvedContext {
        let switched = self.read().switched.clone();
        if let Some(path) = switched {
            match load_project(&path) {
                Ok(project) => return ResolvedContext::resolved(project, ContextSource::Switched),
                Err(e) => warn!(path = %path.display(), error = %e, "Switched project no longer valid"),
            }
        }

        if let Some(path) = self.environment_signal() {
            match load_project(&path) {
                Ok(project) => {
                    return ResolvedContext::resolved(project, ContextSource::Environment)
                }
                Err(e) => debug!(path = %path.display(), error = %e, "Environment project rejected"),
            }
        }

        if let Some(project) = self.traverse() {
            return ResolvedContext::resolved(project, ContextSource::Traversal);
        }

        match load_project(&self.config.home_dir) {
            Ok(project) => ResolvedContext::resolved(project, ContextSource::GlobalDefault),
            Err(_) => {
                debug!("No research project resolved");
                ResolvedContext::unresolved()
            }
        }
    }

    fn environment_signal(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config.project_path {
            return Some(path.clone());
        }
        let config_path = self.config.config_path.as_ref()?;
        let parent = config_path.parent()?;
        if parent.file_name().map(|n| n == MARKER_DIR).unwrap_or(false) {
            parent.parent().map(Path::to_path_buf)
        } else {
            Some(parent.to_path_buf())
        }
    }

    fn traverse(&self) -> Option<ProjectContext> {
        let start = match &self.config.search_start {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().ok()?,
        };

        for dir in start.ancestors() {
            if !dir.join(MARKER_DIR).is_dir() {
                continue;
            }
            match load_project(dir) {
                Ok(project) => return Some(project),
                Err(e) => debug!(path = %dir.display(), error = %e, "Skipping invalid project"),
            }
        }
        None
    }

    fn read(&self) -> RwLockReadGuard<'_, DetectorState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, DetectorState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::project::{create_project, ProjectConfig};
    use std::fs;

    fn context_config(home: &Path) -> ContextConfig {
        ContextConfig {
            project_path: None,
            config_path: None,
            home_dir: home.join("home"),
            projects_root: home.join("projects"),
            search_start: Some(home.join("cwd")),
        }
    }

    fn make_project(root: &Path, name: &str) -> ProjectContext {
        create_project(root, &ProjectConfig::new(name, "", "General")).unwrap()
    }

    #[test]
    fn test_unresolved_without_signals() {
        let dir = tempfile::tempdir().unwrap();
        let detector = ContextDetector::new(context_config(dir.path()));
        assert!(!detector.resolve(None).is_resolved());
    }

    #[test]
    fn test_explicit_beats_environment() {
        let dir = tempfile::tempdir().unwrap();
        let env_project = make_project(&dir.path().join("env"), "Env");
        let explicit_project = make_project(&dir.path().join("explicit"), "Explicit");

        let mut config = context_config(dir.path());
        config.project_path = Some(env_project.root().to_path_buf());
        let detector = ContextDetector::new(config);

        let resolved = detector.resolve(Some(explicit_project.root().to_str().unwrap()));
        assert_eq!(resolved.source(), Some(ContextSource::Explicit));
        assert_eq!(resolved.project().unwrap().name(), "Explicit");

        let ambient = detector.resolve(None);
        assert_eq!(ambient.source(), Some(ContextSource::Environment));
        assert_eq!(ambient.project().unwrap().name(), "Env");
    }

    #[test]
    fn test_invalid_explicit_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let env_project = make_project(&dir.path().join("env"), "Env");
        let mut config = context_config(dir.path());
        config.project_path = Some(env_project.root().to_path_buf());
        let detector = ContextDetector::new(config);

        let resolved = detector.resolve(Some("/no/such/project"));
        assert_eq!(resolved.source(), Some(ContextSource::Environment));
    }

    #[test]
    fn test_config_path_signal() {
        let dir = tempfile::tempdir().unwrap();
        let project = make_project(&dir.path().join("cfg"), "Cfg");
        let mut config = context_config(dir.path());
        config.config_path = Some(project.layout.config_path());
        let detector = ContextDetector::new(config);

        let resolved = detector.resolve(None);
        assert_eq!(resolved.project().unwrap().name(), "Cfg");
    }

    #[test]
    fn test_traversal_skips_invalid_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let outer = make_project(&dir.path().join("cwd"), "Outer");
        let inner = dir.path().join("cwd").join("inner");
        fs::create_dir_all(inner.join(MARKER_DIR)).unwrap();
        fs::write(inner.join(MARKER_DIR).join("config.toml"), "garbage = [").unwrap();
        let deep = inner.join("deep");
        fs::create_dir_all(&deep).unwrap();

        let mut config = context_config(dir.path());
        config.search_start = Some(deep);
        let detector = ContextDetector::new(config);

        let resolved = detector.resolve(None);
        assert_eq!(resolved.source(), Some(ContextSource::Traversal));
        assert_eq!(resolved.project().unwrap().root(), outer.root());
    }

    #[test]
    fn test_global_default_project() {
        let dir = tempfile::tempdir().unwrap();
        make_project(&dir.path().join("home"), "Global");
        let detector = ContextDetector::new(context_config(dir.path()));

        let resolved = detector.resolve(None);
        assert_eq!(resolved.source(), Some(ContextSource::GlobalDefault));
    }

    #[test]
    fn test_cache_is_stale_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let detector = ContextDetector::new(context_config(dir.path()));
        assert!(!detector.resolve(None).is_resolved());

        // A project appearing on disk is not seen through a warm cache.
        make_project(&dir.path().join("cwd"), "Late");
        assert!(!detector.resolve(None).is_resolved());

        detector.invalidate();
        assert_eq!(detector.resolve(None).project().unwrap().name(), "Late");
    }

    #[test]
    fn test_switch_then_reset() {
        let dir = tempfile::tempdir().unwrap();
        let a = make_project(&dir.path().join("cwd"), "A");
        let b = make_project(&dir.path().join("b"), "B");
        let detector = ContextDetector::new(context_config(dir.path()));

        assert_eq!(detector.resolve(None).project().unwrap().root(), a.root());

        detector.switch_project(b.root()).unwrap();
        let resolved = detector.resolve(None);
        assert_eq!(resolved.source(), Some(ContextSource::Switched));
        assert_eq!(resolved.project().unwrap().root(), b.root());

        detector.reset_context();
        assert_eq!(detector.resolve(None).project().unwrap().root(), a.root());
        assert_eq!(detector.invalidations(), 2);
    }

    #[test]
    fn test_switch_during_detection_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let mut deep = dir.path().join("cwd");
        for i in 0..100 {
            deep.push(format!("d{}", i));
        }
        fs::create_dir_all(&deep).unwrap();
        make_project(&dir.path().join("cwd"), "A");
        let b = make_project(&dir.path().join("b"), "B");

        let mut config = context_config(dir.path());
        config.search_start = Some(deep);
        let detector = ContextDetector::new(config);

        for _ in 0..200 {
            detector.reset_context();
            std::thread::scope(|s| {
                s.spawn(|| detector.resolve_ambient());
                detector.switch_project(b.root()).unwrap();
            });
            let resolved = detector.resolve(None);
            assert_eq!(resolved.project().unwrap().root(), b.root());
            assert_eq!(resolved.source(), Some(ContextSource::Switched));
        }
    }

    #[test]
    fn test_switch_to_invalid_project_keeps_current() {
        let dir = tempfile::tempdir().unwrap();
        let a = make_project(&dir.path().join("cwd"), "A");
        let detector = ContextDetector::new(context_config(dir.path()));

        assert!(detector.switch_project(&dir.path().join("missing")).is_err());
        assert_eq!(detector.resolve(None).project().unwrap().root(), a.root());
    }
}

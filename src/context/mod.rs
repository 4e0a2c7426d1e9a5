//! Project context: on-disk layout, detection and argument injection.

mod detector;
mod injection;
mod project;

pub use detector::{ContextDetector, ContextSource, ResolvedContext};
pub use injection::{explicit_project_path, inject_context, ContextPolicy, PROJECT_PATH_ARG};
pub use project::{
    create_project, load_project, slugify, ProjectConfig, ProjectContext, ProjectLayout,
    ProjectSection, CONFIG_FILE, DATABASE_FILE, LOG_DIR, MARKER_DIR,
};

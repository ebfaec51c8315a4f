use std::path::{Path, PathBuf};
use std::time::Duration;

use fathom_core::layout;

/// Saves of the same artifact inside this window collapse into one re-audit.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// How long `fathom audit` waits for the last writes of a one-shot pass.
pub const ONE_SHOT_DRAIN_TIMEOUT: Duration = Duration::from_secs(600);

pub fn run_dir(project: &Path) -> PathBuf {
    layout::run_dir(project)
}

pub fn socket_path(project: &Path) -> PathBuf {
    layout::socket_path(project)
}

/// `<project>/<content_dir>`, the tree the filesystem host indexes.
pub fn content_root(project: &Path, content_dir: &str) -> PathBuf {
    project.join(content_dir)
}

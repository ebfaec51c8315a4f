pub mod audit;
pub mod daemon;
pub mod diff;
pub mod init;
pub mod refs;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use fathom_core::{config, AuditConfig};
use fathom_daemon::FsHost;

/// Canonical project root; the directory must exist.
pub fn resolve_project(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("cannot resolve project path '{}'", path.display()))
}

/// Load the project config and index its content tree.
pub fn load_host(project: &Path) -> Result<(AuditConfig, FsHost)> {
    let config = config::load_at(project)
        .with_context(|| format!("failed to load config for '{}'", project.display()))?;
    let host = FsHost::from_config(project, &config);
    host.scan()
        .with_context(|| format!("failed to index content under '{}'", host.layout().root().display()))?;
    Ok((config, host))
}

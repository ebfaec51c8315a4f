//! On-disk layout of a project's Fathom state.
//!
//! ```text
//! <project>/
//!   .fathom/config.yaml
//!   .fathom/templates/**/*.tera          (optional render overrides)
//!   Content/...                          (source artifacts)
//!   Saved/Fathom/
//!     audit-manifest.json
//!     Audit/v<N>/<relative/package/path>.md
//!     run/daemon.sock
//! ```
//!
//! Every helper is pure: no I/O, no directory creation.

use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = ".fathom";
pub const CONFIG_FILE: &str = "config.yaml";
pub const MANIFEST_FILE: &str = "audit-manifest.json";
pub const DAEMON_SOCKET: &str = "daemon.sock";

/// `<project>/.fathom/config.yaml`
pub fn config_path(project: &Path) -> PathBuf {
    project.join(CONFIG_DIR).join(CONFIG_FILE)
}

/// `<project>/.fathom/templates`, searched for `.tera` overrides.
pub fn templates_dir(project: &Path) -> PathBuf {
    project.join(CONFIG_DIR).join("templates")
}

/// `<project>/Saved/Fathom`
pub fn fathom_root(project: &Path) -> PathBuf {
    project.join("Saved").join("Fathom")
}

/// Directory segment for a schema version, e.g. `v10`.
pub fn version_segment(schema_version: u32) -> String {
    format!("v{schema_version}")
}

/// `<project>/Saved/Fathom/Audit/v<N>`
pub fn audit_root(project: &Path, schema_version: u32) -> PathBuf {
    fathom_root(project)
        .join("Audit")
        .join(version_segment(schema_version))
}

/// Project-relative form of [`audit_root`], as recorded in the manifest.
pub fn audit_root_relative(schema_version: u32) -> String {
    format!("Saved/Fathom/Audit/{}", version_segment(schema_version))
}

/// `<project>/Saved/Fathom/audit-manifest.json`
pub fn manifest_path(project: &Path) -> PathBuf {
    fathom_root(project).join(MANIFEST_FILE)
}

/// `<project>/Saved/Fathom/run`
pub fn run_dir(project: &Path) -> PathBuf {
    fathom_root(project).join("run")
}

/// `<project>/Saved/Fathom/run/daemon.sock`
pub fn socket_path(project: &Path) -> PathBuf {
    run_dir(project).join(DAEMON_SOCKET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_root_is_versioned() {
        let root = audit_root(Path::new("/proj"), 10);
        assert_eq!(root, PathBuf::from("/proj/Saved/Fathom/Audit/v10"));
        assert_eq!(audit_root_relative(10), "Saved/Fathom/Audit/v10");
    }

    #[test]
    fn socket_lives_under_run_dir() {
        assert!(socket_path(Path::new("/proj")).ends_with("Saved/Fathom/run/daemon.sock"));
    }
}

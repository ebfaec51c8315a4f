//! Per-project YAML configuration.
//!
//! Stored at `<project>/.fathom/config.yaml`. Every field has a default, so a
//! missing file or a partial file both load cleanly.
//!
//! # API pattern
//!
//! - `load_at(project)` / `save_at(project, config)` take the project root
//!   explicitly; tests always pass a `TempDir`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::layout;
use crate::types::AssetKind;

/// Bump when the audit format changes to invalidate every cached document.
pub const AUDIT_SCHEMA_VERSION: u32 = 10;

/// Ownership scope: only identities under this prefix are audited.
pub const DEFAULT_CONTENT_PREFIX: &str = "/Game/";

/// Tunables for the audit cache and its reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Version segment of the audit root directory.
    pub schema_version: u32,
    /// Package-name prefix mapped onto `content_dir`.
    pub content_prefix: String,
    /// Directory (relative to the project root) holding source artifacts.
    pub content_dir: String,
    /// Extension of source artifacts, without the dot.
    pub source_extension: String,
    /// Stale entries re-audited per tick.
    pub batch_size: usize,
    /// Entries between incremental cleanup calls.
    pub gc_interval: usize,
    /// Total time shutdown waits for background work.
    pub shutdown_timeout_ms: u64,
    /// Host tick period used by the daemon.
    pub tick_interval_ms: u64,
    /// Kinds eligible for auditing.
    pub kinds: Vec<AssetKind>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            schema_version: AUDIT_SCHEMA_VERSION,
            content_prefix: DEFAULT_CONTENT_PREFIX.to_string(),
            content_dir: "Content".to_string(),
            source_extension: "uasset".to_string(),
            batch_size: 5,
            gc_interval: 50,
            shutdown_timeout_ms: 5_000,
            tick_interval_ms: 50,
            kinds: AssetKind::all().to_vec(),
        }
    }
}

impl AuditConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Reject values the reconciliation pass cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.content_prefix.starts_with('/') || !self.content_prefix.ends_with('/') {
            return Err(ConfigError::Invalid {
                field: "content_prefix",
                reason: format!("'{}' must start and end with '/'", self.content_prefix),
            });
        }
        if self.source_extension.is_empty() || self.source_extension.starts_with('.') {
            return Err(ConfigError::Invalid {
                field: "source_extension",
                reason: "must be non-empty and given without a leading dot".to_string(),
            });
        }
        Ok(())
    }
}

/// Load `<project>/.fathom/config.yaml`, falling back to defaults when absent.
///
/// Returns `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(project: &Path) -> Result<AuditConfig, ConfigError> {
    let path = layout::config_path(project);
    if !path.exists() {
        return Ok(AuditConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let config: AuditConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// Atomically save the config: serialize → `config.yaml.tmp` → `rename`.
pub fn save_at(project: &Path, config: &AuditConfig) -> Result<(), ConfigError> {
    config.validate()?;
    let path = layout::config_path(project);
    let dir = project.join(layout::CONFIG_DIR);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_file_name(format!("{}.tmp", layout::CONFIG_FILE));
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Write a default config if none exists; returns the effective config.
pub fn init_at(project: &Path) -> Result<AuditConfig, ConfigError> {
    if layout::config_path(project).exists() {
        return load_at(project);
    }
    let config = AuditConfig::default();
    save_at(project, &config)?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let project = TempDir::new().expect("tempdir");
        let config = load_at(project.path()).expect("load");
        assert_eq!(config, AuditConfig::default());
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let project = TempDir::new().expect("tempdir");
        let path = layout::config_path(project.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "batch_size: 2\nkinds: [data_table]\n").unwrap();

        let config = load_at(project.path()).expect("load");
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.kinds, vec![AssetKind::DataTable]);
        assert_eq!(config.schema_version, AUDIT_SCHEMA_VERSION);
    }

    #[test]
    fn save_is_atomic_and_roundtrips() {
        let project = TempDir::new().expect("tempdir");
        let config = AuditConfig {
            schema_version: 11,
            ..AuditConfig::default()
        };
        save_at(project.path(), &config).expect("save");
        let tmp = layout::config_path(project.path()).with_file_name("config.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
        assert_eq!(load_at(project.path()).expect("load"), config);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = AuditConfig {
            batch_size: 0,
            ..AuditConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn init_keeps_existing_config() {
        let project = TempDir::new().expect("tempdir");
        let custom = AuditConfig {
            gc_interval: 7,
            ..AuditConfig::default()
        };
        save_at(project.path(), &custom).expect("save");
        let loaded = init_at(project.path()).expect("init");
        assert_eq!(loaded.gc_interval, 7);
    }
}

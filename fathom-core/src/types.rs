//! Domain types for the Fathom audit cache.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Snapshots are plain owned data so they can be moved onto background threads.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Package name uniquely identifying a content artifact, e.g. `/Game/UI/WBP_Menu`.
///
/// Stable across renames only through an explicit rename notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetIdentity(pub String);

impl AssetIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment: `/Game/UI/WBP_Menu` → `WBP_Menu`.
    pub fn short_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// True if the identity lives under `prefix` (e.g. `/Game/`).
    pub fn is_within(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix) && self.0.len() > prefix.len()
    }

    /// Path relative to `prefix`, slash-separated, or `None` when out of scope.
    pub fn relative_to<'a>(&'a self, prefix: &str) -> Option<&'a str> {
        if self.is_within(prefix) {
            Some(&self.0[prefix.len()..])
        } else {
            None
        }
    }
}

impl fmt::Display for AssetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for AssetIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AssetIdentity {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Lowercase hex content hash of a source artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Category of an audited asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Blueprint,
    ControlRig,
    DataTable,
    DataAsset,
    UserDefinedStruct,
}

impl AssetKind {
    /// All kinds in a stable order.
    pub fn all() -> &'static [AssetKind] {
        &[
            AssetKind::Blueprint,
            AssetKind::ControlRig,
            AssetKind::DataTable,
            AssetKind::DataAsset,
            AssetKind::UserDefinedStruct,
        ]
    }

    /// Human-readable label used in audit headers.
    pub fn label(&self) -> &'static str {
        match self {
            AssetKind::Blueprint => "Blueprint",
            AssetKind::ControlRig => "ControlRig",
            AssetKind::DataTable => "DataTable",
            AssetKind::DataAsset => "DataAsset",
            AssetKind::UserDefinedStruct => "UserDefinedStruct",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Blueprint => write!(f, "blueprint"),
            AssetKind::ControlRig => write!(f, "control_rig"),
            AssetKind::DataTable => write!(f, "data_table"),
            AssetKind::DataAsset => write!(f, "data_asset"),
            AssetKind::UserDefinedStruct => write!(f, "user_defined_struct"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One host-visible asset eligible for auditing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub identity: AssetIdentity,
    pub kind: AssetKind,
}

/// Per-asset row built at the start of a reconciliation pass.
///
/// Immutable once built; the whole list is discarded when the pass ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleCheckEntry {
    pub identity: AssetIdentity,
    /// `None` when the host cannot resolve the artifact on disk.
    pub source_path: Option<PathBuf>,
    pub audit_path: PathBuf,
    pub kind: AssetKind,
}

/// A titled block of audit lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSection {
    pub title: String,
    #[serde(default)]
    pub lines: Vec<String>,
}

impl AuditSection {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            lines: Vec::new(),
        }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }
}

/// Immutable capture of a live asset, gathered on the host thread and
/// serialized on a background thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSnapshot {
    pub identity: AssetIdentity,
    pub kind: AssetKind,
    pub name: String,
    /// Artifact on disk whose bytes are fingerprinted into the document.
    pub source_path: Option<PathBuf>,
    pub gathered_at: DateTime<Utc>,
    #[serde(default)]
    pub sections: Vec<AuditSection>,
}

impl AuditSnapshot {
    /// Empty snapshot named after the identity's short name.
    pub fn new(identity: AssetIdentity, kind: AssetKind, source_path: Option<PathBuf>) -> Self {
        let name = identity.short_name().to_string();
        Self {
            identity,
            kind,
            name,
            source_path,
            gathered_at: Utc::now(),
            sections: Vec::new(),
        }
    }

    pub fn with_section(mut self, section: AuditSection) -> Self {
        self.sections.push(section);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

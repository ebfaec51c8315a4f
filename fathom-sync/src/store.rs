//! Audit store — maps identities to Markdown documents under a versioned root.
//!
//! ```text
//! /Game/UI/WBP_Menu  <->  <project>/Saved/Fathom/Audit/v10/UI/WBP_Menu.md
//! ```
//!
//! Writes use the same atomic `.tmp` + rename pattern as the config file.
//! Writers to distinct paths need no coordination; the in-flight tracker keeps
//! two writers off the same path.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use fathom_core::{layout, AssetIdentity, AuditConfig, DEFAULT_CONTENT_PREFIX};

use crate::error::{io_err, SyncError};

const DOCUMENT_EXTENSION: &str = "md";

/// On-disk `audit-manifest.json` payload, read by external tools to find the
/// current audit root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditManifest {
    pub version: u32,
    #[serde(rename = "auditDir")]
    pub audit_dir: String,
}

/// Document store rooted at `<project>/Saved/Fathom/Audit/v<N>/`.
#[derive(Debug, Clone)]
pub struct AuditStore {
    project_root: PathBuf,
    content_prefix: String,
    schema_version: u32,
    root: PathBuf,
}

impl AuditStore {
    pub fn new(project_root: impl Into<PathBuf>, schema_version: u32) -> Self {
        let project_root = project_root.into();
        let root = layout::audit_root(&project_root, schema_version);
        Self {
            project_root,
            content_prefix: DEFAULT_CONTENT_PREFIX.to_string(),
            schema_version,
            root,
        }
    }

    pub fn from_config(project_root: impl Into<PathBuf>, config: &AuditConfig) -> Self {
        Self::new(project_root, config.schema_version).with_prefix(&config.content_prefix)
    }

    pub fn with_prefix(mut self, content_prefix: &str) -> Self {
        self.content_prefix = content_prefix.to_string();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn content_prefix(&self) -> &str {
        &self.content_prefix
    }

    // -----------------------------------------------------------------------
    // Identity <-> path mapping
    // -----------------------------------------------------------------------

    /// Document path for `identity`: content prefix stripped, slashes kept,
    /// `.md` appended. Identities outside the prefix keep their full path.
    /// Empty, `.` and `..` segments are dropped so the path stays under the root.
    pub fn path_for(&self, identity: &AssetIdentity) -> PathBuf {
        let rel = identity
            .relative_to(&self.content_prefix)
            .unwrap_or_else(|| identity.as_str().trim_start_matches('/'));
        let segments: Vec<&str> = rel
            .split(['/', '\\'])
            .filter(|s| !matches!(*s, "" | "." | ".."))
            .collect();
        let mut path = self.root.clone();
        if let Some((last, parents)) = segments.split_last() {
            for segment in parents {
                path.push(segment);
            }
            path.push(format!("{last}.{DOCUMENT_EXTENSION}"));
        }
        path
    }

    /// Inverse of [`path_for`](Self::path_for) for documents under the root.
    pub fn identity_for(&self, path: &Path) -> Option<AssetIdentity> {
        if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXTENSION) {
            return None;
        }
        let rel = path.strip_prefix(&self.root).ok()?.with_extension("");
        let mut segments = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(s) => segments.push(s.to_str()?.to_string()),
                _ => return None,
            }
        }
        if segments.is_empty() {
            return None;
        }
        Some(AssetIdentity(format!("{}{}", self.content_prefix, segments.join("/"))))
    }

    // -----------------------------------------------------------------------
    // Document I/O
    // -----------------------------------------------------------------------

    /// Atomically write `document` to `path`, creating parent directories.
    ///
    /// Line endings are normalised to LF. The document goes to
    /// `<path>.fathom.tmp` first and is renamed into place.
    pub fn write(&self, path: &Path, document: &str) -> Result<(), SyncError> {
        let normalized = document.replace("\r\n", "\n");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let tmp = PathBuf::from(format!("{}.fathom.tmp", path.display()));
        std::fs::write(&tmp, normalized).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(path, e));
        }
        Ok(())
    }

    /// Remove the document at `path`. `Ok(false)` when nothing was there.
    pub fn delete(&self, path: &Path) -> Result<bool, SyncError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(path, e)),
        }
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    pub fn read(&self, path: &Path) -> Result<Option<String>, SyncError> {
        match std::fs::read_to_string(path) {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(path, e)),
        }
    }

    /// Every `.md` document under the current version root, sorted.
    pub fn list_documents(&self) -> Result<Vec<PathBuf>, SyncError> {
        let mut out = Vec::new();
        if self.root.is_dir() {
            collect_documents(&self.root, &mut out)?;
        }
        out.sort();
        Ok(out)
    }

    /// Delete every document whose identity `is_live` rejects.
    ///
    /// Per-file delete failures are logged and skipped. Returns the number of
    /// documents removed. Older version directories are never visited.
    pub fn sweep_orphans<F>(&self, is_live: F) -> Result<usize, SyncError>
    where
        F: Fn(&AssetIdentity) -> bool,
    {
        let mut swept = 0;
        for path in self.list_documents()? {
            let Some(identity) = self.identity_for(&path) else {
                continue;
            };
            if is_live(&identity) {
                continue;
            }
            match self.delete(&path) {
                Ok(true) => {
                    tracing::debug!("swept orphan audit for {identity}");
                    swept += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("failed to sweep {}: {e}", path.display()),
            }
        }
        Ok(swept)
    }

    // -----------------------------------------------------------------------
    // Manifest
    // -----------------------------------------------------------------------

    pub fn manifest(&self) -> AuditManifest {
        AuditManifest {
            version: self.schema_version,
            audit_dir: layout::audit_root_relative(self.schema_version),
        }
    }

    /// Write `<project>/Saved/Fathom/audit-manifest.json` atomically.
    pub fn write_manifest(&self) -> Result<PathBuf, SyncError> {
        let path = layout::manifest_path(&self.project_root);
        let json = serde_json::to_string_pretty(&self.manifest())?;
        self.write(&path, &json)?;
        Ok(path)
    }
}

/// Read the manifest of `project`, if one has been written.
pub fn read_manifest(project: &Path) -> Result<Option<AuditManifest>, SyncError> {
    let path = layout::manifest_path(project);
    match std::fs::read_to_string(&path) {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(&path, e)),
    }
}

fn collect_documents(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), SyncError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
        if file_type.is_dir() {
            collect_documents(&path, out)?;
        } else if file_type.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(DOCUMENT_EXTENSION)
        {
            out.push(path);
        }
    }
    Ok(())
}

//! Content fingerprints and the staleness oracle.
//!
//! A document is current when the `Hash:` line in its header matches the
//! SHA-256 of the source artifact. There is no side manifest: the document
//! itself is the record of what it was built from.

use std::path::Path;

use sha2::{Digest, Sha256};

use fathom_core::{Fingerprint, StaleCheckEntry};

use crate::error::{io_err, SyncError};

/// Header line prefix carrying the fingerprint.
pub const HASH_MARKER: &str = "Hash:";

/// Lowercase hex SHA-256 of the file at `source_path`.
pub fn compute_fingerprint(source_path: &Path) -> Result<Fingerprint, SyncError> {
    let bytes = std::fs::read(source_path).map_err(|e| io_err(source_path, e))?;
    let mut h = Sha256::new();
    h.update(&bytes);
    Ok(Fingerprint(hex::encode(h.finalize())))
}

/// Fingerprint recorded on the first `Hash:` line of `document`.
///
/// The value runs to end of line and is trimmed; an empty value is absent.
pub fn extract_stored_fingerprint(document: &str) -> Option<Fingerprint> {
    let line = document.lines().find(|l| l.starts_with(HASH_MARKER))?;
    let value = line[HASH_MARKER.len()..].trim();
    if value.is_empty() {
        None
    } else {
        Some(Fingerprint(value.to_string()))
    }
}

/// Read `audit_path` back and extract its fingerprint. Unreadable is absent.
pub fn read_stored_fingerprint(audit_path: &Path) -> Option<Fingerprint> {
    let document = std::fs::read_to_string(audit_path).ok()?;
    extract_stored_fingerprint(&document)
}

/// Result of comparing a source artifact against its stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    Current,
    /// No document, or a document without a fingerprint.
    Missing,
    Changed { stored: Fingerprint, current: Fingerprint },
    /// The source could not be hashed; never treated as stale.
    Undetermined,
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        matches!(self, Staleness::Missing | Staleness::Changed { .. })
    }
}

pub fn check(source_path: &Path, audit_path: &Path) -> Staleness {
    let current = match compute_fingerprint(source_path) {
        Ok(fp) => fp,
        Err(e) => {
            tracing::debug!("cannot fingerprint {}: {e}", source_path.display());
            return Staleness::Undetermined;
        }
    };
    match read_stored_fingerprint(audit_path) {
        None => Staleness::Missing,
        Some(stored) if stored == current => Staleness::Current,
        Some(stored) => Staleness::Changed { stored, current },
    }
}

pub fn is_stale(source_path: &Path, audit_path: &Path) -> bool {
    check(source_path, audit_path).is_stale()
}

/// The stale subset of `entries`, in input order.
///
/// Pure apart from reads; safe to run on a background thread. Entries the
/// host could not resolve to a source file are skipped.
pub fn collect_stale(entries: &[StaleCheckEntry]) -> Vec<StaleCheckEntry> {
    entries
        .iter()
        .filter(|e| match &e.source_path {
            Some(source) => is_stale(source, &e.audit_path),
            None => false,
        })
        .cloned()
        .collect()
}

//! Unified diff between a stored audit and what would be written now.

use std::path::Path;

use similar::TextDiff;

use fathom_core::AuditSnapshot;
use fathom_renderer::Renderer;

use crate::dispatcher::render_audit;
use crate::store::AuditStore;
use crate::SyncError;

/// Diff the document at `audit_path` against `rendered`.
///
/// A missing document diffs as empty. `None` when the two are identical.
pub fn diff_document(audit_path: &Path, rendered: &str) -> Result<Option<String>, SyncError> {
    let existing = match std::fs::read_to_string(audit_path) {
        Ok(content) => normalize_line_endings(&content),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(crate::error::io_err(audit_path, err)),
    };
    let rendered = normalize_line_endings(rendered);
    if existing == rendered {
        return Ok(None);
    }

    let name = audit_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let unified = TextDiff::from_lines(&existing, &rendered)
        .unified_diff()
        .header(&format!("a/{name}"), &format!("b/{name}"))
        .context_radius(3)
        .to_string();
    Ok(Some(unified))
}

/// Render `snapshot` as it would be written and diff it against the store.
pub fn diff_snapshot(
    store: &AuditStore,
    renderer: &Renderer,
    snapshot: &AuditSnapshot,
) -> Result<Option<String>, SyncError> {
    let (_, rendered) = render_audit(renderer, snapshot)?;
    diff_document(&store.path_for(&snapshot.identity), &rendered)
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}

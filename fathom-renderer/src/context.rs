//! Template context — serializable rendering payload built from an [`AuditSnapshot`].

use serde::{Deserialize, Serialize};

use fathom_core::{AuditSnapshot, Fingerprint};

use crate::error::RenderError;

/// Everything an audit template can reference.
///
/// `fingerprint` is an empty string when the source artifact could not be
/// hashed; the stored document then reads back as having no fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditContext {
    pub name: String,
    pub identity: String,
    /// Snake-case kind, e.g. `data_table`.
    pub kind: String,
    /// Header label, e.g. `DataTable`.
    pub kind_label: String,
    pub fingerprint: String,
    pub schema_version: u32,
    pub source_path: Option<String>,
    pub sections: Vec<SectionCtx>,
    pub meta: MetaCtx,
}

/// One titled block of lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionCtx {
    pub title: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaCtx {
    pub fathom_version: String,
}

impl AuditContext {
    /// Build an [`AuditContext`] from a snapshot and the fingerprint of its source.
    pub fn from_snapshot(
        snapshot: &AuditSnapshot,
        fingerprint: Option<&Fingerprint>,
        schema_version: u32,
    ) -> Self {
        let sections = snapshot
            .sections
            .iter()
            .map(|s| SectionCtx {
                title: s.title.clone(),
                lines: s.lines.clone(),
            })
            .collect();

        AuditContext {
            name: snapshot.name.clone(),
            identity: snapshot.identity.to_string(),
            kind: snapshot.kind.to_string(),
            kind_label: snapshot.kind.label().to_string(),
            fingerprint: fingerprint.map(|f| f.0.clone()).unwrap_or_default(),
            schema_version,
            source_path: snapshot
                .source_path
                .as_ref()
                .map(|p| p.display().to_string()),
            sections,
            meta: MetaCtx {
                fathom_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

//! The seam between the audit core and whatever owns the assets.
//!
//! The core never touches asset objects directly: it asks the host to list,
//! load and snapshot them. Everything on this trait is called from the host
//! thread; only [`AuditSnapshot`]s cross to background workers.

use std::path::PathBuf;

use fathom_core::{AssetIdentity, AssetKind, AuditConfig, AuditSnapshot, Candidate};

use crate::error::HostError;

/// Ownership scope for enumeration: content prefix plus enabled kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindFilter {
    pub content_prefix: String,
    pub kinds: Vec<AssetKind>,
}

impl KindFilter {
    pub fn new(content_prefix: impl Into<String>, kinds: Vec<AssetKind>) -> Self {
        Self {
            content_prefix: content_prefix.into(),
            kinds,
        }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(config.content_prefix.clone(), config.kinds.clone())
    }

    pub fn accepts(&self, identity: &AssetIdentity, kind: AssetKind) -> bool {
        identity.is_within(&self.content_prefix) && self.kinds.contains(&kind)
    }
}

pub trait HostAdapter {
    /// A loaded asset, valid on the host thread only.
    type Handle;

    /// Every asset in scope of `filter`.
    fn enumerate_candidates(&self, filter: &KindFilter) -> Vec<Candidate>;

    /// True while the host's asset index is still being populated.
    fn is_store_loading(&self) -> bool;

    fn load(&self, identity: &AssetIdentity, kind: AssetKind) -> Result<Self::Handle, HostError>;

    /// Artifact on disk backing `identity`, if it can be located.
    fn resolve_source_path(&self, identity: &AssetIdentity) -> Option<PathBuf>;

    /// Capture everything the document needs from a loaded asset.
    fn gather(&self, handle: &Self::Handle) -> AuditSnapshot;

    /// Incremental cleanup hook, called periodically during long batches.
    fn collect_garbage(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_checks_prefix_and_kind() {
        let filter = KindFilter::new("/Game/", vec![AssetKind::Blueprint]);
        assert!(filter.accepts(&AssetIdentity::from("/Game/BP_A"), AssetKind::Blueprint));
        assert!(!filter.accepts(&AssetIdentity::from("/Game/DT_A"), AssetKind::DataTable));
        assert!(!filter.accepts(&AssetIdentity::from("/Engine/BP_A"), AssetKind::Blueprint));
    }
}

//! Asset-kind detection for `fathom-detector`.
//!
//! `detect_kind(identity)` classifies a package name by its naming-convention
//! prefix and returns the [`AssetKind`] it is audited as. Longer prefixes are
//! checked before shorter ones so `WBP_` never falls through to a one-letter rule.
//!
//! `classify(identity, prefix, enabled)` additionally applies the ownership
//! scope: the identity must live under `prefix` and its kind must be one of
//! `enabled`.

use fathom_core::{AssetIdentity, AssetKind};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Errors from kind detection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectError {
    #[error("'{identity}' is outside the content prefix '{prefix}'")]
    OutOfScope { identity: String, prefix: String },

    #[error("could not determine kind for '{identity}': no known naming prefix")]
    UnknownKind { identity: String },

    #[error("'{identity}' is a {kind} but that kind is not enabled")]
    KindDisabled { identity: String, kind: AssetKind },
}

/// Naming-convention prefixes, most specific first.
const PREFIXES: &[(&str, AssetKind)] = &[
    ("WBP_", AssetKind::Blueprint),
    ("ABP_", AssetKind::Blueprint),
    ("BP_", AssetKind::Blueprint),
    ("GA_", AssetKind::Blueprint),
    ("GE_", AssetKind::Blueprint),
    ("CR_", AssetKind::ControlRig),
    ("DT_", AssetKind::DataTable),
    ("DA_", AssetKind::DataAsset),
    ("ST_", AssetKind::UserDefinedStruct),
    ("S_", AssetKind::UserDefinedStruct),
    ("F_", AssetKind::UserDefinedStruct),
];

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Detect the kind of the asset named by `identity` from its short name.
///
/// Returns `DetectError::UnknownKind` when no prefix matches. Matching is
/// case-sensitive, as the engine's naming conventions are.
pub fn detect_kind(identity: &AssetIdentity) -> Result<AssetKind, DetectError> {
    let name = identity.short_name();
    PREFIXES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix) && name.len() > prefix.len())
        .map(|(_, kind)| *kind)
        .ok_or_else(|| DetectError::UnknownKind {
            identity: identity.to_string(),
        })
}

/// Detect the kind and apply the ownership scope in one step.
pub fn classify(
    identity: &AssetIdentity,
    prefix: &str,
    enabled: &[AssetKind],
) -> Result<AssetKind, DetectError> {
    if !identity.is_within(prefix) {
        return Err(DetectError::OutOfScope {
            identity: identity.to_string(),
            prefix: prefix.to_string(),
        });
    }
    let kind = detect_kind(identity)?;
    if !enabled.contains(&kind) {
        return Err(DetectError::KindDisabled {
            identity: identity.to_string(),
            kind,
        });
    }
    Ok(kind)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

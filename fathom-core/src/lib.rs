//! Fathom core library — domain types, project layout, configuration, errors.
//!
//! - [`types`] — identities, kinds, stale-check entries and audit snapshots
//! - [`config`] — `.fathom/config.yaml` load / save / init
//! - [`layout`] — where audits, the manifest and the daemon socket live
//! - [`error`] — [`ConfigError`]

pub mod config;
pub mod error;
pub mod layout;
pub mod types;

pub use config::{AuditConfig, AUDIT_SCHEMA_VERSION, DEFAULT_CONTENT_PREFIX};
pub use error::ConfigError;
pub use types::{
    AssetIdentity, AssetKind, AuditSection, AuditSnapshot, Candidate, Fingerprint,
    StaleCheckEntry,
};

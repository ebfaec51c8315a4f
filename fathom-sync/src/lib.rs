//! # fathom-sync
//!
//! The audit cache core: keeps one Markdown document per content asset in
//! step with the asset's bytes.
//!
//! - [`fingerprint`] — SHA-256 fingerprints and the `Hash:`-line staleness oracle
//! - [`store`] — identity ↔ document mapping, atomic writes, orphan sweep, manifest
//! - [`in_flight`] / [`dispatcher`] — one background write per identity
//! - [`executor`] — where background work runs
//! - [`host`] — what the core needs from the asset host
//! - [`reconcile`] — the tick-driven stale reconciliation pass
//! - [`subsystem`] — [`AuditSubsystem`], tying it all together
//! - [`diff`] — preview of what a re-audit would change

pub mod diff;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod host;
pub mod in_flight;
pub mod reconcile;
pub mod store;
pub mod subsystem;

pub use diff::{diff_document, diff_snapshot};
pub use dispatcher::{render_audit, DispatchOutcome, ShutdownReport, WriteDispatcher, WriteReceipt};
pub use error::{HostError, SyncError, TaskError};
pub use executor::{BackgroundTask, Executor, Job, ThreadExecutor};
pub use fingerprint::{
    check, collect_stale, compute_fingerprint, extract_stored_fingerprint, is_stale,
    read_stored_fingerprint, Staleness,
};
pub use host::{HostAdapter, KindFilter};
pub use in_flight::{InFlightGuard, InFlightTracker};
pub use reconcile::{
    PassSummary, ReconcileContext, Reconciler, ReconciliationPhase, StaleCheck, TickResult,
};
pub use store::{read_manifest, AuditManifest, AuditStore};
pub use subsystem::{AuditSubsystem, SubsystemStatus};

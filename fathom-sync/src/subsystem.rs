//! The owning audit subsystem: one per project, driven by the host.
//!
//! The host forwards its save / remove / rename notifications and calls
//! [`AuditSubsystem::tick`] on its periodic callback until it returns
//! [`TickResult::Unregister`]. Everything here runs on the host thread.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use fathom_core::{layout, AssetIdentity, AssetKind, AuditConfig, AuditSnapshot};
use fathom_renderer::Renderer;

use crate::dispatcher::{DispatchOutcome, ShutdownReport, WriteDispatcher};
use crate::error::{HostError, SyncError};
use crate::executor::Executor;
use crate::host::{HostAdapter, KindFilter};
use crate::in_flight::InFlightTracker;
use crate::reconcile::{PassSummary, ReconcileContext, Reconciler, ReconciliationPhase, TickResult};
use crate::store::AuditStore;

/// Point-in-time view for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsystemStatus {
    pub phase: ReconciliationPhase,
    pub in_flight: usize,
    pub pending_writes: usize,
    pub failed_writes: usize,
    pub last_pass: Option<PassSummary>,
}

pub struct AuditSubsystem<H: HostAdapter> {
    host: H,
    config: AuditConfig,
    filter: KindFilter,
    store: Arc<AuditStore>,
    tracker: Arc<InFlightTracker>,
    dispatcher: WriteDispatcher,
    reconciler: Reconciler,
    executor: Arc<dyn Executor>,
    ticking: bool,
}

impl<H: HostAdapter> AuditSubsystem<H> {
    /// Validate `config`, write the audit manifest and arm the startup pass.
    ///
    /// Template overrides are read from `<project>/.fathom/templates`.
    pub fn initialize(
        project_root: &Path,
        host: H,
        executor: Arc<dyn Executor>,
        config: AuditConfig,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let store = Arc::new(AuditStore::from_config(project_root, &config));
        let renderer = Arc::new(Renderer::with_overrides(
            config.schema_version,
            Some(layout::templates_dir(project_root).as_path()),
        )?);
        let manifest = store.write_manifest()?;
        tracing::info!(
            "audit store at {} (manifest {})",
            store.root().display(),
            manifest.display()
        );

        let tracker = Arc::new(InFlightTracker::new());
        let dispatcher = WriteDispatcher::new(
            Arc::clone(&executor),
            Arc::clone(&store),
            renderer,
            Arc::clone(&tracker),
        );
        let mut subsystem = Self {
            host,
            filter: KindFilter::from_config(&config),
            reconciler: Reconciler::from_config(&config),
            config,
            store,
            tracker,
            dispatcher,
            executor,
            ticking: false,
        };
        subsystem.trigger_reconciliation_pass();
        Ok(subsystem)
    }

    // -----------------------------------------------------------------------
    // Host notifications
    // -----------------------------------------------------------------------

    /// Re-audit a freshly saved asset. `None` when it is out of scope.
    pub fn on_asset_saved<G>(
        &mut self,
        identity: &AssetIdentity,
        kind: AssetKind,
        gather: G,
    ) -> Option<DispatchOutcome>
    where
        G: FnOnce() -> AuditSnapshot,
    {
        if !self.filter.accepts(identity, kind) {
            tracing::debug!("ignoring save of out-of-scope asset {identity}");
            return None;
        }
        let audit_path = self.store.path_for(identity);
        Some(self.dispatcher.dispatch(identity.clone(), audit_path, gather))
    }

    /// Load `identity` through the host and re-audit it.
    pub fn audit_asset(
        &mut self,
        identity: &AssetIdentity,
        kind: AssetKind,
    ) -> Result<Option<DispatchOutcome>, HostError> {
        if !self.filter.accepts(identity, kind) {
            return Ok(None);
        }
        let handle = self.host.load(identity, kind)?;
        let host = &self.host;
        let audit_path = self.store.path_for(identity);
        Ok(Some(self.dispatcher.dispatch(
            identity.clone(),
            audit_path,
            || host.gather(&handle),
        )))
    }

    /// Delete the document of a removed asset. `Ok(true)` if one existed.
    pub fn on_asset_removed(&mut self, identity: &AssetIdentity) -> Result<bool, SyncError> {
        if !identity.is_within(&self.filter.content_prefix) {
            return Ok(false);
        }
        let path = self.store.path_for(identity);
        let removed = self.store.delete(&path)?;
        if removed {
            tracing::info!("removed audit for deleted asset {identity}");
        }
        Ok(removed)
    }

    /// Delete the document under the old name. The new name is audited on its
    /// next save or by the next pass.
    pub fn on_asset_renamed(
        &mut self,
        old: &AssetIdentity,
        new: &AssetIdentity,
    ) -> Result<bool, SyncError> {
        tracing::debug!("asset renamed: {old} -> {new}");
        self.on_asset_removed(old)
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Arm a pass; `false` if one is already running.
    pub fn trigger_reconciliation_pass(&mut self) -> bool {
        let armed = self.reconciler.trigger();
        if armed {
            self.ticking = true;
        }
        armed
    }

    /// Periodic host callback.
    pub fn tick(&mut self) -> TickResult {
        self.dispatcher.reap();
        let mut ctx = ReconcileContext {
            host: &self.host,
            store: &self.store,
            dispatcher: &mut self.dispatcher,
            executor: self.executor.as_ref(),
            filter: &self.filter,
        };
        let result = self.reconciler.step(&mut ctx);
        self.ticking = result == TickResult::Continue;
        result
    }

    /// Whether the host should keep calling [`tick`](Self::tick).
    pub fn is_ticking(&self) -> bool {
        self.ticking
    }

    /// Collect finished writes between passes. Returns how many were collected.
    pub fn reap_writes(&mut self) -> usize {
        self.dispatcher.reap()
    }

    /// Block until every dispatched write finishes or `timeout` elapses,
    /// leaving the subsystem usable.
    pub fn drain_writes(&mut self, timeout: Duration) -> ShutdownReport {
        self.dispatcher.shutdown(timeout)
    }

    pub fn phase(&self) -> ReconciliationPhase {
        self.reconciler.phase()
    }

    pub fn last_pass(&self) -> Option<&PassSummary> {
        self.reconciler.last_pass()
    }

    pub fn status(&self) -> SubsystemStatus {
        SubsystemStatus {
            phase: self.reconciler.phase(),
            in_flight: self.tracker.len(),
            pending_writes: self.dispatcher.pending(),
            failed_writes: self.dispatcher.failed(),
            last_pass: self.reconciler.last_pass().cloned(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn store(&self) -> &AuditStore {
        &self.store
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn filter(&self) -> &KindFilter {
        &self.filter
    }

    pub fn renderer(&self) -> &Renderer {
        self.dispatcher.renderer()
    }

    /// Stop the pass and wait for background work, all within the configured
    /// shutdown timeout.
    pub fn shutdown(mut self) -> ShutdownReport {
        let deadline = Instant::now() + self.config.shutdown_timeout();
        let hash_finished = self.reconciler.abandon(deadline);
        let mut report = self.dispatcher.shutdown_until(deadline);
        if hash_finished {
            tracing::info!("audit subsystem shut down ({} write(s) drained)", report.completed);
        } else {
            tracing::warn!("stale check still running at shutdown; abandoning it");
            report.abandoned += 1;
        }
        report
    }
}

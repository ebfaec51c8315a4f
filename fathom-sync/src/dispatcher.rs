//! Background write dispatcher.
//!
//! `dispatch` runs on the host thread: claim the identity, gather a snapshot,
//! and hand fingerprint + render + write to the executor. The claim travels
//! with the job and is released when the job finishes, fails, panics, or is
//! dropped unrun.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use fathom_core::{AssetIdentity, AuditSnapshot, Fingerprint};
use fathom_renderer::Renderer;

use crate::error::SyncError;
use crate::executor::{BackgroundTask, Executor};
use crate::fingerprint::compute_fingerprint;
use crate::in_flight::InFlightTracker;
use crate::store::AuditStore;

/// What `dispatch` did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched,
    /// A write for this identity is already running; the request was dropped.
    InFlight,
}

/// A finished background write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub identity: AssetIdentity,
    pub audit_path: PathBuf,
    pub fingerprint: Option<Fingerprint>,
}

/// How shutdown left outstanding work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub completed: usize,
    pub abandoned: usize,
}

struct WriteHandle {
    identity: AssetIdentity,
    task: BackgroundTask<Result<WriteReceipt, SyncError>>,
}

/// Fingerprint the snapshot's source and render its document.
///
/// An unreadable source renders with an empty hash line, so the document
/// reads back as unfingerprinted and is picked up by the next pass.
pub fn render_audit(
    renderer: &Renderer,
    snapshot: &AuditSnapshot,
) -> Result<(Option<Fingerprint>, String), SyncError> {
    let fingerprint = match snapshot.source_path.as_deref() {
        Some(source) => match compute_fingerprint(source) {
            Ok(fp) => Some(fp),
            Err(e) => {
                tracing::warn!("writing {} without fingerprint: {e}", snapshot.identity);
                None
            }
        },
        None => None,
    };
    let document = renderer.render(snapshot, fingerprint.as_ref())?;
    Ok((fingerprint, document))
}

fn write_audit(
    store: &AuditStore,
    renderer: &Renderer,
    snapshot: &AuditSnapshot,
    audit_path: PathBuf,
) -> Result<WriteReceipt, SyncError> {
    let (fingerprint, document) = render_audit(renderer, snapshot)?;
    store.write(&audit_path, &document)?;
    tracing::debug!("wrote audit: {}", audit_path.display());
    Ok(WriteReceipt {
        identity: snapshot.identity.clone(),
        audit_path,
        fingerprint,
    })
}

pub struct WriteDispatcher {
    executor: Arc<dyn Executor>,
    store: Arc<AuditStore>,
    renderer: Arc<Renderer>,
    tracker: Arc<InFlightTracker>,
    handles: Vec<WriteHandle>,
    failed: usize,
}

impl WriteDispatcher {
    pub fn new(
        executor: Arc<dyn Executor>,
        store: Arc<AuditStore>,
        renderer: Arc<Renderer>,
        tracker: Arc<InFlightTracker>,
    ) -> Self {
        Self {
            executor,
            store,
            renderer,
            tracker,
            handles: Vec::new(),
            failed: 0,
        }
    }

    /// Queue a write of `identity`'s document to `audit_path`.
    ///
    /// `gather` is only called when the claim succeeds, and always on the
    /// calling thread.
    pub fn dispatch<G>(
        &mut self,
        identity: AssetIdentity,
        audit_path: PathBuf,
        gather: G,
    ) -> DispatchOutcome
    where
        G: FnOnce() -> AuditSnapshot,
    {
        let Some(guard) = self.tracker.claim(&identity) else {
            tracing::debug!("write already in flight, dropping: {identity}");
            return DispatchOutcome::InFlight;
        };
        self.reap();

        let snapshot = gather();
        let store = Arc::clone(&self.store);
        let renderer = Arc::clone(&self.renderer);
        let task = BackgroundTask::spawn(self.executor.as_ref(), move || {
            let _guard = guard;
            write_audit(&store, &renderer, &snapshot, audit_path)
        });
        self.handles.push(WriteHandle { identity, task });
        DispatchOutcome::Dispatched
    }

    /// Drop completed handles, logging failures. Returns how many were reaped.
    pub fn reap(&mut self) -> usize {
        let before = self.handles.len();
        let mut failed = 0;
        self.handles.retain_mut(|h| {
            if !h.task.is_ready() {
                return true;
            }
            if let Some(result) = h.task.take() {
                if !log_result(&h.identity, result) {
                    failed += 1;
                }
            }
            false
        });
        self.failed += failed;
        before - self.handles.len()
    }

    /// Writes submitted and not yet reaped.
    pub fn pending(&self) -> usize {
        self.handles.len()
    }

    /// Writes that have failed since construction.
    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn store(&self) -> &AuditStore {
        &self.store
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Wait for every outstanding write, all sharing one `timeout`.
    pub fn shutdown(&mut self, timeout: Duration) -> ShutdownReport {
        self.shutdown_until(Instant::now() + timeout)
    }

    pub fn shutdown_until(&mut self, deadline: Instant) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        for mut handle in self.handles.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if handle.task.wait_for(remaining) {
                report.completed += 1;
                if let Some(result) = handle.task.take() {
                    if !log_result(&handle.identity, result) {
                        self.failed += 1;
                    }
                }
            } else {
                report.abandoned += 1;
            }
        }
        if report.abandoned > 0 {
            tracing::warn!(
                "shutdown timed out with {} audit write(s) still running",
                report.abandoned
            );
        }
        report
    }
}

/// `true` for a successful write.
fn log_result(
    identity: &AssetIdentity,
    result: Result<Result<WriteReceipt, SyncError>, crate::error::TaskError>,
) -> bool {
    match result {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::error!("audit write failed for {identity}: {e}");
            false
        }
        Err(e) => {
            tracing::error!("audit write for {identity} did not complete: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ThreadExecutor;
    use fathom_core::AssetKind;
    use tempfile::TempDir;

    fn dispatcher(dir: &TempDir) -> (WriteDispatcher, Arc<InFlightTracker>) {
        let tracker = Arc::new(InFlightTracker::new());
        let d = WriteDispatcher::new(
            Arc::new(ThreadExecutor),
            Arc::new(AuditStore::new(dir.path(), 10)),
            Arc::new(Renderer::new(10).unwrap()),
            Arc::clone(&tracker),
        );
        (d, tracker)
    }

    #[test]
    fn dispatch_writes_document_and_releases_claim() {
        let dir = TempDir::new().unwrap();
        let (mut d, tracker) = dispatcher(&dir);
        let id = AssetIdentity::from("/Game/BP_Door");
        let path = d.store().path_for(&id);

        let outcome = d.dispatch(id.clone(), path.clone(), || {
            AuditSnapshot::new(id.clone(), AssetKind::Blueprint, None)
        });
        assert_eq!(outcome, DispatchOutcome::Dispatched);

        let report = d.shutdown(Duration::from_secs(5));
        assert_eq!(report, ShutdownReport { completed: 1, abandoned: 0 });
        assert!(path.is_file());
        assert!(tracker.is_empty());
    }

    #[test]
    fn in_flight_identity_skips_gather() {
        let dir = TempDir::new().unwrap();
        let (mut d, tracker) = dispatcher(&dir);
        let id = AssetIdentity::from("/Game/BP_Door");
        assert!(tracker.try_begin(&id));

        let outcome = d.dispatch(id.clone(), d.store().path_for(&id), || {
            panic!("gather must not run for an in-flight identity")
        });
        assert_eq!(outcome, DispatchOutcome::InFlight);
        assert_eq!(d.pending(), 0);
    }
}

//! Stale reconciliation pass, advanced one phase per host tick.
//!
//! ```text
//! Idle -> WaitingForStore -> BuildingList -> BackgroundHash -> ProcessingStale -> Done -> Idle
//!                                                      \______ nothing stale ______/
//! ```
//!
//! Hashing runs off the host thread; loading and gathering stay on it, in
//! batches of `batch_size` per tick. Each phase owns its data, so a pass
//! cannot observe state left behind by the previous one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fathom_core::{AssetIdentity, AuditConfig, StaleCheckEntry};

use crate::dispatcher::WriteDispatcher;
use crate::executor::{BackgroundTask, Executor};
use crate::fingerprint::collect_stale;
use crate::host::{HostAdapter, KindFilter};
use crate::store::AuditStore;

/// Picks the stale subset of a candidate list; runs on a background thread.
pub type StaleCheck = fn(&[StaleCheckEntry]) -> Vec<StaleCheckEntry>;

/// What the host should do with its periodic callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    Continue,
    Unregister,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationPhase {
    Idle,
    WaitingForStore,
    BuildingList,
    BackgroundHash,
    ProcessingStale,
    Done,
}

/// Counters of one completed pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    pub scanned: usize,
    pub stale: usize,
    pub re_audited: usize,
    pub failed: usize,
    pub swept: usize,
    pub elapsed_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl PassSummary {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

/// Borrowed collaborators for one `step`.
pub struct ReconcileContext<'a, H: HostAdapter> {
    pub host: &'a H,
    pub store: &'a AuditStore,
    pub dispatcher: &'a mut WriteDispatcher,
    pub executor: &'a dyn Executor,
    pub filter: &'a KindFilter,
}

struct Counters {
    started: Instant,
    scanned: usize,
    stale: usize,
    re_audited: usize,
    failed: usize,
}

impl Counters {
    fn new(started: Instant) -> Self {
        Self {
            started,
            scanned: 0,
            stale: 0,
            re_audited: 0,
            failed: 0,
        }
    }
}

enum PassState {
    Idle,
    WaitingForStore {
        started: Instant,
    },
    BuildingList {
        started: Instant,
    },
    BackgroundHash {
        counters: Counters,
        task: BackgroundTask<Vec<StaleCheckEntry>>,
    },
    ProcessingStale {
        counters: Counters,
        stale: Vec<StaleCheckEntry>,
        cursor: usize,
    },
    Done {
        counters: Counters,
    },
}

impl PassState {
    fn phase(&self) -> ReconciliationPhase {
        match self {
            PassState::Idle => ReconciliationPhase::Idle,
            PassState::WaitingForStore { .. } => ReconciliationPhase::WaitingForStore,
            PassState::BuildingList { .. } => ReconciliationPhase::BuildingList,
            PassState::BackgroundHash { .. } => ReconciliationPhase::BackgroundHash,
            PassState::ProcessingStale { .. } => ReconciliationPhase::ProcessingStale,
            PassState::Done { .. } => ReconciliationPhase::Done,
        }
    }
}

pub struct Reconciler {
    state: PassState,
    batch_size: usize,
    gc_interval: usize,
    stale_check: StaleCheck,
    last_pass: Option<PassSummary>,
}

impl Reconciler {
    pub fn new(batch_size: usize, gc_interval: usize) -> Self {
        Self {
            state: PassState::Idle,
            batch_size: batch_size.max(1),
            gc_interval,
            stale_check: collect_stale,
            last_pass: None,
        }
    }

    /// Replace the fingerprint comparison run by the background hash phase.
    pub fn with_stale_check(mut self, stale_check: StaleCheck) -> Self {
        self.stale_check = stale_check;
        self
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(config.batch_size, config.gc_interval)
    }

    pub fn phase(&self) -> ReconciliationPhase {
        self.state.phase()
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, PassState::Idle)
    }

    pub fn last_pass(&self) -> Option<&PassSummary> {
        self.last_pass.as_ref()
    }

    /// Arm a pass. Ignored (returns `false`) while one is already running.
    pub fn trigger(&mut self) -> bool {
        if self.is_active() {
            tracing::debug!("reconciliation already running in {:?}", self.phase());
            return false;
        }
        self.state = PassState::WaitingForStore {
            started: Instant::now(),
        };
        true
    }

    /// Do at most one phase's work.
    pub fn step<H: HostAdapter>(&mut self, ctx: &mut ReconcileContext<'_, H>) -> TickResult {
        let state = std::mem::replace(&mut self.state, PassState::Idle);
        let next = match state {
            PassState::Idle => return TickResult::Unregister,
            PassState::WaitingForStore { started } => {
                if ctx.host.is_store_loading() {
                    PassState::WaitingForStore { started }
                } else {
                    PassState::BuildingList { started }
                }
            }
            PassState::BuildingList { started } => self.build_list(ctx, started),
            PassState::BackgroundHash { counters, task } => Self::poll_hash(counters, task),
            PassState::ProcessingStale {
                counters,
                stale,
                cursor,
            } => self.process_batch(ctx, counters, stale, cursor),
            PassState::Done { counters } => {
                self.finish(ctx, counters);
                return TickResult::Unregister;
            }
        };
        self.state = next;
        TickResult::Continue
    }

    /// Drop the running pass, waiting until `deadline` for a pending hash job.
    /// Returns `false` if that job was still running at the deadline.
    pub fn abandon(&mut self, deadline: Instant) -> bool {
        match std::mem::replace(&mut self.state, PassState::Idle) {
            PassState::BackgroundHash { mut task, .. } => {
                task.wait_for(deadline.saturating_duration_since(Instant::now()))
            }
            _ => true,
        }
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    fn build_list<H: HostAdapter>(
        &self,
        ctx: &mut ReconcileContext<'_, H>,
        started: Instant,
    ) -> PassState {
        let entries: Vec<StaleCheckEntry> = ctx
            .host
            .enumerate_candidates(ctx.filter)
            .into_iter()
            .filter(|c| ctx.filter.accepts(&c.identity, c.kind))
            .map(|c| StaleCheckEntry {
                source_path: ctx.host.resolve_source_path(&c.identity),
                audit_path: ctx.store.path_for(&c.identity),
                identity: c.identity,
                kind: c.kind,
            })
            .collect();

        let mut counters = Counters::new(started);
        counters.scanned = entries.len();
        tracing::info!("checking {} asset(s) for stale audits", entries.len());

        let entries = Arc::new(entries);
        let stale_check = self.stale_check;
        let task = BackgroundTask::spawn(ctx.executor, move || stale_check(&entries));
        PassState::BackgroundHash { counters, task }
    }

    fn poll_hash(
        mut counters: Counters,
        mut task: BackgroundTask<Vec<StaleCheckEntry>>,
    ) -> PassState {
        if !task.is_ready() {
            return PassState::BackgroundHash { counters, task };
        }
        let stale = match task.take() {
            Some(Ok(stale)) => stale,
            Some(Err(e)) => {
                tracing::error!("stale check failed: {e}");
                Vec::new()
            }
            None => Vec::new(),
        };
        counters.stale = stale.len();
        if stale.is_empty() {
            PassState::Done { counters }
        } else {
            tracing::info!("{} stale audit(s) to refresh", stale.len());
            PassState::ProcessingStale {
                counters,
                stale,
                cursor: 0,
            }
        }
    }

    fn process_batch<H: HostAdapter>(
        &self,
        ctx: &mut ReconcileContext<'_, H>,
        mut counters: Counters,
        stale: Vec<StaleCheckEntry>,
        cursor: usize,
    ) -> PassState {
        let end = (cursor + self.batch_size).min(stale.len());
        for (index, entry) in stale.iter().enumerate().take(end).skip(cursor) {
            match ctx.host.load(&entry.identity, entry.kind) {
                Ok(handle) => {
                    let host = ctx.host;
                    ctx.dispatcher.dispatch(
                        entry.identity.clone(),
                        entry.audit_path.clone(),
                        || host.gather(&handle),
                    );
                    counters.re_audited += 1;
                }
                Err(e) => {
                    tracing::warn!("failed to load {} for re-audit: {e}", entry.identity);
                    counters.failed += 1;
                }
            }
            if self.gc_interval > 0 && (index + 1) % self.gc_interval == 0 {
                ctx.host.collect_garbage();
            }
        }

        if end >= stale.len() {
            PassState::Done { counters }
        } else {
            PassState::ProcessingStale {
                counters,
                stale,
                cursor: end,
            }
        }
    }

    fn finish<H: HostAdapter>(&mut self, ctx: &mut ReconcileContext<'_, H>, counters: Counters) {
        let live: HashSet<AssetIdentity> = ctx
            .host
            .enumerate_candidates(ctx.filter)
            .into_iter()
            .map(|c| c.identity)
            .collect();
        let swept = match ctx.store.sweep_orphans(|id| live.contains(id)) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("orphan sweep failed: {e}");
                0
            }
        };

        let elapsed = counters.started.elapsed();
        let summary = PassSummary {
            scanned: counters.scanned,
            stale: counters.stale,
            re_audited: counters.re_audited,
            failed: counters.failed,
            swept,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            finished_at: Utc::now(),
        };
        tracing::info!(
            "reconciliation done: scanned={} re-audited={} failed={} swept={} elapsed={:.2}s",
            summary.scanned,
            summary.re_audited,
            summary.failed,
            summary.swept,
            elapsed.as_secs_f64()
        );
        self.last_pass = Some(summary);
    }
}

//! Shared fixtures: an in-memory host over a temp project and an executor
//! that only runs jobs when told to.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fathom_core::{AssetIdentity, AssetKind, AuditConfig, AuditSection, AuditSnapshot, Candidate};
use fathom_sync::{
    AuditSubsystem, Executor, HostAdapter, HostError, Job, KindFilter, TickResult,
};
use tempfile::TempDir;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ---------------------------------------------------------------------------
// ManualExecutor
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<Job>>,
}

impl Executor for ManualExecutor {
    fn execute(&self, job: Job) {
        self.queue.lock().unwrap().push_back(job);
    }
}

impl ManualExecutor {
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Run queued jobs, including any they enqueue, until the queue is empty.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self.queue.lock().unwrap().pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FakeHost
// ---------------------------------------------------------------------------

/// Assets live as `<project>/Content/<rel>.uasset`.
pub struct FakeHost {
    pub project: PathBuf,
    pub assets: RefCell<BTreeMap<AssetIdentity, AssetKind>>,
    pub loading: Cell<bool>,
    pub fail_load: RefCell<HashSet<AssetIdentity>>,
    pub gc_calls: Cell<usize>,
    pub gathers: Cell<usize>,
    pub enumerations: Cell<usize>,
}

impl FakeHost {
    pub fn new(project: &Path) -> Self {
        Self {
            project: project.to_path_buf(),
            assets: RefCell::new(BTreeMap::new()),
            loading: Cell::new(false),
            fail_load: RefCell::new(HashSet::new()),
            gc_calls: Cell::new(0),
            gathers: Cell::new(0),
            enumerations: Cell::new(0),
        }
    }

    pub fn source_path(&self, identity: &AssetIdentity) -> PathBuf {
        let rel = identity.relative_to("/Game/").unwrap_or(identity.as_str());
        self.project.join("Content").join(format!("{rel}.uasset"))
    }

    /// Register an asset and write its source bytes.
    pub fn add(&self, identity: &str, kind: AssetKind, bytes: &[u8]) -> AssetIdentity {
        let id = AssetIdentity::from(identity);
        self.write_source(&id, bytes);
        self.assets.borrow_mut().insert(id.clone(), kind);
        id
    }

    pub fn write_source(&self, identity: &AssetIdentity, bytes: &[u8]) {
        let path = self.source_path(identity);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    pub fn remove(&self, identity: &AssetIdentity) {
        self.assets.borrow_mut().remove(identity);
        let _ = std::fs::remove_file(self.source_path(identity));
    }
}

impl HostAdapter for FakeHost {
    type Handle = (AssetIdentity, AssetKind);

    fn enumerate_candidates(&self, filter: &KindFilter) -> Vec<Candidate> {
        self.enumerations.set(self.enumerations.get() + 1);
        self.assets
            .borrow()
            .iter()
            .filter(|(id, kind)| filter.accepts(id, **kind))
            .map(|(id, kind)| Candidate {
                identity: id.clone(),
                kind: *kind,
            })
            .collect()
    }

    fn is_store_loading(&self) -> bool {
        self.loading.get()
    }

    fn load(&self, identity: &AssetIdentity, kind: AssetKind) -> Result<Self::Handle, HostError> {
        if self.fail_load.borrow().contains(identity) {
            return Err(HostError::Load {
                identity: identity.to_string(),
                reason: "simulated load failure".to_string(),
            });
        }
        if !self.assets.borrow().contains_key(identity) {
            return Err(HostError::NotFound {
                identity: identity.to_string(),
            });
        }
        Ok((identity.clone(), kind))
    }

    fn resolve_source_path(&self, identity: &AssetIdentity) -> Option<PathBuf> {
        let path = self.source_path(identity);
        path.is_file().then_some(path)
    }

    fn gather(&self, handle: &Self::Handle) -> AuditSnapshot {
        self.gathers.set(self.gathers.get() + 1);
        let (identity, kind) = handle;
        AuditSnapshot::new(identity.clone(), *kind, self.resolve_source_path(identity))
            .with_section(AuditSection::new("Variables").line("Health: float"))
    }

    fn collect_garbage(&self) {
        self.gc_calls.set(self.gc_calls.get() + 1);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub project: TempDir,
    pub executor: Arc<ManualExecutor>,
}

impl Harness {
    pub fn new() -> Self {
        init_logging();
        Self {
            project: TempDir::new().expect("tempdir"),
            executor: Arc::new(ManualExecutor::default()),
        }
    }

    pub fn host(&self) -> FakeHost {
        FakeHost::new(self.project.path())
    }

    pub fn start(&self, host: FakeHost, config: AuditConfig) -> AuditSubsystem<FakeHost> {
        let executor: Arc<dyn Executor> = self.executor.clone();
        AuditSubsystem::initialize(self.project.path(), host, executor, config)
            .expect("initialize")
    }
}

/// Tick until the subsystem unregisters, running background jobs between
/// ticks, then drain outstanding writes. Returns the number of ticks.
pub fn run_pass(subsystem: &mut AuditSubsystem<FakeHost>, executor: &ManualExecutor) -> usize {
    let mut ticks = 0;
    loop {
        ticks += 1;
        assert!(ticks < 1_000, "pass did not finish");
        let result = subsystem.tick();
        executor.run_all();
        if result == TickResult::Unregister {
            break;
        }
    }
    subsystem.tick();
    ticks
}

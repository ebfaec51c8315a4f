use tokio::runtime::Handle;

use fathom_sync::{Executor, Job};

/// Runs audit jobs on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, job: Job) {
        // The JoinHandle is dropped: completion is observed through the
        // job's own channel.
        drop(self.handle.spawn_blocking(job));
    }
}

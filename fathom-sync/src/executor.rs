//! Background execution seam.
//!
//! The host decides where work runs: the daemon hands jobs to tokio's
//! blocking pool, tests run them by hand. [`BackgroundTask`] is the handle the
//! host thread polls without ever blocking a tick.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use crate::error::TaskError;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs off the host thread.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// One OS thread per job.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn execute(&self, job: Job) {
        std::thread::spawn(job);
    }
}

/// Handle to a value being produced on a background thread.
pub struct BackgroundTask<T> {
    rx: Receiver<Result<T, TaskError>>,
    slot: Option<Result<T, TaskError>>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    /// Submit `f` to `executor`. A panic inside `f` resolves the task to
    /// [`TaskError::Panicked`]; a job the executor drops unrun resolves to
    /// [`TaskError::Abandoned`].
    pub fn spawn<F>(executor: &dyn Executor, f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        executor.execute(Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(f)).map_err(|_| TaskError::Panicked);
            let _ = tx.send(result);
        }));
        Self { rx, slot: None }
    }
}

impl<T> BackgroundTask<T> {
    /// Non-blocking readiness poll.
    pub fn is_ready(&mut self) -> bool {
        if self.slot.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.slot = Some(result);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.slot = Some(Err(TaskError::Abandoned));
                true
            }
        }
    }

    /// Block up to `timeout` for completion; `true` if the task finished.
    pub fn wait_for(&mut self, timeout: Duration) -> bool {
        if self.slot.is_some() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(result) => {
                self.slot = Some(result);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                self.slot = Some(Err(TaskError::Abandoned));
                true
            }
        }
    }

    /// The result, once ready. `None` while pending or after a previous take.
    pub fn take(&mut self) -> Option<Result<T, TaskError>> {
        if self.is_ready() {
            self.slot.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Holds jobs until `run_all`.
    #[derive(Default)]
    struct Deferred(Mutex<Vec<Job>>);

    impl Executor for Deferred {
        fn execute(&self, job: Job) {
            self.0.lock().unwrap().push(job);
        }
    }

    impl Deferred {
        fn run_all(&self) {
            let jobs: Vec<Job> = std::mem::take(&mut *self.0.lock().unwrap());
            for job in jobs {
                job();
            }
        }
    }

    struct Dropping;

    impl Executor for Dropping {
        fn execute(&self, _job: Job) {}
    }

    #[test]
    fn pending_until_job_runs() {
        let exec = Deferred::default();
        let mut task = BackgroundTask::spawn(&exec, || 41 + 1);
        assert!(!task.is_ready());
        assert!(task.take().is_none());
        exec.run_all();
        assert!(task.is_ready());
        assert_eq!(task.take(), Some(Ok(42)));
        assert_eq!(task.take(), None);
    }

    #[test]
    fn panic_resolves_to_error() {
        let exec = Deferred::default();
        let mut task: BackgroundTask<u32> = BackgroundTask::spawn(&exec, || panic!("boom"));
        exec.run_all();
        assert_eq!(task.take(), Some(Err(TaskError::Panicked)));
    }

    #[test]
    fn dropped_job_resolves_to_abandoned() {
        let mut task = BackgroundTask::spawn(&Dropping, || 1);
        assert!(task.is_ready());
        assert_eq!(task.take(), Some(Err(TaskError::Abandoned)));
    }

    #[test]
    fn wait_for_times_out_then_completes() {
        let exec = Deferred::default();
        let mut task = BackgroundTask::spawn(&exec, || "done");
        assert!(!task.wait_for(Duration::from_millis(10)));
        exec.run_all();
        assert!(task.wait_for(Duration::from_millis(10)));
    }

    #[test]
    fn thread_executor_runs_job() {
        let mut task = BackgroundTask::spawn(&ThreadExecutor, || 7);
        assert!(task.wait_for(Duration::from_secs(5)));
        assert_eq!(task.take(), Some(Ok(7)));
    }
}

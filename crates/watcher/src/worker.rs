//! Worker contexts for event delivery and deferred tasks
//!
//! Every monitor is handed a [`WorkerContext`] explicitly. Event sources
//! deliver on it and the pause timer schedules on it, so tests can swap in a
//! deterministic stand-in and drive time by hand.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Unit of work run on a worker context
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Execution context for monitor work
///
/// Implementations must never run a job on the submitting thread: callers
/// may hold monitor locks while submitting.
pub trait WorkerContext: Send + Sync {
    /// Run `job` as soon as possible
    fn execute(&self, job: Job);

    /// Run `job` after `delay` unless the returned task is cancelled first
    fn execute_after(&self, delay: Duration, job: Job) -> ScheduledTask;
}

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a deferred job
///
/// Dropping the handle cancels the job. Cancelling after the job already ran
/// has no effect.
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancelToken,
    sleeper: Option<AbortHandle>,
}

impl ScheduledTask {
    /// Wrap the token a worker checks before running the job
    pub fn new(token: CancelToken) -> Self {
        Self {
            token,
            sleeper: None,
        }
    }

    /// Also abort the task sleeping until the deadline on cancel
    pub fn with_abort(token: CancelToken, sleeper: AbortHandle) -> Self {
        Self {
            token,
            sleeper: Some(sleeper),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
        if let Some(sleeper) = &self.sleeper {
            sleeper.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Worker backed by a tokio runtime
///
/// Jobs run one at a time in submission order, drained by a single task
/// from an unbounded channel. Deferred jobs sleep on `tokio::time` and are
/// queued behind regular jobs when due.
pub struct TokioWorker {
    name: String,
    handle: Handle,
    jobs: mpsc::UnboundedSender<Job>,
    /// Set when the worker owns its runtime
    runtime: Option<Runtime>,
}

impl TokioWorker {
    /// Run on an existing runtime
    pub fn new(name: &str, handle: Handle) -> Self {
        Self::start(name, handle, None)
    }

    /// Run on the current runtime if there is one, else on a dedicated one
    pub fn current_or_spawn(name: &str) -> io::Result<Self> {
        match Handle::try_current() {
            Ok(handle) => Ok(Self::new(name, handle)),
            Err(_) => Self::spawn(name),
        }
    }

    /// Run on a dedicated single-threaded runtime
    pub fn spawn(name: &str) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(name)
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self::start(name, handle, Some(runtime)))
    }

    fn start(name: &str, handle: Handle, runtime: Option<Runtime>) -> Self {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();

        let worker_name = name.to_string();
        handle.spawn(async move {
            while let Some(job) = queue.recv().await {
                job();
            }
            debug!("Worker {} exiting", worker_name);
        });

        Self {
            name: name.to_string(),
            handle,
            jobs,
            runtime,
        }
    }

    /// Name of the worker
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl WorkerContext for TokioWorker {
    fn execute(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            warn!("Worker {} has shut down, dropping job", self.name);
        }
    }

    fn execute_after(&self, delay: Duration, job: Job) -> ScheduledTask {
        let token = CancelToken::new();
        let jobs = self.jobs.clone();
        let guard = token.clone();

        let sleeper = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if guard.is_cancelled() {
                return;
            }
            // Cancellation may still land while the job waits in the queue
            let guarded: Job = Box::new(move || {
                if !guard.is_cancelled() {
                    job();
                }
            });
            let _ = jobs.send(guarded);
        });

        ScheduledTask::with_abort(token, sleeper.abort_handle())
    }
}

impl Drop for TokioWorker {
    fn drop(&mut self) {
        // May run on one of the runtime's own threads
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

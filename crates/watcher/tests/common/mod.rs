//! Common utilities for integration tests
//!
//! Deterministic stand-ins for the monitor's collaborators: a worker whose
//! queue and clock are driven by hand, a scripted event source, a token
//! service with programmable answers and a scope that can deny access.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ffi::OsStr;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use watcher::{
    CancelHandler, CancelToken, DescriptorService, EventHandler, EventMask, EventNotifier,
    EventOnlyOpener, EventSource, FileMonitor, Job, LocationToken, MonitorBuilder, MonitorError,
    ResolvedToken, ScheduledTask, ScopeAccess, TokenError, TokenService, WatchDescriptor,
    WorkerContext,
};

//----------- ManualWorker -----------------------------------------------------

struct PendingTimer {
    due: Duration,
    seq: u64,
    token: CancelToken,
    job: Job,
}

/// Worker that only runs jobs when the test says so
#[derive(Default)]
pub struct ManualWorker {
    queue: Mutex<VecDeque<Job>>,
    timers: Mutex<Vec<PendingTimer>>,
    now: Mutex<Duration>,
    seq: AtomicUsize,
}

impl ManualWorker {
    /// Run queued jobs (and anything they enqueue) until idle
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self.queue.lock().pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Move the virtual clock forward, firing due timers in order
    pub fn advance(&self, by: Duration) {
        let target = *self.now.lock() + by;

        loop {
            let next = {
                let mut timers = self.timers.lock();
                timers.retain(|t| !t.token.is_cancelled());
                let earliest = timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.seq))
                    .map(|(i, _)| i);
                earliest.map(|i| timers.remove(i))
            };

            let Some(timer) = next else { break };
            *self.now.lock() = timer.due;
            if !timer.token.is_cancelled() {
                (timer.job)();
            }
            self.run_pending();
        }

        *self.now.lock() = target;
        self.run_pending();
    }

    /// Timers still waiting to fire
    pub fn pending_timers(&self) -> usize {
        self.timers
            .lock()
            .iter()
            .filter(|t| !t.token.is_cancelled())
            .count()
    }
}

impl WorkerContext for ManualWorker {
    fn execute(&self, job: Job) {
        self.queue.lock().push_back(job);
    }

    fn execute_after(&self, delay: Duration, job: Job) -> ScheduledTask {
        let token = CancelToken::new();
        let due = *self.now.lock() + delay;
        self.timers.lock().push(PendingTimer {
            due,
            seq: self.seq.fetch_add(1, Ordering::SeqCst) as u64,
            token: token.clone(),
            job,
        });
        ScheduledTask::new(token)
    }
}

//----------- FakeNotifier -----------------------------------------------------

/// Event source whose events are injected by the test
pub struct FakeSource {
    pub path: Option<PathBuf>,
    pub raw_fd: i32,
    worker: Arc<dyn WorkerContext>,
    handler: Mutex<Option<EventHandler>>,
    cancel_handler: Mutex<Option<CancelHandler>>,
    resumed: AtomicBool,
    cancelled: AtomicBool,
}

impl FakeSource {
    /// Deliver `mask` through the worker, as the OS would
    pub fn emit(&self, mask: EventMask) {
        if !self.resumed.load(Ordering::SeqCst) || self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        if let Some(handler) = self.handler.lock().clone() {
            self.worker.execute(Box::new(move || handler(mask)));
        }
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed.load(Ordering::SeqCst)
    }
}

impl EventSource for FakeSource {
    fn set_event_handler(&self, handler: EventHandler) {
        *self.handler.lock() = Some(handler);
    }

    fn set_cancel_handler(&self, handler: CancelHandler) {
        *self.cancel_handler.lock() = Some(handler);
    }

    fn resume(&self) -> Result<(), MonitorError> {
        self.resumed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handler) = self.cancel_handler.lock().take() {
            self.worker.execute(handler);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Notifier recording every registration
#[derive(Default)]
pub struct FakeNotifier {
    sources: Mutex<Vec<Arc<FakeSource>>>,
}

impl FakeNotifier {
    pub fn registrations(&self) -> usize {
        self.sources.lock().len()
    }

    pub fn source(&self, index: usize) -> Arc<FakeSource> {
        self.sources.lock()[index].clone()
    }

    pub fn latest(&self) -> Arc<FakeSource> {
        self.sources
            .lock()
            .last()
            .cloned()
            .expect("no event source registered")
    }

    /// Sources that are resumed and not cancelled
    pub fn live_sources(&self) -> usize {
        self.sources
            .lock()
            .iter()
            .filter(|s| s.is_resumed() && !s.is_cancelled())
            .count()
    }
}

impl EventNotifier for FakeNotifier {
    fn watch(
        &self,
        descriptor: &WatchDescriptor,
        _events: EventMask,
        worker: Arc<dyn WorkerContext>,
    ) -> Result<Arc<dyn EventSource>, MonitorError> {
        let source = Arc::new(FakeSource {
            path: EventOnlyOpener.path_of(descriptor).ok(),
            raw_fd: descriptor.as_raw_fd(),
            worker,
            handler: Mutex::new(None),
            cancel_handler: Mutex::new(None),
            resumed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        });
        self.sources.lock().push(source.clone());
        Ok(source)
    }
}

//----------- FakeTokens -------------------------------------------------------

/// Token service with scripted resolution
///
/// Tokens are the raw bytes of the path they were created for; unless a
/// resolution is scripted, a token resolves to that path, not stale.
#[derive(Default)]
pub struct FakeTokens {
    next_resolution: Mutex<Option<Result<ResolvedToken, String>>>,
    created: Mutex<Vec<PathBuf>>,
    fail_create: AtomicBool,
}

impl FakeTokens {
    pub fn token_for(path: &Path) -> LocationToken {
        LocationToken::from_bytes(path.as_os_str().as_bytes().to_vec())
    }

    /// Answer every following `resolve` with `path` / `is_stale`
    pub fn resolve_to(&self, path: &Path, is_stale: bool) {
        *self.next_resolution.lock() = Some(Ok(ResolvedToken {
            path: path.to_path_buf(),
            is_stale,
        }));
    }

    /// Make every following `resolve` fail
    pub fn fail_resolution(&self, reason: &str) {
        *self.next_resolution.lock() = Some(Err(reason.to_string()));
    }

    pub fn fail_creation(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<PathBuf> {
        self.created.lock().clone()
    }
}

impl TokenService for FakeTokens {
    fn resolve(&self, token: &LocationToken) -> Result<ResolvedToken, TokenError> {
        match self.next_resolution.lock().clone() {
            Some(Ok(resolved)) => Ok(resolved),
            Some(Err(reason)) => Err(TokenError::Other(reason)),
            None => Ok(ResolvedToken {
                path: PathBuf::from(OsStr::from_bytes(token.as_bytes())),
                is_stale: false,
            }),
        }
    }

    fn create_token(&self, path: &Path) -> Result<LocationToken, TokenError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TokenError::Other("token creation disabled".to_string()));
        }
        self.created.lock().push(path.to_path_buf());
        Ok(Self::token_for(path))
    }
}

//----------- FakeScope --------------------------------------------------------

#[derive(Default)]
pub struct FakeScope {
    deny: AtomicBool,
    pub begun: AtomicUsize,
    pub ended: AtomicUsize,
}

impl FakeScope {
    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }
}

impl ScopeAccess for FakeScope {
    fn begin_access(&self, _path: &Path) -> bool {
        if self.deny.load(Ordering::SeqCst) {
            return false;
        }
        self.begun.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn end_access(&self, _path: &Path) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }
}

//----------- Harness ----------------------------------------------------------

/// A temp directory plus one of each fake
pub struct Harness {
    pub dir: TempDir,
    pub worker: Arc<ManualWorker>,
    pub notifier: Arc<FakeNotifier>,
    pub tokens: Arc<FakeTokens>,
    pub scope: Arc<FakeScope>,
    pub calls: Arc<AtomicUsize>,
    pub errors: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            worker: Arc::new(ManualWorker::default()),
            notifier: Arc::new(FakeNotifier::default()),
            tokens: Arc::new(FakeTokens::default()),
            scope: Arc::new(FakeScope::default()),
            calls: Arc::new(AtomicUsize::new(0)),
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a file in the temp directory, returning its canonical path
    pub fn file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path.canonicalize().unwrap()
    }

    /// Path inside the temp directory (not created)
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().canonicalize().unwrap().join(name)
    }

    pub fn builder(&self) -> MonitorBuilder {
        let errors = self.errors.clone();
        MonitorBuilder::new()
            .worker(self.worker.clone())
            .notifier(self.notifier.clone())
            .tokens(self.tokens.clone())
            .scope(self.scope.clone())
            .on_error(move |e| errors.lock().push(format!("{:?}", e)))
    }

    pub fn callback(&self) -> impl Fn() + Send + Sync + 'static {
        let calls = self.calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn watch(&self, path: &Path) -> FileMonitor {
        self.builder().watch(path, self.callback()).unwrap()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Recorded asynchronous errors whose debug form starts with `kind`
    pub fn errors_of(&self, kind: &str) -> usize {
        self.errors
            .lock()
            .iter()
            .filter(|e| e.starts_with(kind))
            .count()
    }
}

//! Single-file watch controller
//!
//! [`FileMonitor`] owns at most one open watch handle (descriptor plus event
//! source) and cycles through handle generations as the file is replaced or
//! moved:
//!
//! ```text
//! [Absent] --start ok--> [Active]
//! [Active] --stop / delete / link--> [Absent]    (delete/link: start again)
//! [Active] --rename, resolved--> [Absent] --start(new path)--> [Active]
//! [Active] --rename, unresolved--> [Absent]      (dormant)
//! ```
//!
//! Event handling runs on the injected worker context and is serialized per
//! monitor. Event and cancel handlers only hold a `Weak` reference back to
//! the monitor.

use crate::backend::NotifyBackend;
use crate::config::MonitorConfig;
use crate::debounce::PauseState;
use crate::error::MonitorError;
use crate::event::{EventMask, EventNotifier, EventSource};
use crate::platform::{DescriptorService, EventOnlyOpener, WatchDescriptor};
use crate::scope::{ScopeAccess, ScopeGuard, Unrestricted};
use crate::token::{InodeTokenService, LocationToken, TokenService};
use crate::worker::{TokioWorker, WorkerContext};
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Callback invoked on every unsuppressed change
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Receives failures that happen off the caller's thread
pub type ErrorHandler = Arc<dyn Fn(&MonitorError) + Send + Sync>;

/// Whether the monitor currently holds a live watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    /// A descriptor is open and its event source is live
    Active,
    /// No watch; nothing happens until `start()` is called
    Dormant,
}

/// External collaborators a monitor runs against
#[derive(Clone)]
pub struct Environment {
    pub scope: Arc<dyn ScopeAccess>,
    pub tokens: Arc<dyn TokenService>,
    pub descriptors: Arc<dyn DescriptorService>,
    pub notifier: Arc<dyn EventNotifier>,
    pub worker: Arc<dyn WorkerContext>,
}

/// Builder for [`FileMonitor`]
///
/// Any collaborator left unset gets the platform default: unrestricted
/// scope, inode tokens, event-only descriptors, the `notify` backend and a
/// tokio worker (on the current runtime, or a dedicated one outside tokio).
#[derive(Default)]
pub struct MonitorBuilder {
    config: MonitorConfig,
    scope: Option<Arc<dyn ScopeAccess>>,
    tokens: Option<Arc<dyn TokenService>>,
    descriptors: Option<Arc<dyn DescriptorService>>,
    notifier: Option<Arc<dyn EventNotifier>>,
    worker: Option<Arc<dyn WorkerContext>>,
    on_error: Option<ErrorHandler>,
}

impl MonitorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scope(mut self, scope: Arc<dyn ScopeAccess>) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn tokens(mut self, tokens: Arc<dyn TokenService>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn descriptors(mut self, descriptors: Arc<dyn DescriptorService>) -> Self {
        self.descriptors = Some(descriptors);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn EventNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn worker(mut self, worker: Arc<dyn WorkerContext>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Receive failures from event handling and automatic restarts
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&MonitorError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Monitor `path`, starting immediately
    ///
    /// A failed initial start does not fail construction: the monitor is
    /// returned dormant and the failure goes to the log and error handler.
    /// Only an unavailable worker context is returned as an error.
    pub fn watch<F>(self, path: impl AsRef<Path>, callback: F) -> Result<FileMonitor, MonitorError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let shared = self.into_shared(path.as_ref().to_path_buf(), None, Arc::new(callback))?;
        if let Err(e) = shared.start() {
            shared.report(&e);
        }
        Ok(FileMonitor { inner: shared })
    }

    /// Monitor the file a saved location token resolves to
    ///
    /// Fails when the token cannot be resolved. A stale token is accepted
    /// (with a warning) and replaced by a fresh one on start.
    pub fn watch_token<F>(self, token: LocationToken, callback: F) -> Result<FileMonitor, MonitorError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let tokens: Arc<dyn TokenService> = match &self.tokens {
            Some(tokens) => tokens.clone(),
            None => Arc::new(InodeTokenService::new(self.config.token_search_depth)),
        };

        let resolved = tokens.resolve(&token).map_err(|e| {
            error!("Failed to initialize monitor from location token: {}", e);
            MonitorError::TokenResolutionFailed(e)
        })?;

        let token = if resolved.is_stale {
            warn!(
                "Location token was stale and has been resolved to a new location: {}",
                resolved.path.display()
            );
            None
        } else {
            Some(token)
        };

        let shared = self
            .tokens(tokens)
            .into_shared(resolved.path, token, Arc::new(callback))?;
        if let Err(e) = shared.start() {
            shared.report(&e);
        }
        Ok(FileMonitor { inner: shared })
    }

    fn into_shared(
        self,
        target_path: PathBuf,
        location_token: Option<LocationToken>,
        callback: ChangeCallback,
    ) -> Result<Arc<Shared>, MonitorError> {
        let descriptors = self
            .descriptors
            .unwrap_or_else(|| Arc::new(EventOnlyOpener));
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(NotifyBackend::new(descriptors.clone())));
        let tokens = self
            .tokens
            .unwrap_or_else(|| Arc::new(InodeTokenService::new(self.config.token_search_depth)));
        let worker: Arc<dyn WorkerContext> = match self.worker {
            Some(worker) => worker,
            None => Arc::new(
                TokioWorker::current_or_spawn(&self.config.worker_name)
                    .map_err(MonitorError::WorkerUnavailable)?,
            ),
        };

        let env = Environment {
            scope: self.scope.unwrap_or_else(|| Arc::new(Unrestricted)),
            tokens,
            descriptors,
            notifier,
            worker,
        };

        Ok(Arc::new(Shared {
            env,
            config: self.config,
            callback,
            on_error: self.on_error,
            state: Mutex::new(MonitorState {
                target_path,
                location_token,
                handle: None,
                pause: PauseState::default(),
            }),
            dispatch: Mutex::new(()),
            next_generation: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }))
    }
}

/// Watches one file for changes and invokes a callback for each
///
/// Dropping the monitor cancels its event source and closes the descriptor.
pub struct FileMonitor {
    inner: Arc<Shared>,
}

impl FileMonitor {
    /// Monitor `path` with the default environment
    pub fn new<F>(path: impl AsRef<Path>, callback: F) -> Result<Self, MonitorError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        MonitorBuilder::new().watch(path, callback)
    }

    /// Monitor the file behind a saved location token
    pub fn from_token<F>(token: LocationToken, callback: F) -> Result<Self, MonitorError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        MonitorBuilder::new().watch_token(token, callback)
    }

    pub fn builder() -> MonitorBuilder {
        MonitorBuilder::new()
    }

    /// Open a watch on the current target path
    pub fn start(&self) -> Result<(), MonitorError> {
        self.inner.start()
    }

    /// Cancel the watch and forget the location token
    ///
    /// Teardown completes asynchronously on the worker context.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Suppress the callback for `duration`
    ///
    /// The most recent call wins: it replaces any pause in progress, even one
    /// that would have lasted longer.
    pub fn pause(&self, duration: Duration) {
        self.inner.pause(duration);
    }

    /// Pause for the configured default duration
    pub fn pause_default(&self) {
        self.inner.pause(self.inner.config.default_pause());
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().pause.is_paused()
    }

    pub fn status(&self) -> MonitorStatus {
        match &self.inner.state.lock().handle {
            Some(handle) if !handle.source.is_cancelled() => MonitorStatus::Active,
            _ => MonitorStatus::Dormant,
        }
    }

    /// Best-known location of the watched file
    pub fn target_path(&self) -> PathBuf {
        self.inner.state.lock().target_path.clone()
    }

    /// Token for persisting the watched location, if one is held
    pub fn location_token(&self) -> Option<LocationToken> {
        self.inner.state.lock().location_token.clone()
    }
}

impl Drop for FileMonitor {
    fn drop(&mut self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);

        let (handle, timer) = {
            let mut state = self.inner.state.lock();
            (state.handle.take(), state.pause.take_timer())
        };

        if let Some(timer) = timer {
            timer.cancel();
        }
        if let Some(handle) = handle {
            debug!("Closing watch on drop (generation {})", handle.generation);
            handle.close();
        }
    }
}

/// Open descriptor and the live event source registered for it
struct ActiveHandle {
    generation: u64,
    descriptor: WatchDescriptor,
    source: Arc<dyn EventSource>,
}

impl ActiveHandle {
    /// Cancel the source, then close the descriptor
    fn close(self) {
        self.source.cancel();
        drop(self.descriptor);
    }
}

struct MonitorState {
    target_path: PathBuf,
    location_token: Option<LocationToken>,
    handle: Option<ActiveHandle>,
    pause: PauseState,
}

struct Shared {
    env: Environment,
    config: MonitorConfig,
    callback: ChangeCallback,
    on_error: Option<ErrorHandler>,
    state: Mutex<MonitorState>,
    /// Serializes event handling; always taken before `state`
    dispatch: Mutex<()>,
    next_generation: AtomicU64,
    shut_down: AtomicBool,
}

/// Work left over from a locked section, done once the lock is released
#[derive(Default)]
struct Deferred {
    errors: Vec<MonitorError>,
    cancel: Option<Arc<dyn EventSource>>,
}

/// Where a renamed file was found
enum Relocated {
    /// Through the location token
    ByToken(PathBuf),
    /// Through the open descriptor; no token is derived for the new path
    ByDescriptor(PathBuf),
}

impl Relocated {
    fn path(&self) -> &Path {
        match self {
            Relocated::ByToken(path) | Relocated::ByDescriptor(path) => path,
        }
    }
}

impl Shared {
    fn report(&self, err: &MonitorError) {
        if let Some(handler) = &self.on_error {
            handler(err);
        }
    }

    fn start(self: &Arc<Self>) -> Result<(), MonitorError> {
        self.start_with(true)
    }

    /// Open and register a new handle; `derive_token` fills in a missing token
    fn start_with(self: &Arc<Self>, derive_token: bool) -> Result<(), MonitorError> {
        if self.shut_down.load(Ordering::SeqCst) {
            debug!("Monitor dropped, not starting");
            return Ok(());
        }

        let mut deferred = Deferred::default();
        let result = {
            let mut state = self.state.lock();
            self.establish(&mut state, derive_token, &mut deferred)
        };

        // The error handler and the source may call back into the monitor
        if let Some(source) = deferred.cancel {
            source.cancel();
        }
        for err in &deferred.errors {
            self.report(err);
        }
        result
    }

    fn establish(
        self: &Arc<Self>,
        state: &mut MonitorState,
        derive_token: bool,
        deferred: &mut Deferred,
    ) -> Result<(), MonitorError> {
        // A stopped handle whose cancel has not been processed yet; its
        // source is already cancelled, so closing only drops the descriptor
        if state
            .handle
            .as_ref()
            .map_or(false, |handle| handle.source.is_cancelled())
        {
            if let Some(stale) = state.handle.take() {
                drop(stale.descriptor);
            }
        }

        if state.handle.is_some() {
            let err = MonitorError::AlreadyMonitoring {
                path: state.target_path.clone(),
            };
            error!("{}", err);
            return Err(err);
        }

        let path = state.target_path.clone();
        let descriptor = {
            let _scope = ScopeGuard::acquire(self.env.scope.clone(), &path).ok_or_else(|| {
                let err = MonitorError::ScopeAccessDenied { path: path.clone() };
                error!("{}", err);
                err
            })?;

            let descriptor = self.env.descriptors.open(&path).map_err(|source| {
                let err = MonitorError::OpenFailed {
                    path: path.clone(),
                    source,
                };
                warn!("{}", err);
                err
            })?;

            if state.location_token.is_none() && derive_token {
                match self.env.tokens.create_token(&path) {
                    Ok(token) => state.location_token = Some(token),
                    Err(source) => {
                        let err = MonitorError::TokenCreationFailed {
                            path: path.clone(),
                            source,
                        };
                        warn!("{}", err);
                        deferred.errors.push(err);
                    }
                }
            }

            descriptor
        };

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let source = self
            .env
            .notifier
            .watch(&descriptor, EventMask::monitored(), self.env.worker.clone())
            .map_err(|e| {
                error!("{}", e);
                e
            })?;

        let weak: Weak<Shared> = Arc::downgrade(self);
        source.set_event_handler(Arc::new(move |mask| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_event(generation, mask);
            }
        }));

        let weak: Weak<Shared> = Arc::downgrade(self);
        source.set_cancel_handler(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.teardown(generation);
            }
        }));

        if let Err(e) = source.resume() {
            error!("{}", e);
            deferred.cancel = Some(source);
            return Err(e);
        }

        info!("Monitoring {} (generation {})", path.display(), generation);
        state.handle = Some(ActiveHandle {
            generation,
            descriptor,
            source,
        });
        Ok(())
    }

    fn stop(&self) {
        let source = {
            let mut state = self.state.lock();
            state.location_token = None;
            state.pause.discard_missed();
            state.handle.as_ref().map(|handle| handle.source.clone())
        };

        match source {
            Some(source) => {
                debug!("Stopping monitor");
                source.cancel();
            }
            None => debug!("Stop requested with no active watch"),
        }
    }

    fn pause(self: &Arc<Self>, duration: Duration) {
        let generation = self.state.lock().pause.begin();
        debug!("Pausing monitor for {:?}", duration);

        let weak: Weak<Shared> = Arc::downgrade(self);
        let timer = self.env.worker.execute_after(
            duration,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.unpause(generation);
                }
            }),
        );

        self.state.lock().pause.arm(generation, timer);
    }

    fn unpause(self: &Arc<Self>, generation: u64) {
        let _serial = self.dispatch.lock();

        let missed = {
            let mut state = self.state.lock();
            let Some(missed) = state.pause.expire(generation) else {
                return;
            };
            debug!("Pause lapsed");

            let live = state
                .handle
                .as_ref()
                .map_or(false, |handle| !handle.source.is_cancelled());
            if !live {
                return;
            }
            missed
        };

        if missed.is_structural() && !self.shut_down.load(Ordering::SeqCst) {
            info!("Catching up on {:?} missed while paused", missed);
            self.react(missed);
        }
    }

    /// Cancel handler: drop the handle of `generation` if still installed
    fn teardown(&self, generation: u64) {
        let handle = {
            let mut state = self.state.lock();
            match &state.handle {
                Some(handle) if handle.generation == generation => state.handle.take(),
                _ => None,
            }
        };

        match handle {
            Some(handle) => {
                handle.close();
                debug!("Watch torn down (generation {})", generation);
            }
            None => trace!("Teardown for generation {} already done", generation),
        }
    }

    fn handle_event(self: &Arc<Self>, generation: u64, mask: EventMask) {
        let _serial = self.dispatch.lock();

        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }

        {
            let mut state = self.state.lock();
            match &state.handle {
                Some(handle) if handle.generation == generation && !handle.source.is_cancelled() => {}
                _ => {
                    trace!("Ignoring {:?} from superseded generation {}", mask, generation);
                    return;
                }
            }

            if state.pause.is_paused() {
                debug!("Paused, dropping {:?}", mask);
                state.pause.record_missed(mask);
                return;
            }
        }

        debug!("Received {:?}", mask);
        self.react(mask);
        (self.callback)();
    }

    /// Structural part of event handling: relocate or re-arm as needed
    fn react(self: &Arc<Self>, mask: EventMask) {
        if mask.contains(EventMask::RENAME) {
            let mut deferred = Vec::new();
            let (relocated, old) = {
                let mut state = self.state.lock();
                let relocated = self.relocate(&mut state, &mut deferred);
                let old = state.handle.take();
                if let Ok(found) = &relocated {
                    if found.path() != state.target_path {
                        info!(
                            "{} moved to {}",
                            state.target_path.display(),
                            found.path().display()
                        );
                    }
                    state.target_path = found.path().to_path_buf();
                }
                (relocated, old)
            };

            for err in &deferred {
                self.report(err);
            }
            if let Some(old) = old {
                old.close();
            }

            match relocated {
                Ok(Relocated::ByToken(_)) => self.restart(true),
                Ok(Relocated::ByDescriptor(_)) => self.restart(false),
                Err(e) => {
                    error!("Could not follow renamed file, monitor is dormant: {}", e);
                    self.report(&e);
                }
            }
        } else if mask.intersects(EventMask::DELETE | EventMask::LINK) {
            let old = self.state.lock().handle.take();
            if let Some(old) = old {
                old.close();
            }
            self.restart(true);
        }
    }

    fn restart(self: &Arc<Self>, derive_token: bool) {
        if let Err(e) = self.start_with(derive_token) {
            warn!("Restart failed, monitor is dormant: {}", e);
            self.report(&e);
        }
    }

    /// Find where the file lives now
    ///
    /// Prefers the location token, refreshing it when stale; a failed
    /// refresh keeps the stale token and lands in `deferred`. Without a
    /// token, falls back to asking the OS for the open descriptor's path;
    /// scoped access to that path may not be available.
    fn relocate(
        &self,
        state: &mut MonitorState,
        deferred: &mut Vec<MonitorError>,
    ) -> Result<Relocated, MonitorError> {
        if let Some(token) = state.location_token.clone() {
            let resolved = self
                .env
                .tokens
                .resolve(&token)
                .map_err(MonitorError::TokenResolutionFailed)?;

            if resolved.is_stale {
                info!("Location token was stale, creating a new one");
                match self.env.tokens.create_token(&resolved.path) {
                    Ok(fresh) => state.location_token = Some(fresh),
                    Err(source) => {
                        let err = MonitorError::TokenCreationFailed {
                            path: resolved.path.clone(),
                            source,
                        };
                        warn!("Keeping stale token: {}", err);
                        deferred.push(err);
                    }
                }
            }

            return Ok(Relocated::ByToken(resolved.path));
        }

        warn!("File was renamed but no location token is held, asking the OS for its path");
        let handle = state.handle.as_ref().ok_or_else(|| {
            MonitorError::PathLookupFailed(io::Error::new(
                io::ErrorKind::NotFound,
                "no open descriptor to look up",
            ))
        })?;

        self.env
            .descriptors
            .path_of(&handle.descriptor)
            .map(Relocated::ByDescriptor)
            .map_err(MonitorError::PathLookupFailed)
    }
}

//! Event notifier backed by the `notify` crate
//!
//! `notify` watches paths rather than descriptors, so the backend looks up
//! the descriptor's current path at registration time and keeps a duplicate
//! of the descriptor to tell link-count changes apart from other attribute
//! changes.

use crate::error::MonitorError;
use crate::event::{CancelHandler, EventHandler, EventMask, EventNotifier, EventSource};
use crate::platform::{DescriptorService, EventOnlyOpener, WatchDescriptor};
use crate::worker::WorkerContext;
use notify::event::{DataChange, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::os::fd::AsRawFd;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Map a `notify` event kind onto the monitor's event categories
///
/// Attribute changes map to `LINK`; the source drops that bit again when the
/// link count did not actually change.
pub fn classify(kind: &EventKind) -> EventMask {
    match kind {
        EventKind::Modify(ModifyKind::Data(DataChange::Size)) => EventMask::EXTEND,
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Other) => EventMask::WRITE,
        EventKind::Modify(ModifyKind::Name(_)) => EventMask::RENAME,
        EventKind::Modify(ModifyKind::Metadata(_)) => EventMask::LINK,
        EventKind::Remove(_) => EventMask::DELETE,
        _ => EventMask::empty(),
    }
}

/// [`EventNotifier`] using the platform's recommended `notify` watcher
pub struct NotifyBackend {
    descriptors: Arc<dyn DescriptorService>,
}

impl NotifyBackend {
    pub fn new(descriptors: Arc<dyn DescriptorService>) -> Self {
        Self { descriptors }
    }
}

impl Default for NotifyBackend {
    fn default() -> Self {
        Self::new(Arc::new(EventOnlyOpener))
    }
}

impl EventNotifier for NotifyBackend {
    fn watch(
        &self,
        descriptor: &WatchDescriptor,
        events: EventMask,
        worker: Arc<dyn WorkerContext>,
    ) -> Result<Arc<dyn EventSource>, MonitorError> {
        let fd_label = || PathBuf::from(format!("<fd {}>", descriptor.as_raw_fd()));

        let path = self
            .descriptors
            .path_of(descriptor)
            .map_err(|e| MonitorError::RegistrationFailed {
                path: fd_label(),
                reason: format!("path lookup failed: {}", e),
            })?;

        let pinned = descriptor
            .try_clone()
            .map_err(|e| MonitorError::RegistrationFailed {
                path: path.clone(),
                reason: format!("descriptor dup failed: {}", e),
            })?;
        let links = pinned.metadata().map(|m| m.nlink()).unwrap_or(0);

        debug!("Registering {} for {:?}", path.display(), events);

        Ok(Arc::new(NotifySource {
            path,
            events,
            worker,
            shared: Arc::new(SourceShared {
                cancelled: AtomicBool::new(false),
                handler: Mutex::new(None),
                cancel_handler: Mutex::new(None),
                descriptor: Mutex::new(Some(pinned)),
                links: AtomicU64::new(links),
            }),
            watcher: Mutex::new(None),
        }))
    }
}

/// State reachable from the `notify` callback thread
struct SourceShared {
    cancelled: AtomicBool,
    handler: Mutex<Option<EventHandler>>,
    cancel_handler: Mutex<Option<CancelHandler>>,
    descriptor: Mutex<Option<WatchDescriptor>>,
    links: AtomicU64,
}

impl SourceShared {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Keep `LINK` only when the link count really moved
    fn confirm_link_change(&self, mask: EventMask) -> EventMask {
        if !mask.contains(EventMask::LINK) {
            return mask;
        }

        let current = self
            .descriptor
            .lock()
            .as_ref()
            .and_then(|d| d.metadata().ok())
            .map(|m| m.nlink());

        match current {
            Some(links) if links != self.links.swap(links, Ordering::SeqCst) => mask,
            _ => mask - EventMask::LINK,
        }
    }
}

/// One registration with the `notify` watcher
pub struct NotifySource {
    path: PathBuf,
    events: EventMask,
    worker: Arc<dyn WorkerContext>,
    shared: Arc<SourceShared>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl EventSource for NotifySource {
    fn set_event_handler(&self, handler: EventHandler) {
        *self.shared.handler.lock() = Some(handler);
    }

    fn set_cancel_handler(&self, handler: CancelHandler) {
        if self.shared.is_cancelled() {
            self.worker.execute(handler);
            return;
        }
        *self.shared.cancel_handler.lock() = Some(handler);
    }

    fn resume(&self) -> Result<(), MonitorError> {
        let registration_failed = |reason: String| MonitorError::RegistrationFailed {
            path: self.path.clone(),
            reason,
        };

        if self.shared.is_cancelled() {
            return Err(registration_failed("source already cancelled".to_string()));
        }

        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return Ok(());
        }

        let shared = self.shared.clone();
        let worker = self.worker.clone();
        let events = self.events;

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("Notification error: {}", e);
                    return;
                }
            };

            if shared.is_cancelled() {
                return;
            }

            let mask = shared.confirm_link_change(classify(&event.kind) & events);
            if mask.is_empty() {
                trace!("Ignoring {:?}", event.kind);
                return;
            }

            let Some(handler) = shared.handler.lock().clone() else {
                return;
            };

            let delivery = shared.clone();
            worker.execute(Box::new(move || {
                if !delivery.is_cancelled() {
                    handler(mask);
                }
            }));
        })
        .map_err(|e| registration_failed(e.to_string()))?;

        watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(|e| registration_failed(e.to_string()))?;

        *slot = Some(watcher);
        Ok(())
    }

    fn cancel(&self) {
        if self.shared.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("Cancelling event source for {}", self.path.display());
        self.watcher.lock().take();
        self.shared.descriptor.lock().take();
        self.shared.handler.lock().take();

        let cancel_handler = self.shared.cancel_handler.lock().take();
        if let Some(handler) = cancel_handler {
            self.worker.execute(handler);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }
}

impl Drop for NotifySource {
    fn drop(&mut self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
    }
}

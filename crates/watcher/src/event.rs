//! Event kinds and the event-source seam
//!
//! An [`EventNotifier`] turns an open [`WatchDescriptor`] into an
//! [`EventSource`] that reports [`EventMask`] batches on a worker context.
//! The monitor only ever talks to these traits, so the notification
//! primitive can be swapped (the `notify` backend in production, a scripted
//! source in tests).

use crate::error::MonitorError;
use crate::platform::WatchDescriptor;
use crate::worker::WorkerContext;
use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    /// Set of change categories reported for a single delivery
    ///
    /// Bit values follow the BSD `NOTE_*` vnode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u32 {
        /// The file was unlinked
        const DELETE = 0x0001;
        /// The file contents were written
        const WRITE = 0x0002;
        /// The file was extended or truncated
        const EXTEND = 0x0004;
        /// The hard-link count changed
        const LINK = 0x0010;
        /// The file was renamed or moved
        const RENAME = 0x0020;
    }
}

impl EventMask {
    /// Events the monitor registers for
    pub fn monitored() -> Self {
        EventMask::EXTEND | EventMask::WRITE | EventMask::DELETE | EventMask::LINK | EventMask::RENAME
    }

    /// Events that change which inode the path refers to
    pub fn is_structural(&self) -> bool {
        self.intersects(EventMask::DELETE | EventMask::LINK | EventMask::RENAME)
    }
}

/// Handler invoked with each delivered event batch
pub type EventHandler = Arc<dyn Fn(EventMask) + Send + Sync>;

/// Handler invoked once when an event source is cancelled
pub type CancelHandler = Box<dyn FnOnce() + Send>;

/// A registered, cancellable stream of events for one descriptor
///
/// Handlers run on the worker context the source was created with, never on
/// the caller of `resume` or `cancel` directly (unless the worker itself is
/// synchronous).
pub trait EventSource: Send + Sync {
    /// Install the handler for event batches
    fn set_event_handler(&self, handler: EventHandler);

    /// Install the handler run after cancellation
    fn set_cancel_handler(&self, handler: CancelHandler);

    /// Activate delivery
    fn resume(&self) -> Result<(), MonitorError>;

    /// Stop delivery and schedule the cancel handler
    ///
    /// Idempotent: the cancel handler runs at most once.
    fn cancel(&self);

    /// Whether `cancel` has been called
    fn is_cancelled(&self) -> bool;
}

/// Factory for event sources
pub trait EventNotifier: Send + Sync {
    /// Register `descriptor` for `events`, delivering on `worker`
    ///
    /// The returned source is inactive until [`EventSource::resume`].
    fn watch(
        &self,
        descriptor: &WatchDescriptor,
        events: EventMask,
        worker: Arc<dyn WorkerContext>,
    ) -> Result<Arc<dyn EventSource>, MonitorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitored_covers_all_kinds() {
        let all = EventMask::monitored();
        assert!(all.contains(EventMask::WRITE));
        assert!(all.contains(EventMask::EXTEND));
        assert!(all.contains(EventMask::DELETE));
        assert!(all.contains(EventMask::LINK));
        assert!(all.contains(EventMask::RENAME));
    }

    #[test]
    fn test_structural_events() {
        assert!(!EventMask::WRITE.is_structural());
        assert!(!(EventMask::WRITE | EventMask::EXTEND).is_structural());
        assert!(EventMask::DELETE.is_structural());
        assert!(EventMask::LINK.is_structural());
        assert!((EventMask::WRITE | EventMask::RENAME).is_structural());
    }
}

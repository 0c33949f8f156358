//! Single-file change monitoring
//!
//! This crate provides a watch controller for one file with:
//! - Event-only descriptors and a `notify`-backed event source
//! - Re-arming after delete/replace (atomic saves)
//! - Rename tracking through location tokens, or descriptor path lookup
//! - Pausing, so a writer does not see its own writes
//! - Scoped-access hooks for sandboxed paths

pub mod backend;
pub mod config;
mod debounce;
pub mod error;
pub mod event;
pub mod monitor;
pub mod platform;
pub mod scope;
pub mod token;
pub mod worker;

// Re-exports
pub use backend::NotifyBackend;
pub use config::MonitorConfig;
pub use error::{MonitorError, TokenError};
pub use event::{CancelHandler, EventHandler, EventMask, EventNotifier, EventSource};
pub use monitor::{ChangeCallback, Environment, ErrorHandler, FileMonitor, MonitorBuilder, MonitorStatus};
pub use platform::{DescriptorService, EventOnlyOpener, WatchDescriptor};
pub use scope::{ScopeAccess, ScopeGuard, Unrestricted};
pub use token::{InodeTokenService, LocationToken, ResolvedToken, TokenService};
pub use worker::{CancelToken, Job, ScheduledTask, TokioWorker, WorkerContext};

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

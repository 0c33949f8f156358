//! Error types for the file monitor

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by [`FileMonitor`](crate::FileMonitor)
///
/// None of these are fatal: the monitor either keeps its current handle or
/// falls back to the dormant state, and the caller may retry with `start()`.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// `start()` was called while a handle is already open
    #[error("already monitoring {}", path.display())]
    AlreadyMonitoring { path: PathBuf },

    /// Scoped access to the path could not be acquired
    #[error("scoped access denied for {}", path.display())]
    ScopeAccessDenied { path: PathBuf },

    /// The event-only descriptor could not be opened
    #[error("failed to open {} for monitoring: {source}", path.display())]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The descriptor could not be registered with the notifier
    #[error("failed to register event source for {}: {reason}", path.display())]
    RegistrationFailed { path: PathBuf, reason: String },

    /// The location token could not be resolved after a rename
    #[error("failed to resolve location token: {0}")]
    TokenResolutionFailed(#[source] TokenError),

    /// The descriptor's current path could not be looked up after a rename
    #[error("failed to look up current path of renamed file: {0}")]
    PathLookupFailed(#[source] io::Error),

    /// A location token could not be created for the path
    #[error("failed to create location token for {}: {source}", path.display())]
    TokenCreationFailed {
        path: PathBuf,
        #[source]
        source: TokenError,
    },

    /// The default worker context could not be spawned
    #[error("failed to spawn worker context: {0}")]
    WorkerUnavailable(#[source] io::Error),
}

impl MonitorError {
    /// True when the failure means the watched file no longer exists
    pub fn is_not_found(&self) -> bool {
        match self {
            MonitorError::OpenFailed { source, .. } => source.kind() == io::ErrorKind::NotFound,
            MonitorError::PathLookupFailed(source) => source.kind() == io::ErrorKind::NotFound,
            MonitorError::TokenResolutionFailed(TokenError::NotFound { .. }) => true,
            _ => false,
        }
    }
}

/// Errors produced by a [`TokenService`](crate::TokenService)
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token bytes could not be decoded
    #[error("malformed location token: {0}")]
    Malformed(#[from] bincode::Error),

    /// The file the token refers to could not be found anywhere
    #[error("no file matching the token was found near {}", last_known.display())]
    NotFound { last_known: PathBuf },

    /// Filesystem error while creating or resolving a token
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Service-specific failure
    #[error("{0}")]
    Other(String),
}

//! Platform-specific descriptor handling
//!
//! Provides event-only descriptors (no read/write capability, only change
//! notification) and lookup of a descriptor's current path:
//! - Linux: `O_PATH` descriptors, path via `/proc/self/fd`
//! - macOS: `O_EVTONLY` descriptors, path via `fcntl(F_GETPATH)`

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "linux")]
pub mod linux;

use std::fs::{File, Metadata};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

/// An open event-only descriptor
///
/// Closed when dropped.
#[derive(Debug)]
pub struct WatchDescriptor {
    file: File,
}

impl WatchDescriptor {
    pub fn from_owned(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
        }
    }

    /// Duplicate the descriptor
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
        })
    }

    /// Stat the open file, independent of its current name
    pub fn metadata(&self) -> io::Result<Metadata> {
        self.file.metadata()
    }
}

impl AsFd for WatchDescriptor {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for WatchDescriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Opens descriptors and maps them back to paths
pub trait DescriptorService: Send + Sync {
    /// Open `path` for change notification only
    fn open(&self, path: &Path) -> io::Result<WatchDescriptor>;

    /// Current canonical path of an open descriptor
    fn path_of(&self, descriptor: &WatchDescriptor) -> io::Result<PathBuf>;
}

/// Descriptor service for the host platform
#[derive(Debug, Default, Clone, Copy)]
pub struct EventOnlyOpener;

impl DescriptorService for EventOnlyOpener {
    fn open(&self, path: &Path) -> io::Result<WatchDescriptor> {
        open_event_only(path).map(WatchDescriptor::from_owned)
    }

    fn path_of(&self, descriptor: &WatchDescriptor) -> io::Result<PathBuf> {
        descriptor_path(descriptor.as_raw_fd())
    }
}

#[cfg(target_os = "linux")]
use linux::{descriptor_path, open_event_only};

#[cfg(target_os = "macos")]
use macos::{descriptor_path, open_event_only};

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn open_event_only(_path: &Path) -> io::Result<OwnedFd> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "event-only descriptors are only supported on macOS and Linux",
    ))
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn descriptor_path(_fd: RawFd) -> io::Result<PathBuf> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "descriptor path lookup is only supported on macOS and Linux",
    ))
}

//! Linux descriptor support
//!
//! `O_PATH` descriptors carry no read/write capability; they only pin the
//! inode so it can be watched and stat'ed.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::{OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

/// Suffix the kernel appends to `/proc/self/fd` links of unlinked files
const DELETED_SUFFIX: &str = " (deleted)";

/// Open `path` as an `O_PATH` descriptor
pub fn open_event_only(path: &std::path::Path) -> io::Result<OwnedFd> {
    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_PATH | libc::O_CLOEXEC)
        .open(path)?;
    Ok(OwnedFd::from(file))
}

/// Resolve the current path of `fd` through procfs
pub fn descriptor_path(fd: RawFd) -> io::Result<PathBuf> {
    let link = std::fs::read_link(format!("/proc/self/fd/{}", fd))?;

    if link.to_string_lossy().ends_with(DELETED_SUFFIX) {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("file behind descriptor {} was deleted", fd),
        ));
    }

    Ok(link)
}

//! Scoped access to paths outside the default permission boundary
//!
//! Sandboxed environments require an explicit begin/end pair around any
//! operation on such a path. The monitor only needs access while opening the
//! descriptor; the descriptor stays valid after access ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// Begin/end access pair for a path
pub trait ScopeAccess: Send + Sync {
    /// Acquire access, returning false when it is denied
    fn begin_access(&self, path: &Path) -> bool;

    /// Release access acquired with `begin_access`
    fn end_access(&self, path: &Path);
}

/// Scope access for unsandboxed processes: always granted
#[derive(Debug, Default, Clone, Copy)]
pub struct Unrestricted;

impl ScopeAccess for Unrestricted {
    fn begin_access(&self, _path: &Path) -> bool {
        true
    }

    fn end_access(&self, _path: &Path) {}
}

/// Held scoped access, released on drop
pub struct ScopeGuard {
    scope: Arc<dyn ScopeAccess>,
    path: PathBuf,
}

impl ScopeGuard {
    /// Begin access to `path`, or `None` when denied
    pub fn acquire(scope: Arc<dyn ScopeAccess>, path: &Path) -> Option<Self> {
        if !scope.begin_access(path) {
            return None;
        }

        trace!("Scoped access acquired for {}", path.display());
        Some(Self {
            scope,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.scope.end_access(&self.path);
        trace!("Scoped access released for {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingScope {
        deny: AtomicBool,
        begun: AtomicUsize,
        ended: AtomicUsize,
    }

    impl ScopeAccess for CountingScope {
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

    #[test]
    fn test_guard_releases_on_drop() {
        let scope = Arc::new(CountingScope::default());
        let guard = ScopeGuard::acquire(scope.clone(), Path::new("/tmp/file")).unwrap();
        assert_eq!(scope.begun.load(Ordering::SeqCst), 1);
        assert_eq!(scope.ended.load(Ordering::SeqCst), 0);

        drop(guard);
        assert_eq!(scope.ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_denied_access_is_never_released() {
        let scope = Arc::new(CountingScope::default());
        scope.deny.store(true, Ordering::SeqCst);

        assert!(ScopeGuard::acquire(scope.clone(), Path::new("/tmp/file")).is_none());
        assert_eq!(scope.ended.load(Ordering::SeqCst), 0);
    }
}

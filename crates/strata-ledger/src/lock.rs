use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread::{self, ThreadId};

use fs2::FileExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult};

/// Name of the lock file inside the ledger's base directory.
pub const LOCK_FILE_NAME: &str = "file.lock";

struct Held {
    file: File,
    owner: ThreadId,
    depth: usize,
}

/// Single-writer lock over a ledger directory.
///
/// Holds an exclusive, non-blocking OS file lock on `file.lock`. Acquiring
/// again from the owning thread nests; any other thread or process is
/// refused immediately with [`LedgerError::Locked`].
pub struct LockCoordinator {
    path: PathBuf,
    state: Mutex<Option<Held>>,
}

impl LockCoordinator {
    pub fn new(base_directory: &Path) -> Self {
        Self {
            path: base_directory.join(LOCK_FILE_NAME),
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock, or nest into it if this thread already holds it.
    pub fn acquire(&self) -> LedgerResult<LockGuard<'_>> {
        let current = thread::current().id();
        let mut state = self.state.lock();
        if let Some(held) = state.as_mut() {
            if held.owner == current {
                held.depth += 1;
                return Ok(LockGuard { coordinator: self });
            }
            debug!(path = %self.path.display(), "lock held by another thread");
            return Err(LedgerError::Locked);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)?;
        if let Err(err) = file.try_lock_exclusive() {
            if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                warn!(path = %self.path.display(), "ledger is locked by another writer");
                return Err(LedgerError::Locked);
            }
            return Err(err.into());
        }
        debug!(path = %self.path.display(), "lock acquired");
        *state = Some(Held {
            file,
            owner: current,
            depth: 1,
        });
        Ok(LockGuard { coordinator: self })
    }

    /// Whether the calling thread holds the lock.
    pub fn is_held(&self) -> bool {
        let current = thread::current().id();
        self.state
            .lock()
            .as_ref()
            .is_some_and(|held| held.owner == current)
    }

    /// Fails with [`LedgerError::InternalConsistency`] unless the calling
    /// thread holds the lock.
    pub fn ensure_held(&self) -> LedgerResult<()> {
        if self.is_held() {
            Ok(())
        } else {
            Err(LedgerError::InternalConsistency(
                "mutating ledger storage without holding the write lock".into(),
            ))
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        let Some(held) = state.as_mut() else {
            return;
        };
        held.depth -= 1;
        if held.depth > 0 {
            return;
        }
        if let Some(held) = state.take() {
            if let Err(err) = FileExt::unlock(&held.file) {
                warn!(path = %self.path.display(), %err, "failed to unlock");
            }
            debug!(path = %self.path.display(), "lock released");
        }
    }
}

/// Releases one level of the lock when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    coordinator: &'a LockCoordinator,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn nests_within_one_thread() {
        let dir = tempfile::tempdir().unwrap();
        let lock = LockCoordinator::new(dir.path());
        assert!(!lock.is_held());
        let outer = lock.acquire().unwrap();
        let inner = lock.acquire().unwrap();
        drop(inner);
        assert!(lock.is_held());
        drop(outer);
        assert!(!lock.is_held());
        assert!(lock.path().is_file());
    }

    #[test]
    fn other_thread_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let lock = Arc::new(LockCoordinator::new(dir.path()));
        let _guard = lock.acquire().unwrap();
        let other = Arc::clone(&lock);
        let result = thread::spawn(move || other.acquire().map(|_| ()))
            .join()
            .unwrap();
        assert!(matches!(result, Err(LedgerError::Locked)));
    }

    #[test]
    fn second_coordinator_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let first = LockCoordinator::new(dir.path());
        let second = LockCoordinator::new(dir.path());
        let guard = first.acquire().unwrap();
        assert!(matches!(second.acquire(), Err(LedgerError::Locked)));
        drop(guard);
        assert!(second.acquire().is_ok());
    }

    #[test]
    fn ensure_held_without_lock_is_a_bug() {
        let dir = tempfile::tempdir().unwrap();
        let lock = LockCoordinator::new(dir.path());
        assert!(matches!(
            lock.ensure_held(),
            Err(LedgerError::InternalConsistency(_))
        ));
        let _guard = lock.acquire().unwrap();
        assert!(lock.ensure_held().is_ok());
    }
}

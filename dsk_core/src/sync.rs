//! Re-entrant lock with a visible hold depth.
//!
//! A PV's subscriber and replication sets are traversed while a push is
//! delivered, and a subscriber's side effects may push the same PV again on
//! the same thread. [`ReentrantLock`] lets that nested push proceed, and its
//! guard reports how deeply the current thread holds the lock so that only
//! the outermost holder applies queued removals.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Re-entrant mutex plus hold-depth counter.
///
/// Only the owning thread touches the counter while it holds the mutex, so
/// the depth seen through a guard is exact for that thread.
#[derive(Debug, Default)]
pub struct ReentrantLock<T> {
    inner: ReentrantMutex<T>,
    depth: AtomicUsize,
}

/// Guard returned by [`ReentrantLock::lock`].
pub struct DepthGuard<'a, T> {
    guard: ReentrantMutexGuard<'a, T>,
    depth: &'a AtomicUsize,
    level: usize,
}

impl<T> ReentrantLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: ReentrantMutex::new(value),
            depth: AtomicUsize::new(0),
        }
    }

    /// Acquire the lock, re-entering if this thread already holds it.
    pub fn lock(&self) -> DepthGuard<'_, T> {
        let guard = self.inner.lock();
        let level = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        DepthGuard {
            guard,
            depth: &self.depth,
            level,
        }
    }
}

impl<T> DepthGuard<'_, T> {
    /// Hold depth of this guard. `1` means outermost holder.
    pub fn depth(&self) -> usize {
        self.level
    }

    pub fn is_outermost(&self) -> bool {
        self.level == 1
    }
}

impl<T> Deref for DepthGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> Drop for DepthGuard<'_, T> {
    fn drop(&mut self) {
        // Runs before `guard` releases the mutex.
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn depth_tracks_nesting() {
        let lock = ReentrantLock::new(5);
        let outer = lock.lock();
        assert_eq!(outer.depth(), 1);
        assert!(outer.is_outermost());
        {
            let inner = lock.lock();
            assert_eq!(inner.depth(), 2);
            assert_eq!(*inner, 5);
        }
        drop(outer);
        assert_eq!(lock.lock().depth(), 1);
    }

    #[test]
    fn other_threads_see_outermost_depth() {
        let lock = Arc::new(ReentrantLock::new(()));
        let held = lock.lock();
        let remote = Arc::clone(&lock);
        let handle = thread::spawn(move || remote.lock().depth());
        drop(held);
        assert_eq!(handle.join().unwrap(), 1);
    }
}

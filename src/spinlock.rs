//! Single-word spin locks.
//!
//! [`RawSpinLock`] is the primitive: one word, two states, no owner
//! identity. Any thread may release a lock it did not acquire; that is a
//! trust contract between callers, not an enforced invariant. A second
//! `acquire` by the current holder deadlocks. There is no fairness
//! guarantee, which is acceptable because every guarded section in this
//! crate is short and bounded.
//!
//! [`SpinLock`] wraps a value behind a [`RawSpinLock`] with an RAII guard.

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

const FREE: bool = false;
const BUSY: bool = true;

/// A non-reentrant, unfair, single-word mutual-exclusion primitive.
#[derive(Debug, Default)]
pub struct RawSpinLock {
    word: AtomicBool,
}

impl RawSpinLock {
    /// Creates the lock in the Free state.
    pub const fn new() -> Self {
        Self {
            word: AtomicBool::new(FREE),
        }
    }

    /// Spins until the lock transitions from Free to Busy for this caller.
    pub fn acquire(&self) {
        while self
            .word
            .compare_exchange(FREE, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // "pause" hints a hosting hypervisor that this vCPU is spinning.
            spin_loop();
        }
    }

    /// Single Free-to-Busy attempt; `true` if the lock is now held.
    pub fn try_acquire(&self) -> bool {
        self.word
            .compare_exchange(FREE, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Unconditionally stores Free. The caller is trusted to hold the lock.
    pub fn release(&self) {
        self.word.store(FREE, Ordering::Release);
    }

    /// Snapshot of the lock word; stale by the time the caller inspects it.
    pub fn is_locked(&self) -> bool {
        self.word.load(Ordering::Relaxed) == BUSY
    }
}

/// A value serialized by a [`RawSpinLock`].
pub struct SpinLock<T> {
    raw: RawSpinLock,
    data: UnsafeCell<T>,
}

// The lock provides the exclusion; the data only needs to be sendable.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            raw: RawSpinLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Spins until the lock is held, then returns an RAII guard.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.raw.acquire();
        SpinLockGuard { lock: self }
    }

    /// Non-blocking variant of [`lock`](Self::lock).
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.raw.try_acquire() {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Consumes the lock, releasing the storage. Finalization is otherwise
    /// a no-op.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("SpinLock").field("data", &*guard).finish(),
            None => f.write_str("SpinLock { <locked> }"),
        }
    }
}

/// Holds the lock until dropped.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}

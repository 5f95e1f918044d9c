//! Wait handles: the structured-join primitive.
//!
//! A wait handle counts outstanding jobs and can carry at most one parked
//! fiber. The lock protects the counter-inspection/parked-fiber/hand-off
//! decision as a unit; on the park path its critical section deliberately
//! spans two fibers (the awaiter locks, the successor fiber unlocks), which
//! is why this uses a raw mutex rather than a scoped guard.

use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;

use crate::fiber::FiberHandle;

/// Largest counter value the scheduler accepts before reporting overflow.
pub(crate) const MAX_PENDING: i64 = 1 << 62;

/// Join primitive: reaches zero exactly once per batch of jobs tagged with
/// it, waking the one fiber parked in [`wait_for`](crate::JobSystem::wait_for)
/// if any.
///
/// Handles are caller-owned and cheap enough to live on a job's stack. A
/// freshly constructed handle is idle; it must outlive every job that
/// references it and any in-progress wait.
pub struct WaitHandle {
    counter: AtomicI64,
    parked: UnsafeCell<Option<FiberHandle>>,
    lock: RawMutex,
}

unsafe impl Send for WaitHandle {}
unsafe impl Sync for WaitHandle {}

impl WaitHandle {
    pub const fn new() -> Self {
        WaitHandle {
            counter: AtomicI64::new(0),
            parked: UnsafeCell::new(None),
            lock: RawMutex::INIT,
        }
    }

    /// Number of submitted-but-unfinished jobs referencing this handle.
    pub fn pending(&self) -> i64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Adds `n`, returning the previous value.
    pub(crate) fn add(&self, n: i64) -> i64 {
        self.counter.fetch_add(n, Ordering::AcqRel)
    }

    /// Subtracts `n`, returning the previous value.
    pub(crate) fn sub(&self, n: i64) -> i64 {
        self.counter.fetch_sub(n, Ordering::AcqRel)
    }

    pub(crate) fn acquire(&self) {
        self.lock.lock();
    }

    /// # Safety
    ///
    /// The lock must be held, by this fiber or on its behalf.
    pub(crate) unsafe fn release(&self) {
        self.lock.unlock();
    }

    pub(crate) fn lock_ptr(&self) -> NonNull<RawMutex> {
        NonNull::from(&self.lock)
    }

    /// # Safety
    ///
    /// The lock must be held.
    pub(crate) unsafe fn park(&self, fiber: FiberHandle) {
        debug_assert!((*self.parked.get()).is_none(), "handle already has a waiter");
        *self.parked.get() = Some(fiber);
    }

    /// # Safety
    ///
    /// The lock must be held.
    pub(crate) unsafe fn take_parked(&self) -> Option<FiberHandle> {
        (*self.parked.get()).take()
    }

    /// # Safety
    ///
    /// The lock must be held.
    pub(crate) unsafe fn clear_parked(&self) {
        *self.parked.get() = None;
    }
}

impl Default for WaitHandle {
    fn default() -> Self {
        WaitHandle::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_handle_is_idle() {
        let handle = WaitHandle::new();
        assert_eq!(handle.pending(), 0);
        assert!(unsafe { (*handle.parked.get()).is_none() });
    }

    #[test]
    fn counter_arithmetic() {
        let handle = WaitHandle::new();
        assert_eq!(handle.add(3), 0);
        assert_eq!(handle.pending(), 3);
        assert_eq!(handle.sub(1), 3);
        assert_eq!(handle.pending(), 2);
        handle.sub(2);
        assert_eq!(handle.pending(), 0);
    }

    #[test]
    fn lock_round_trip() {
        let handle = WaitHandle::new();
        handle.acquire();
        unsafe { handle.release() };
        handle.acquire();
        unsafe { handle.release() };
    }
}

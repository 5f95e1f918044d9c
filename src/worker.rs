//! Worker threads and the fiber main loop.
//!
//! Each worker thread converts itself into a fiber (its "worker fiber", the
//! thread's native stack) and then shuttles between that fiber and pooled job
//! fibers. Three thread-local slots coordinate the hand-offs; all are written
//! only by the thread that owns them:
//!
//! - the worker fiber, resumed whenever a job fiber runs out of work;
//! - the finished fiber, published by whichever fiber just switched away so
//!   the first code running afterwards can return it to the pool;
//! - the pending unlock, a wait-handle lock deposited by a parking fiber that
//!   the next fiber on this thread must release on its behalf.

use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;

use crate::fiber::{self, Fiber, FiberHandle};
use crate::job_system::Shared;
use crate::wait::WaitHandle;

thread_local! {
    static WORKER_FIBER: Cell<Option<FiberHandle>> = const { Cell::new(None) };
    static FINISHED_FIBER: Cell<Option<FiberHandle>> = const { Cell::new(None) };
    static PENDING_UNLOCK: Cell<Option<NonNull<RawMutex>>> = const { Cell::new(None) };
}

/// This thread's worker fiber, if the thread belongs to a scheduler.
pub(crate) fn worker_fiber() -> Option<FiberHandle> {
    WORKER_FIBER.get()
}

pub(crate) fn set_finished(fiber: FiberHandle) {
    FINISHED_FIBER.set(Some(fiber));
}

pub(crate) fn set_pending_unlock(lock: NonNull<RawMutex>) {
    PENDING_UNLOCK.set(Some(lock));
}

pub(crate) fn clear_pending_unlock() {
    PENDING_UNLOCK.set(None);
}

/// Releases a lock left held by a fiber that parked on this thread. Must be
/// the first thing a fiber does after being switched to.
fn drain_pending_unlock() {
    if let Some(lock) = PENDING_UNLOCK.take() {
        unsafe { lock.as_ref().unlock() };
    }
}

/// Returns the most recently suspended fiber on this thread to the pool.
pub(crate) fn reclaim_finished(shared: &Shared) {
    if let Some(fiber) = FINISHED_FIBER.take() {
        if shared.fiber_pool.try_enqueue(fiber).is_err() {
            panic!("fiber pool overflow while returning an idle fiber");
        }
    }
}

/// Body of every worker thread.
///
/// Worker 0 is distinguished: before entering the loop it resumes the main
/// fiber, which is how `init` returns to its caller on a worker thread. This
/// is not observable from outside the scheduler.
pub(crate) fn worker_thread(shared: Arc<Shared>, index: usize) {
    if let Some(core) = shared.core_for(index) {
        core_affinity::set_for_current(core);
    }

    let mut worker = Fiber::for_thread();
    let handle = worker.handle();
    fiber::adopt_thread(handle);
    WORKER_FIBER.set(Some(handle));
    tracing::trace!(worker = index, "worker online");

    if index == 0 {
        unsafe { fiber::switch_to(shared.main_fiber) };
        reclaim_finished(&shared);
    }

    worker_loop(&shared);

    WORKER_FIBER.set(None);
    fiber::release_thread();
    tracing::trace!(worker = index, "worker exiting");
}

fn worker_loop(shared: &Shared) {
    loop {
        let shutting_down = shared.shutdown.load(Ordering::Acquire);
        let pending = shared.pending_jobs.load(Ordering::Acquire);
        if shutting_down && pending == 0 {
            break;
        }
        if pending > 0 {
            let Some(next) = shared.fiber_pool.try_dequeue() else {
                tracing::error!("fiber pool exhausted with jobs still pending");
                panic!("fiber pool exhausted: raise SchedulerConfig::fibers");
            };
            unsafe { fiber::switch_to(next) };
            reclaim_finished(shared);
        } else {
            let mut idle = shared.idle_mx.lock();
            if !shared.shutdown.load(Ordering::Acquire)
                && shared.pending_jobs.load(Ordering::Acquire) <= 0
            {
                shared.idle_cv.wait(&mut idle);
            }
        }
    }
}

/// Body of every pooled fiber.
///
/// Every suspension inside this loop resumes by falling through to the top,
/// so the pending-unlock drain runs first no matter which switch the fiber
/// was parked at.
pub(crate) fn fiber_main(arg: *mut (), me: FiberHandle) {
    let shared = unsafe { &*(arg as *const Shared) };
    loop {
        drain_pending_unlock();

        if shared.shutdown.load(Ordering::Acquire) || shared.job_queue.is_empty() {
            set_finished(me);
            let worker = worker_fiber().expect("job fiber hosted off a worker thread");
            unsafe { fiber::switch_to(worker) };
            continue;
        }

        let Some(job) = shared.job_queue.try_dequeue() else {
            continue;
        };
        shared.note_job_started();
        job.invoke();
        shared.count_executed();
        set_finished(me);
        if let Some(handle) = job.wait_handle {
            unsafe { finish_job(shared, handle.as_ref()) };
        }
    }
}

/// Applies a completed job's wait-handle bookkeeping: decrement under the
/// handle lock, and when this was the last outstanding job, hand execution
/// directly to the parked awaiter. The lock is released before the switch on
/// every path.
///
/// # Safety
///
/// `handle` must be the live wait handle the completed job was tagged with.
unsafe fn finish_job(shared: &Shared, handle: &WaitHandle) {
    handle.acquire();
    let remaining = handle.sub(1) - 1;
    debug_assert!(remaining >= 0, "wait handle counter went negative");
    if remaining == 0 {
        if let Some(waiter) = handle.take_parked() {
            handle.release();
            shared.count_wakeup();
            fiber::switch_to(waiter);
            // Resumed later, when a worker or awaiter pulls this fiber back
            // out of the pool; the caller loops back to the unlock drain.
            return;
        }
    }
    handle.release();
}

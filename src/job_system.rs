//! Scheduler lifecycle and the public job-submission API.
//!
//! `init` turns the calling thread into a fiber and hands its continuation to
//! worker 0, so everything after `init` already runs inside the scheduler;
//! `shutdown` reverses the trick and lands back on the original thread. In
//! between, jobs flow through one bounded queue and fibers through one
//! bounded pool, and `wait_for` suspends the calling fiber without ever
//! blocking the worker thread underneath it.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::fiber::{self, Fiber, FiberHandle};
use crate::job::JobDecl;
use crate::ring::RingBuffer;
use crate::wait::{WaitHandle, MAX_PENDING};
use crate::worker;

/// Fibers owned by the scheduler. Handles point at the boxed fibers, so the
/// boxes themselves must never be dropped or replaced while the scheduler
/// runs.
struct FiberArena {
    pool: Vec<Box<Fiber>>,
    main: Option<Box<Fiber>>,
    bootstrap: Option<Box<Fiber>>,
}

/// State shared between the API handle, the worker threads, and every pooled
/// fiber.
pub(crate) struct Shared {
    pub(crate) job_queue: RingBuffer<JobDecl>,
    pub(crate) fiber_pool: RingBuffer<FiberHandle>,
    /// Jobs submitted but not yet started. Modified under `idle_mx`, read
    /// lock-free; exists only to keep idle workers off the condvar when
    /// there is work, not for correctness of job execution.
    pub(crate) pending_jobs: AtomicI64,
    pub(crate) shutdown: AtomicBool,
    pub(crate) idle_mx: Mutex<()>,
    pub(crate) idle_cv: Condvar,
    pub(crate) main_fiber: FiberHandle,
    worker_count: usize,
    core_ids: Vec<core_affinity::CoreId>,
    arena: Mutex<FiberArena>,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: crate::metrics::Metrics,
}

impl Shared {
    /// Marks one queued job as taken, under the idle mutex.
    pub(crate) fn note_job_started(&self) {
        let _idle = self.idle_mx.lock();
        self.pending_jobs.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn core_for(&self, index: usize) -> Option<core_affinity::CoreId> {
        if self.core_ids.is_empty() {
            None
        } else {
            Some(self.core_ids[index % self.core_ids.len()])
        }
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn count_submitted(&self, n: u64) {
        self.metrics.jobs_submitted.fetch_add(n, Ordering::Relaxed);
    }

    #[cfg(not(feature = "metrics"))]
    pub(crate) fn count_submitted(&self, _n: u64) {}

    #[cfg(feature = "metrics")]
    pub(crate) fn count_executed(&self) {
        self.metrics.jobs_executed.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(not(feature = "metrics"))]
    pub(crate) fn count_executed(&self) {}

    #[cfg(feature = "metrics")]
    pub(crate) fn count_wait_immediate(&self) {
        self.metrics.waits_immediate.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(not(feature = "metrics"))]
    pub(crate) fn count_wait_immediate(&self) {}

    #[cfg(feature = "metrics")]
    pub(crate) fn count_wait_parked(&self) {
        self.metrics.waits_parked.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(not(feature = "metrics"))]
    pub(crate) fn count_wait_parked(&self) {}

    #[cfg(feature = "metrics")]
    pub(crate) fn count_wakeup(&self) {
        self.metrics.wakeups.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(not(feature = "metrics"))]
    pub(crate) fn count_wakeup(&self) {}
}

/// A running scheduler instance.
///
/// Created by [`init`](JobSystem::init), torn down by
/// [`shutdown`](JobSystem::shutdown). Dropping the handle without calling
/// `shutdown` leaks the worker threads (they keep the shared state alive and
/// keep waiting for work), and the original thread stays parked inside the
/// scheduler.
pub struct JobSystem {
    shared: Arc<Shared>,
}

impl JobSystem {
    /// Starts a scheduler and absorbs the calling thread into it.
    ///
    /// On return the caller is running on the scheduler's "main fiber",
    /// hosted by one of the newly spawned worker threads; the thread that
    /// invoked `init` has become a plain worker host. All code until
    /// [`shutdown`](JobSystem::shutdown) behaves like a job: it may submit,
    /// wait, and migrate between worker threads at every suspension point.
    /// Jobs are never preempted; a CPU-bound job owns its worker until it
    /// returns or waits.
    pub fn init(config: SchedulerConfig) -> Result<JobSystem, SchedulerError> {
        config.validate()?;
        if fiber::current().is_some() {
            return Err(SchedulerError::InvalidConfig(
                "init called from inside a running scheduler",
            ));
        }
        let worker_count = config.resolve_worker_count();
        let core_ids = if config.pin_workers {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut main = Fiber::for_thread();
        let main_fiber = main.handle();

        let shared = Arc::new(Shared {
            job_queue: RingBuffer::with_capacity(config.job_queue_capacity),
            fiber_pool: RingBuffer::with_capacity(config.fibers),
            pending_jobs: AtomicI64::new(0),
            shutdown: AtomicBool::new(false),
            idle_mx: Mutex::new(()),
            idle_cv: Condvar::new(),
            main_fiber,
            worker_count,
            core_ids,
            arena: Mutex::new(FiberArena {
                pool: Vec::with_capacity(config.fibers),
                main: Some(main),
                bootstrap: None,
            }),
            #[cfg(feature = "metrics")]
            metrics: crate::metrics::Metrics::new(),
        });

        let shared_ptr = Arc::as_ptr(&shared) as *mut ();
        let bootstrap_handle;
        {
            let mut arena = shared.arena.lock();
            for _ in 0..config.fibers {
                let mut f = Fiber::with_entry(config.stack_size, worker::fiber_main, shared_ptr)?;
                let handle = f.handle();
                if shared.fiber_pool.try_enqueue(handle).is_err() {
                    return Err(SchedulerError::InvalidConfig(
                        "fiber pool smaller than fiber count",
                    ));
                }
                arena.pool.push(f);
            }

            let bootstrap_arg = Arc::into_raw(Arc::clone(&shared)) as *mut ();
            let mut bootstrap =
                match Fiber::with_entry(config.stack_size, bootstrap_main, bootstrap_arg) {
                    Ok(fiber) => fiber,
                    Err(err) => {
                        unsafe { drop(Arc::from_raw(bootstrap_arg as *const Shared)) };
                        return Err(err);
                    }
                };
            bootstrap_handle = bootstrap.handle();
            arena.bootstrap = Some(bootstrap);
        }

        tracing::info!(
            workers = worker_count,
            fibers = config.fibers,
            queue = config.job_queue_capacity,
            "scheduler starting"
        );

        fiber::adopt_thread(main_fiber);
        unsafe { fiber::switch_to(bootstrap_handle) };
        // The bootstrap fiber has spawned the workers and worker 0 resumed
        // us: from here on we execute on a worker thread.
        Ok(JobSystem { shared })
    }

    /// Number of worker threads hosting this scheduler.
    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    /// Enqueues one job.
    ///
    /// Increments the job's wait-handle counter before enqueueing and rolls
    /// the increment back if the queue is full, so a failed submit leaves the
    /// handle untouched. A descriptor with no function is a no-op `Ok`.
    /// Notifies one idle worker.
    ///
    /// # Safety
    ///
    /// The storage behind `job.user_data` and the wait handle (if any) must
    /// stay valid until the job has finished and, for the handle, until any
    /// wait on it has returned. The job function must tolerate running on any
    /// worker thread.
    pub unsafe fn submit(&self, job: &JobDecl) -> Result<(), SchedulerError> {
        if job.func.is_none() {
            return Ok(());
        }
        if let Some(handle) = job.wait_handle {
            let handle = handle.as_ref();
            let previous = handle.add(1);
            if previous < 0 || previous >= MAX_PENDING {
                handle.sub(1);
                return Err(SchedulerError::CounterOverflow);
            }
        }
        if self.shared.job_queue.try_enqueue(*job).is_err() {
            if let Some(handle) = job.wait_handle {
                handle.as_ref().sub(1);
            }
            return Err(SchedulerError::QueueFull);
        }
        self.shared.count_submitted(1);
        let _idle = self.shared.idle_mx.lock();
        self.shared.pending_jobs.fetch_add(1, Ordering::AcqRel);
        self.shared.idle_cv.notify_one();
        Ok(())
    }

    /// Enqueues a batch of jobs, all-or-nothing.
    ///
    /// Every job in the batch must reference the same wait handle (or none).
    /// The handle counter is raised by the batch size up front and lowered
    /// again if the queue cannot take the whole batch, so a failed call
    /// leaves the handle untouched. Notifies all idle workers.
    ///
    /// # Safety
    ///
    /// Same per-job contract as [`submit`](JobSystem::submit).
    pub unsafe fn submit_batch(&self, jobs: &[JobDecl]) -> Result<(), SchedulerError> {
        if jobs.is_empty() {
            return Ok(());
        }
        let wait_handle = jobs[0].wait_handle;
        if jobs.iter().any(|job| job.wait_handle != wait_handle) {
            return Err(SchedulerError::MixedWaitHandles);
        }
        let count = jobs.len() as i64;
        if let Some(handle) = wait_handle {
            let handle = handle.as_ref();
            let previous = handle.add(count);
            if previous < 0 || previous + count > MAX_PENDING {
                handle.sub(count);
                return Err(SchedulerError::CounterOverflow);
            }
        }
        if self.shared.job_queue.enqueue_batch(jobs).is_err() {
            if let Some(handle) = wait_handle {
                handle.as_ref().sub(count);
            }
            return Err(SchedulerError::QueueFull);
        }
        self.shared.count_submitted(jobs.len() as u64);
        let _idle = self.shared.idle_mx.lock();
        self.shared.pending_jobs.fetch_add(count, Ordering::AcqRel);
        self.shared.idle_cv.notify_all();
        Ok(())
    }

    /// Suspends the calling fiber until `handle`'s counter reaches zero.
    ///
    /// A handle at zero returns immediately without switching, from any
    /// thread. Otherwise the call must come from a fiber this scheduler is
    /// hosting; the fiber parks on the handle, a fresh fiber takes over the
    /// worker, and the last job to decrement the counter resumes the parked
    /// fiber directly, possibly on a different worker thread. Writes made by
    /// every job tagged with `handle` are visible once this returns.
    ///
    /// At most one fiber may wait on a handle at a time.
    pub fn wait_for(&self, handle: &WaitHandle) -> Result<(), SchedulerError> {
        handle.acquire();
        let outstanding = handle.pending();
        if outstanding == 0 {
            unsafe { handle.release() };
            self.shared.count_wait_immediate();
            return Ok(());
        }
        if outstanding < 0 || outstanding > MAX_PENDING {
            unsafe { handle.release() };
            return Err(SchedulerError::CounterOverflow);
        }
        let me = match fiber::current() {
            Some(current) if worker::worker_fiber().is_some() => current,
            _ => {
                unsafe { handle.release() };
                return Err(SchedulerError::NotOnFiber);
            }
        };

        unsafe {
            handle.park(me);
            // The lock stays held across the switch: releasing it here would
            // let a concurrent decrement observe counter == 0 with no parked
            // fiber and skip the wakeup. The fiber we switch to releases it
            // as its first act on this thread.
            worker::set_pending_unlock(handle.lock_ptr());
            let Some(fresh) = self.shared.fiber_pool.try_dequeue() else {
                handle.clear_parked();
                worker::clear_pending_unlock();
                handle.release();
                return Err(SchedulerError::FiberPoolExhausted);
            };
            self.shared.count_wait_parked();
            fiber::switch_to(fresh);
        }
        // Resumed by the fiber that finished the last job on this handle; it
        // left itself in the finished slot of this (possibly new) thread.
        worker::reclaim_finished(&self.shared);
        Ok(())
    }

    /// Stops the scheduler and gives the original thread back to the caller.
    ///
    /// Must be called on the main fiber, i.e. from the code path that `init`
    /// returned into, and only once all submitted work has completed;
    /// shutting down with jobs still queued is a contract violation and
    /// stalls the scheduler. On success the calling code is back on the
    /// thread that invoked `init`, all workers have been joined, and every
    /// fiber has been reclaimed.
    pub fn shutdown(self) -> Result<(), SchedulerError> {
        if fiber::current() != Some(self.shared.main_fiber) {
            return Err(SchedulerError::NotMainFiber);
        }
        let worker_fiber = match worker::worker_fiber() {
            Some(fiber) => fiber,
            None => return Err(SchedulerError::NotOnFiber),
        };
        tracing::debug!("scheduler shutting down");
        {
            let _idle = self.shared.idle_mx.lock();
            self.shared.shutdown.store(true, Ordering::Release);
            self.shared.idle_cv.notify_all();
        }
        // Leave the finished-fiber slot empty: the main fiber must not be
        // returned to the pool. The worker loop exits, the bootstrap fiber
        // joins every worker and then switches back here, landing us on the
        // thread that originally called init.
        unsafe { fiber::switch_to(worker_fiber) };
        fiber::release_thread();

        debug_assert_eq!(
            self.shared.fiber_pool.len(),
            self.shared.fiber_pool.capacity(),
            "fibers leaked during shutdown"
        );
        tracing::debug!("scheduler stopped");
        Ok(())
    }

    /// Snapshot of the scheduler's counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

/// One-shot entry of the bootstrap fiber: hosts worker spawning and joining
/// on its own stack so the init caller's thread is free to join the workers,
/// then revives the main fiber on that original thread.
fn bootstrap_main(arg: *mut (), _me: FiberHandle) {
    let shared = unsafe { Arc::from_raw(arg as *const Shared) };

    let mut joins = Vec::with_capacity(shared.worker_count);
    for index in 0..shared.worker_count {
        let shared = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name(format!("microfiber-worker-{index}"))
            .spawn(move || worker::worker_thread(shared, index))
            .expect("failed to spawn worker thread");
        joins.push(join);
    }

    for join in joins {
        if join.join().is_err() {
            tracing::error!("worker thread panicked");
        }
    }

    let main_fiber = shared.main_fiber;
    drop(shared);
    unsafe { fiber::switch_to(main_fiber) };
    unreachable!("bootstrap fiber resumed after its final hand-off");
}

//! Boundary behaviour of submit, submit_batch, and wait_for.
//!
//! Most of these pin the scheduler to one worker: that worker hosts the test
//! itself, so submitted jobs sit in the queue untouched until the test
//! yields, which makes queue-full and ordering observations deterministic.

use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use microfiber::{JobDecl, JobSystem, SchedulerConfig, SchedulerError, WaitHandle};

fn bump(data: *mut ()) {
    let counter = unsafe { &*(data as *const AtomicUsize) };
    counter.fetch_add(1, Ordering::SeqCst);
}

fn single_worker_config(queue: usize) -> SchedulerConfig {
    SchedulerConfig::default()
        .with_max_threads(1)
        .with_job_queue_capacity(queue)
        .with_fibers(16)
}

#[test]
fn full_queue_leaves_wait_handle_untouched() {
    let js = JobSystem::init(single_worker_config(4)).expect("init failed");
    assert_eq!(js.worker_count(), 1);

    let handle = WaitHandle::new();
    let ran = AtomicUsize::new(0);
    let job = JobDecl::with_handle(bump, &ran as *const AtomicUsize as *mut (), &handle);

    for _ in 0..4 {
        unsafe { js.submit(&job).expect("submit failed") };
    }
    assert_eq!(handle.pending(), 4);

    assert_eq!(unsafe { js.submit(&job) }, Err(SchedulerError::QueueFull));
    assert_eq!(handle.pending(), 4);

    js.wait_for(&handle).expect("wait failed");
    assert_eq!(ran.load(Ordering::SeqCst), 4);
    js.shutdown().expect("shutdown failed");
}

#[test]
fn batch_is_all_or_nothing() {
    let js = JobSystem::init(single_worker_config(4)).expect("init failed");

    let handle = WaitHandle::new();
    let ran = AtomicUsize::new(0);
    let job = JobDecl::with_handle(bump, &ran as *const AtomicUsize as *mut (), &handle);

    unsafe { js.submit_batch(&[job; 2]).expect("batch submit failed") };
    assert_eq!(handle.pending(), 2);

    // Three more do not fit into the two remaining slots: nothing may land.
    assert_eq!(
        unsafe { js.submit_batch(&[job; 3]) },
        Err(SchedulerError::QueueFull)
    );
    assert_eq!(handle.pending(), 2);

    unsafe { js.submit_batch(&[job; 2]).expect("batch submit failed") };
    js.wait_for(&handle).expect("wait failed");
    assert_eq!(ran.load(Ordering::SeqCst), 4);
    js.shutdown().expect("shutdown failed");
}

#[test]
fn mixed_wait_handles_in_a_batch_are_rejected() {
    let js = JobSystem::init(single_worker_config(16)).expect("init failed");

    let first = WaitHandle::new();
    let second = WaitHandle::new();
    let ran = AtomicUsize::new(0);
    let data = &ran as *const AtomicUsize as *mut ();
    let jobs = [
        JobDecl::with_handle(bump, data, &first),
        JobDecl::with_handle(bump, data, &second),
    ];

    assert_eq!(
        unsafe { js.submit_batch(&jobs) },
        Err(SchedulerError::MixedWaitHandles)
    );
    assert_eq!(first.pending(), 0);
    assert_eq!(second.pending(), 0);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    js.shutdown().expect("shutdown failed");
}

#[test]
fn empty_job_is_a_no_op() {
    let js = JobSystem::init(single_worker_config(16)).expect("init failed");
    unsafe { js.submit(&JobDecl::empty()).expect("submit failed") };
    unsafe { js.submit_batch(&[]).expect("batch submit failed") };
    js.shutdown().expect("shutdown failed");
}

#[test]
fn wait_on_idle_handle_returns_immediately() {
    let js = JobSystem::init(single_worker_config(16)).expect("init failed");
    let handle = WaitHandle::new();
    js.wait_for(&handle).expect("wait failed");
    js.wait_for(&handle).expect("wait failed");
    js.shutdown().expect("shutdown failed");
}

#[test]
fn wait_with_outstanding_jobs_requires_a_fiber() {
    let js = JobSystem::init(single_worker_config(16)).expect("init failed");

    let handle = WaitHandle::new();
    let ran = AtomicUsize::new(0);
    let job = JobDecl::with_handle(bump, &ran as *const AtomicUsize as *mut (), &handle);
    unsafe { js.submit(&job).expect("submit failed") };

    // A plain OS thread outside the scheduler cannot park.
    thread::scope(|scope| {
        scope.spawn(|| {
            assert_eq!(js.wait_for(&handle), Err(SchedulerError::NotOnFiber));
        });
    });

    js.wait_for(&handle).expect("wait failed");
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    js.shutdown().expect("shutdown failed");
}

fn panicking_job(_data: *mut ()) {
    panic!("job body panicked on purpose");
}

#[test]
fn panicking_job_still_completes_its_handle() {
    let js = JobSystem::init(SchedulerConfig::default().with_max_threads(2))
        .expect("init failed");

    let handle = WaitHandle::new();
    let job = JobDecl::with_handle(panicking_job, ptr::null_mut(), &handle);
    unsafe { js.submit(&job).expect("submit failed") };
    js.wait_for(&handle).expect("wait failed");
    assert_eq!(handle.pending(), 0);
    js.shutdown().expect("shutdown failed");
}

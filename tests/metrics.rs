#![cfg(feature = "metrics")]

//! Counter accounting, pinned to one worker so every quantity is exact.

use std::sync::atomic::{AtomicUsize, Ordering};

use microfiber::{JobDecl, JobSystem, SchedulerConfig, WaitHandle};

fn bump(data: *mut ()) {
    let counter = unsafe { &*(data as *const AtomicUsize) };
    counter.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn counters_track_a_fan_out() {
    let js = JobSystem::init(SchedulerConfig::default().with_max_threads(1))
        .expect("init failed");

    let handle = WaitHandle::new();
    let ran = AtomicUsize::new(0);
    let job = JobDecl::with_handle(bump, &ran as *const AtomicUsize as *mut (), &handle);
    let jobs = [job; 8];
    unsafe { js.submit_batch(&jobs).expect("batch submit failed") };

    // With a single worker the jobs cannot start until this fiber parks.
    js.wait_for(&handle).expect("wait failed");
    assert_eq!(ran.load(Ordering::SeqCst), 8);

    let snapshot = js.metrics();
    assert_eq!(snapshot.jobs_submitted, 8);
    assert_eq!(snapshot.jobs_executed, 8);
    assert_eq!(snapshot.waits_parked, 1);
    assert_eq!(snapshot.waits_immediate, 0);
    assert_eq!(snapshot.wakeups, 1);

    js.shutdown().expect("shutdown failed");
}

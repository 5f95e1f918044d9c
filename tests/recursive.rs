//! Recursive submit-and-wait chains, deep enough to park many fibers.

use std::sync::atomic::{AtomicI64, Ordering};

use microfiber::{JobDecl, JobSystem, SchedulerConfig, WaitHandle};

struct Recursion {
    depth: AtomicI64,
    js: *const JobSystem,
}

fn recursive_job(data: *mut ()) {
    let rec = unsafe { &*(data as *const Recursion) };
    let js = unsafe { &*rec.js };

    let remaining = rec.depth.fetch_sub(1, Ordering::SeqCst) - 1;
    if remaining > 0 {
        // Each level joins on its own stack-local handle; the parent handle
        // stays untouched until this job returns.
        let handle = WaitHandle::new();
        let job = JobDecl::with_handle(recursive_job, data, &handle);
        unsafe { js.submit(&job).expect("nested submit failed") };
        js.wait_for(&handle).expect("nested wait failed");
    }
}

fn run_recursion(depth: i64, workers: usize) {
    let js = JobSystem::init(SchedulerConfig::default().with_max_threads(workers))
        .expect("init failed");

    let rec = Recursion {
        depth: AtomicI64::new(depth),
        js: &js,
    };
    let handle = WaitHandle::new();
    let job = JobDecl::with_handle(recursive_job, &rec as *const Recursion as *mut (), &handle);
    unsafe { js.submit(&job).expect("submit failed") };
    js.wait_for(&handle).expect("wait failed");

    assert_eq!(rec.depth.load(Ordering::SeqCst), 0);
    js.shutdown().expect("shutdown failed");
}

#[test]
fn recursion_to_depth_512_on_one_worker() {
    run_recursion(512, 1);
}

#[test]
fn recursion_is_stable_across_worker_counts() {
    for workers in 1..=3 {
        run_recursion(128, workers);
    }
}

#[test]
fn recursion_and_fan_out_cycles_in_one_process() {
    // Two full init/shutdown cycles back to back must behave like fresh runs.
    run_recursion(64, 2);
    run_recursion(64, 2);
}

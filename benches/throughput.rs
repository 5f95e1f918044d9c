//! Fan-out throughput: batches of trivial jobs joined through a wait handle.

use std::sync::atomic::{AtomicU64, Ordering};

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use microfiber::{JobDecl, JobSystem, SchedulerConfig, WaitHandle};

const JOBS_PER_ROUND: usize = 256;

fn count_job(data: *mut ()) {
    let counter = unsafe { &*(data as *const AtomicU64) };
    counter.fetch_add(1, Ordering::Relaxed);
}

fn bench_fan_out(c: &mut Criterion) {
    let js = JobSystem::init(SchedulerConfig::default()).expect("init failed");
    let counter = AtomicU64::new(0);

    let mut group = c.benchmark_group("fan_out");
    group.throughput(Throughput::Elements(JOBS_PER_ROUND as u64));
    group.bench_function("submit_batch_and_wait", |b| {
        b.iter(|| {
            let handle = WaitHandle::new();
            let job =
                JobDecl::with_handle(count_job, &counter as *const AtomicU64 as *mut (), &handle);
            let jobs = [job; JOBS_PER_ROUND];
            unsafe { js.submit_batch(&jobs).expect("batch submit failed") };
            js.wait_for(&handle).expect("wait failed");
        })
    });
    group.finish();

    js.shutdown().expect("shutdown failed");
}

criterion_group!(benches, bench_fan_out);
criterion_main!(benches);

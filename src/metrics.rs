//! Optional performance counters for the scheduler.
//!
//! Compiled in with the `metrics` feature. Counters are per scheduler
//! instance and updated with relaxed atomics; read them through
//! [`JobSystem::metrics`](crate::JobSystem::metrics).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Metrics {
    /// Jobs accepted by submit or submit_batch.
    pub(crate) jobs_submitted: AtomicU64,
    /// Jobs whose body has run to completion (or panicked).
    pub(crate) jobs_executed: AtomicU64,
    /// Waits that returned without parking (counter already zero).
    pub(crate) waits_immediate: AtomicU64,
    /// Waits that parked the calling fiber.
    pub(crate) waits_parked: AtomicU64,
    /// Direct hand-offs from a last-finishing job to a parked fiber.
    pub(crate) wakeups: AtomicU64,
}

impl Metrics {
    pub(crate) fn new() -> Self {
        Metrics::default()
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            waits_immediate: self.waits_immediate.load(Ordering::Relaxed),
            waits_parked: self.waits_parked.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value view of [`Metrics`], serialisable for external reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_executed: u64,
    pub waits_immediate: u64,
    pub waits_parked: u64,
    pub wakeups: u64,
}

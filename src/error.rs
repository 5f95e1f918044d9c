//! Error types returned by the scheduler API.

use thiserror::Error;

/// Errors surfaced by [`JobSystem`](crate::JobSystem) operations.
///
/// `QueueFull` and `CounterOverflow` are caller-correctable (the call may be
/// retried); `FiberPoolExhausted` indicates the configured fiber count is too
/// small for the workload's maximum wait depth; the remaining variants are
/// contract violations on the caller's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The bounded job queue is full; nothing was enqueued and no wait-handle
    /// counter was changed.
    #[error("job queue is full")]
    QueueFull,

    /// No idle fiber was available to park on; raise
    /// [`SchedulerConfig::fibers`](crate::SchedulerConfig).
    #[error("fiber pool exhausted")]
    FiberPoolExhausted,

    /// A wait handle's counter left its valid range.
    #[error("wait handle counter overflow")]
    CounterOverflow,

    /// The operation requires running on a scheduler-managed fiber.
    #[error("not running on a scheduler fiber")]
    NotOnFiber,

    /// `shutdown` was called somewhere other than the fiber that `init`
    /// returned on.
    #[error("shutdown must be called from the main fiber")]
    NotMainFiber,

    /// A batch submission mixed jobs pointing at different wait handles.
    #[error("jobs in a batch must share one wait handle")]
    MixedWaitHandles,

    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// A fiber stack could not be allocated.
    #[error("fiber stack allocation failed")]
    StackAllocation,
}

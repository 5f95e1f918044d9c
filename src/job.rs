//! Job descriptors.
//!
//! A job is a plain function pointer plus caller-owned data, optionally tied
//! to a [`WaitHandle`] for completion tracking. Descriptors are immutable
//! values once enqueued and are copied through the job queue by value.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::{self, NonNull};

use crate::wait::WaitHandle;

/// Signature of a job body. Receives the `user_data` pointer the descriptor
/// was built with.
pub type JobFn = fn(*mut ());

/// Description of one unit of work.
///
/// The storage behind `user_data` and the wait handle are caller-owned and
/// must outlive the job; see [`JobSystem::submit`](crate::JobSystem::submit)
/// for the full contract.
#[derive(Clone, Copy)]
pub struct JobDecl {
    pub(crate) func: Option<JobFn>,
    pub(crate) user_data: *mut (),
    pub(crate) wait_handle: Option<NonNull<WaitHandle>>,
}

unsafe impl Send for JobDecl {}

impl JobDecl {
    /// Job with no completion tracking.
    pub fn new(func: JobFn, user_data: *mut ()) -> Self {
        JobDecl {
            func: Some(func),
            user_data,
            wait_handle: None,
        }
    }

    /// Job whose completion decrements `handle`.
    pub fn with_handle(func: JobFn, user_data: *mut (), handle: &WaitHandle) -> Self {
        JobDecl {
            func: Some(func),
            user_data,
            wait_handle: Some(NonNull::from(handle)),
        }
    }

    /// Descriptor with no function; submitting it is a no-op.
    pub fn empty() -> Self {
        JobDecl {
            func: None,
            user_data: ptr::null_mut(),
            wait_handle: None,
        }
    }

    /// Runs the job body, containing any panic so that wait-handle
    /// bookkeeping still happens afterwards.
    pub(crate) fn invoke(&self) {
        let Some(func) = self.func else { return };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| func(self.user_data))) {
            let message = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("non-string panic payload");
            tracing::error!(message, "job panicked");
        }
    }
}

//! # microfiber - Lightweight Fiber-Based Job Scheduler
//!
//! A job scheduler for latency-sensitive applications (game engines,
//! real-time simulation, batch pipelines) that decompose work into many short
//! jobs, fan them out across a small pool of worker threads, and let a job
//! cooperatively suspend while its children complete without blocking the OS
//! thread underneath it.
//!
//! ## Architecture
//!
//! Four pieces interlock:
//!
//! - **Fibers**: a fixed pool of stackful execution contexts that carry job
//!   execution and can be suspended on one worker thread and resumed on
//!   another
//! - **Job queue**: one bounded MPMC ring of job descriptors shared by all
//!   workers
//! - **Wait handles**: counters implementing structured join; the last
//!   finishing job hands execution directly to the fiber parked on its handle
//! - **Worker threads**: OS threads hosting one fiber at a time, including
//!   the "main fiber" the calling thread is converted into at init
//!
//! [`JobSystem::init`] absorbs the calling thread: on return the caller runs
//! as a fiber on a worker thread, and everything until
//! [`JobSystem::shutdown`] behaves like a job. Scheduling is strictly
//! cooperative - a job is never preempted and owns its worker until it
//! returns or waits.
//!
//! ## Example
//!
//! ```no_run
//! use microfiber::{JobDecl, JobSystem, SchedulerConfig, WaitHandle};
//!
//! fn double(data: *mut ()) {
//!     let value = unsafe { &mut *(data as *mut u64) };
//!     *value *= 2;
//! }
//!
//! let js = JobSystem::init(SchedulerConfig::default()).unwrap();
//!
//! let handle = WaitHandle::new();
//! let mut value = 21u64;
//! let job = JobDecl::with_handle(double, &mut value as *mut u64 as *mut (), &handle);
//! unsafe { js.submit(&job).unwrap() };
//! js.wait_for(&handle).unwrap();
//! assert_eq!(value, 42);
//!
//! js.shutdown().unwrap();
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod job_system;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod ring;
pub mod wait;

mod fiber;
mod worker;

pub use config::{SchedulerConfig, ALL_CORES};
pub use error::SchedulerError;
pub use job::{JobDecl, JobFn};
pub use job_system::JobSystem;
pub use wait::WaitHandle;

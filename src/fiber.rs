//! Fibers and the stack-switch platform layer.
//!
//! A fiber is an execution context plus, for pooled fibers, an owned stack.
//! Switching is symmetric: `switch_to` saves the caller's context in place
//! and resumes the target at its last suspension point, so a fiber suspended
//! on one worker thread can be resumed by any other. Converted threads (the
//! main fiber and each worker's own fiber) carry no stack of their own; their
//! context is captured by the first switch away from them.
//!
//! Built on the Unix `ucontext` family via `libc`.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cell::Cell;
use std::mem;
use std::ptr::{self, NonNull};

use crate::error::SchedulerError;

/// Entry function of a pooled fiber: invoked on the fiber's first switch with
/// the argument bound at creation and the fiber's own handle. Entries never
/// return; they either loop forever or switch away for good.
pub(crate) type FiberEntry = fn(*mut (), FiberHandle);

/// Non-owning, copyable reference to a fiber. Valid while the owning arena
/// (or the worker thread, for converted threads) keeps the fiber alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FiberHandle(pub(crate) *mut Fiber);

unsafe impl Send for FiberHandle {}
unsafe impl Sync for FiberHandle {}

struct FiberStack {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl FiberStack {
    fn new(size: usize) -> Result<Self, SchedulerError> {
        let layout =
            Layout::from_size_align(size, 16).map_err(|_| SchedulerError::StackAllocation)?;
        let ptr = unsafe { alloc_zeroed(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => Ok(FiberStack { ptr, layout }),
            None => Err(SchedulerError::StackAllocation),
        }
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

pub(crate) struct Fiber {
    ctx: libc::ucontext_t,
    entry: Option<(FiberEntry, *mut ())>,
    stack: Option<FiberStack>,
}

unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

impl Fiber {
    /// Fiber representing an OS thread's native stack. Its context is filled
    /// in by the first `switch_to` away from it.
    pub(crate) fn for_thread() -> Box<Fiber> {
        Box::new(Fiber {
            ctx: unsafe { mem::zeroed() },
            entry: None,
            stack: None,
        })
    }

    /// Fiber with its own stack, resuming into `entry(arg, handle)` on first
    /// switch.
    pub(crate) fn with_entry(
        stack_size: usize,
        entry: FiberEntry,
        arg: *mut (),
    ) -> Result<Box<Fiber>, SchedulerError> {
        let stack = FiberStack::new(stack_size)?;
        let mut fiber = Box::new(Fiber {
            ctx: unsafe { mem::zeroed() },
            entry: Some((entry, arg)),
            stack: None,
        });
        unsafe {
            let ctx = ptr::addr_of_mut!(fiber.ctx);
            if libc::getcontext(ctx) != 0 {
                return Err(SchedulerError::StackAllocation);
            }
            (*ctx).uc_stack.ss_sp = stack.ptr.as_ptr() as *mut libc::c_void;
            (*ctx).uc_stack.ss_size = stack_size;
            (*ctx).uc_stack.ss_flags = 0;
            (*ctx).uc_link = ptr::null_mut();
            // makecontext only forwards machine-word arguments, so the fiber
            // pointer travels as two halves.
            let bits = &mut *fiber as *mut Fiber as usize as u64;
            let trampoline =
                mem::transmute::<extern "C" fn(u32, u32), extern "C" fn()>(fiber_trampoline);
            libc::makecontext(ctx, trampoline, 2, bits as u32, (bits >> 32) as u32);
        }
        fiber.stack = Some(stack);
        Ok(fiber)
    }

    pub(crate) fn handle(&mut self) -> FiberHandle {
        FiberHandle(self as *mut Fiber)
    }
}

extern "C" fn fiber_trampoline(low: u32, high: u32) {
    let bits = (low as u64) | ((high as u64) << 32);
    let fiber = bits as usize as *mut Fiber;
    let (entry, arg) = unsafe { (*fiber).entry.take().expect("fiber entered twice") };
    entry(arg, FiberHandle(fiber));
    // Entries must never return: there is nothing on this stack to return to.
    std::process::abort();
}

thread_local! {
    static CURRENT_FIBER: Cell<Option<FiberHandle>> = const { Cell::new(None) };
}

/// Handle of the fiber currently executing on this thread.
pub(crate) fn current() -> Option<FiberHandle> {
    CURRENT_FIBER.get()
}

/// Marks `fiber` as the context representing this thread's native stack.
pub(crate) fn adopt_thread(fiber: FiberHandle) {
    CURRENT_FIBER.set(Some(fiber));
}

/// Detaches the calling thread from fiber execution.
pub(crate) fn release_thread() {
    CURRENT_FIBER.set(None);
}

/// Suspends the current fiber and resumes `target` at its last suspension
/// point (or its entry, on first switch). Returns when some other fiber
/// switches back here, possibly on a different worker thread.
///
/// # Safety
///
/// Both the current and target fiber must stay alive until they next run,
/// and `target` must not be running or queued to run anywhere else.
pub(crate) unsafe fn switch_to(target: FiberHandle) {
    let from = CURRENT_FIBER
        .replace(Some(target))
        .expect("switch_to called outside fiber context");
    debug_assert_ne!(from, target, "fiber cannot switch to itself");
    let rc = libc::swapcontext(
        ptr::addr_of_mut!((*from.0).ctx),
        ptr::addr_of!((*target.0).ctx),
    );
    debug_assert_eq!(rc, 0, "swapcontext failed");
}

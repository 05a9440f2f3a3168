//! Requests handed from a blocking thread to its core's helper.
//!
//! A request owns the TCB of the thread that made it. Between `block`
//! installing it and the helper executing it, nobody else can reach that
//! thread: it is on no queue and in no active slot.

use alloc::boxed::Box;
use core::fmt;
use core::ptr::NonNull;

use static_assertions::const_assert;

use super::state::Kernel;
use super::tcb::Tcb;
use crate::sync::semaphore::Semaphore;

pub(crate) enum Request {
    /// Yield or preemption: back to the tail of the ready queue.
    Ready(Box<Tcb>),
    /// Sleep on this core's sleep queue.
    Sleep { tcb: Box<Tcb>, seconds: u32 },
    /// Finish a `down` that found the count at zero.
    Down { tcb: Box<Tcb>, semaphore: NonNull<Semaphore> },
    /// The thread is done; hand it to the reaper.
    Exit(Box<Tcb>),
}

// Requests live in a fixed per-core slot; keep them small.
const_assert!(core::mem::size_of::<Request>() <= 200);

// SAFETY: the semaphore behind `Down` is borrowed by the `down` call that
// made the request, and that call cannot return before the helper is done
// with it.
unsafe impl Send for Request {}

impl Request {
    pub(crate) fn tag(&self) -> &'static str {
        match self {
            Request::Ready(_) => "ready",
            Request::Sleep { .. } => "sleep",
            Request::Down { .. } => "down",
            Request::Exit(_) => "exit",
        }
    }

    /// Run on the helper of `core`. O(1) except for the sleep queue insert.
    pub(crate) fn execute(self, kernel: &Kernel, core: usize) {
        match self {
            Request::Ready(tcb) => kernel.make_ready(tcb),
            Request::Sleep { tcb, seconds } => kernel.add_sleeper(core, tcb, seconds),
            Request::Down { tcb, semaphore } => {
                // SAFETY: see the `Send` impl above.
                unsafe { semaphore.as_ref() }.complete_down(tcb)
            }
            Request::Exit(tcb) => kernel.reaper().add(tcb),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tcb = match self {
            Request::Ready(tcb) | Request::Exit(tcb) => tcb,
            Request::Sleep { tcb, .. } | Request::Down { tcb, .. } => tcb,
        };
        write!(f, "{}({})", self.tag(), tcb.id())
    }
}

// =============================================================================
// Relay — Counting Semaphore
// =============================================================================
//
// The only primitive in the kernel that blocks. Everything else that waits
// (blocking queue, blocking lock, barrier, bounded buffer, promise, process
// wait) is a semaphore underneath.
//
// FAST PATHS (caller side, O(1), under the semaphore's spinlock):
//   down: count > 0 → count -= 1, return
//   up:   a waiter exists → dequeue it, make it ready (after unlocking)
//         no waiter       → count += 1
//
// SLOW PATH (down with count == 0):
//   The caller cannot wait while holding the spinlock, and it cannot enqueue
//   itself and then switch away: between the two, an `up` on another core
//   could make it ready and a third core could start running it while its
//   registers are still being saved. So the caller releases the lock and
//   blocks with a `Down` request. The helper, which now owns the TCB,
//   re-takes the lock and re-checks the count: if an `up` slipped in, the
//   thread is made ready right away, otherwise it joins the wait list.
//
// INVARIANT: count > 0 implies the wait list is empty.
// =============================================================================

use alloc::boxed::Box;
use core::fmt;
use core::ptr::NonNull;

use super::spinlock::SpinLock;
use crate::queue::Queue;
use crate::thread::{Kernel, Request, Tcb};

struct State {
    count: u32,
    waiting: Queue<Tcb>,
    waiters: u32,
}

pub struct Semaphore {
    kernel: &'static Kernel,
    state: SpinLock<State>,
}

impl Semaphore {
    pub fn new(kernel: &'static Kernel, count: u32) -> Self {
        Self { kernel, state: SpinLock::new(State { count, waiting: Queue::new(), waiters: 0 }) }
    }

    /// Take one unit, blocking the calling thread until one is available.
    ///
    /// Must be called from a thread (never from a helper thread) with no
    /// spinlock held.
    pub fn down(&self) {
        {
            let mut state = self.state.lock();
            if state.count > 0 {
                state.count -= 1;
                return;
            }
        }
        let semaphore = NonNull::from(self);
        self.kernel.block("down", move |tcb| Request::Down { tcb, semaphore });
    }

    /// Take one unit if that is possible without blocking.
    pub fn try_down(&self) -> bool {
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count -= 1;
            true
        } else {
            false
        }
    }

    /// Release one unit: wake the oldest waiter, or bank the unit. Never
    /// blocks; safe from helper threads and interrupt handlers.
    pub fn up(&self) {
        let mut state = self.state.lock();
        match state.waiting.remove() {
            Some(tcb) => {
                state.waiters -= 1;
                drop(state);
                self.kernel.make_ready(tcb);
            }
            None => state.count += 1,
        }
    }

    /// Helper side of a `down` that found the count at zero.
    pub(crate) fn complete_down(&self, tcb: Box<Tcb>) {
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count -= 1;
            drop(state);
            self.kernel.make_ready(tcb);
        } else {
            state.waiting.add(tcb);
            state.waiters += 1;
        }
    }

    /// Advisory.
    pub fn count(&self) -> u32 {
        self.state.lock().count
    }

    /// Number of blocked threads. Advisory.
    pub fn waiters(&self) -> u32 {
        self.state.lock().waiters
    }

    /// Advisory.
    pub fn has_waiters(&self) -> bool {
        self.waiters() > 0
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Semaphore")
            .field("count", &state.count)
            .field("waiters", &state.waiters)
            .finish()
    }
}

// =============================================================================
// Relay — Reaper
// =============================================================================
//
// Stopped threads cannot free themselves (they are still on their stack
// when they stop) and the helper cannot free them either (freeing touches
// the heap, and the heap may block). So the helper hands them to the
// reaper: a blocking queue drained by a dedicated reaper thread, and also
// opportunistically by `reap()`, which every spawn, yield, sleep and stop
// runs first.
//
// A stopped thread whose process may still be waited for is not destroyed:
// it goes to the retained list and is looked at again by every later reap
// pass, until its parent is gone or has collected the exit status.
// =============================================================================

use alloc::boxed::Box;

use super::state::Kernel;
use super::tcb::Tcb;
use crate::queue::Queue;
use crate::sync::blocking::BlockingQueue;
use crate::sync::spinlock::RawSpinLock;

pub(crate) struct Reaper {
    stopped: BlockingQueue<Tcb>,
    retained: Queue<Tcb, RawSpinLock>,
}

impl Reaper {
    pub(crate) fn new(kernel: &'static Kernel) -> Self {
        Self { stopped: BlockingQueue::new(kernel), retained: Queue::new() }
    }

    /// Hand over a stopped thread. Never blocks: the helper calls this.
    pub(crate) fn add(&self, tcb: Box<Tcb>) {
        self.stopped.add(tcb);
    }
}

impl Kernel {
    pub(crate) fn reaper(&self) -> &Reaper {
        match self.reaper.get() {
            Some(reaper) => reaper,
            None => panic!("reaper: kernel was never started"),
        }
    }

    /// Destroy every stopped thread that nobody can wait for any more.
    /// Never blocks.
    pub fn reap(&self) {
        let Some(reaper) = self.reaper.get() else {
            return;
        };
        let stopped = reaper.stopped.remove_all();
        let retained = reaper.retained.remove_all();
        for tcb in stopped {
            self.dispose(reaper, tcb);
        }
        for tcb in retained {
            self.stats().retained_changed(-1);
            self.dispose(reaper, tcb);
        }
    }

    fn dispose(&self, reaper: &Reaper, tcb: Box<Tcb>) {
        if tcb.process().must_retain() {
            self.stats().retained_changed(1);
            reaper.retained.add(tcb);
        } else {
            log::trace!("reaper: destroying {} of {}", tcb.id(), tcb.process().pid());
            drop(tcb);
            self.stats().thread_reaped();
        }
    }

    /// Body of the reaper thread.
    pub(crate) fn reaper_loop(&self) -> ! {
        let reaper = self.reaper();
        loop {
            let tcb = reaper.stopped.remove();
            self.dispose(reaper, tcb);
            self.reap();
        }
    }
}

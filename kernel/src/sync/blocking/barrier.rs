use crate::sync::atomic::Atomic;
use crate::sync::semaphore::Semaphore;
use crate::thread::Kernel;

/// A one-shot rendezvous for `n` threads.
///
/// The last arrival releases one waiter, and every released waiter releases
/// the next, so the release cascades through all of them.
pub struct Barrier {
    remaining: Atomic<i32>,
    released: Semaphore,
}

impl Barrier {
    pub fn new(kernel: &'static Kernel, n: i32) -> Self {
        Self { remaining: Atomic::new(n), released: Semaphore::new(kernel, 0) }
    }

    /// Wait until `n` threads have called `sync`.
    pub fn sync(&self) {
        if self.remaining.add_fetch(-1) == 0 {
            self.released.up();
        } else {
            self.released.down();
            self.released.up();
        }
    }
}

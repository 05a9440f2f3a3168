use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use crate::sync::semaphore::Semaphore;
use crate::thread::Kernel;

/// A mutual-exclusion lock whose waiters block instead of spinning.
///
/// Use it for critical sections that may themselves block or that are too
/// long to run with interrupts masked. It is a semaphore of one.
pub struct BlockingLock<T> {
    sem: Semaphore,
    data: UnsafeCell<T>,
}

// SAFETY: the semaphore admits one holder at a time.
unsafe impl<T: Send> Send for BlockingLock<T> {}
unsafe impl<T: Send> Sync for BlockingLock<T> {}

impl<T> BlockingLock<T> {
    pub fn new(kernel: &'static Kernel, value: T) -> Self {
        Self { sem: Semaphore::new(kernel, 1), data: UnsafeCell::new(value) }
    }

    pub fn lock(&self) -> BlockingLockGuard<'_, T> {
        self.sem.down();
        BlockingLockGuard { lock: self }
    }

    pub fn try_lock(&self) -> Option<BlockingLockGuard<'_, T>> {
        self.sem.try_down().then_some(BlockingLockGuard { lock: self })
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

pub struct BlockingLockGuard<'a, T> {
    lock: &'a BlockingLock<T>,
}

impl<T> Deref for BlockingLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: we hold the only unit of the semaphore.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for BlockingLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: we hold the only unit of the semaphore.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for BlockingLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.sem.up();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::atomic::Atomic;
    use crate::testing;

    #[test]
    fn try_lock_respects_the_holder() {
        let rig = testing::boot(1);
        let lock = BlockingLock::new(rig.kernel, 3);
        let g = lock.try_lock().unwrap();
        assert!(lock.try_lock().is_none());
        drop(g);
        assert_eq!(lock.try_lock().map(|g| *g), Some(3));
    }

    #[test]
    fn holders_may_yield_inside_the_critical_section() {
        let rig = testing::boot(3);
        let kernel = rig.kernel;
        // (value, holders): holders must never exceed one.
        let lock: &'static BlockingLock<(u64, u32)> = testing::leak(BlockingLock::new(kernel, (0, 0)));
        let overlap: &'static Atomic<u32> = testing::leak(Atomic::new(0));
        let done: &'static Atomic<u32> = testing::leak(Atomic::new(0));

        for _ in 0..6 {
            kernel.spawn(move || {
                for _ in 0..50 {
                    let mut g = lock.lock();
                    g.1 += 1;
                    if g.1 > 1 {
                        overlap.fetch_add(1);
                    }
                    let v = g.0;
                    kernel.yield_now();
                    g.0 = v + 1;
                    g.1 -= 1;
                }
                done.fetch_add(1);
            });
        }
        rig.start();
        rig.wait_for("all workers finished", || done.load() == 6);
        assert_eq!(overlap.load(), 0);
        assert_eq!(lock.try_lock().map(|g| g.0), Some(300));
    }
}

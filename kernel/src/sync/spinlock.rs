// =============================================================================
// Relay — Exchange Spinlock
// =============================================================================
//
// A test-and-set spinlock that masks interrupts on the holder's core for
// exactly as long as the lock is held.
//
// HOW IT WORKS:
//   One boolean, `taken`. To lock:
//     1. Disable interrupts on this core, remembering the previous state
//     2. Atomically exchange `taken` with `true`
//     3. If the old value was `false`, we own the lock: done
//     4. Otherwise restore interrupts, tell the stuck-loop watch, issue a
//        spin hint and go back to 1
//   To unlock: store `false`, then restore the interrupt state captured by
//   THIS acquisition.
//
// WHY RE-ENABLE INTERRUPTS WHILE WAITING?
//   The waiter may be the thread the holder is waiting for (e.g. the holder
//   is a timer handler on another core that needs this core to make
//   progress). Spinning with interrupts masked would also delay this core's
//   own timer tick for as long as the lock is contended.
//
// NOT REENTRANT:
//   Locking the same SpinLock twice on one core deadlocks that core. There
//   is no owner tracking; the hazard is documented, not detected.
//
// LOCK STRATEGIES:
//   `Queue` is generic over a `RawLock`. `RawSpinLock` is the lock above
//   without data attached. `NoLock` is a zero-sized strategy for queues that
//   are only ever touched by one core's helper thread or that are already
//   protected by an outer spinlock.
// =============================================================================

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};

use super::atomic::Atomic;
use super::interrupts::Interrupts;
use super::stuck::LoopWatch;
use crate::arch;

/// A locking strategy: something that can be acquired and released.
///
/// The token carries whatever the release needs to undo (for the spinlock,
/// the interrupt state found at acquisition).
pub trait RawLock: Default {
    type Token;

    fn acquire(&self) -> Self::Token;
    fn release(&self, token: Self::Token);
}

/// The spinlock itself, without protected data.
pub struct RawSpinLock {
    taken: Atomic<bool>,
}

impl RawSpinLock {
    pub fn new() -> Self {
        Self { taken: Atomic::new(false) }
    }

    /// One attempt. `Some(was_disabled)` on success.
    pub fn try_acquire(&self) -> Option<bool> {
        let was = Interrupts::disable();
        if !self.taken.exchange(true) {
            Some(was)
        } else {
            Interrupts::restore(was);
            None
        }
    }

    /// Advisory: the answer may be stale by the time the caller looks at it.
    pub fn is_locked(&self) -> bool {
        self.taken.load()
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RawLock for RawSpinLock {
    /// Whether interrupts were already disabled before the acquisition.
    type Token = bool;

    fn acquire(&self) -> bool {
        let mut watch = LoopWatch::new("spinlock");
        loop {
            if let Some(was) = self.try_acquire() {
                return was;
            }
            watch.spin();
            arch::spin_hint();
        }
    }

    fn release(&self, was_disabled: bool) {
        self.taken.store(false);
        Interrupts::restore(was_disabled);
    }
}

impl fmt::Debug for RawSpinLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSpinLock").field("taken", &self.is_locked()).finish()
    }
}

/// The strategy that does nothing. Free in time and space.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLock;

impl RawLock for NoLock {
    type Token = ();

    #[inline(always)]
    fn acquire(&self) {}

    #[inline(always)]
    fn release(&self, _token: ()) {}
}

/// A spinlock protecting a value.
///
/// # Examples
/// ```ignore
/// let counter = SpinLock::new(0u64);
/// {
///     let mut n = counter.lock();
///     *n += 1;
/// } // unlocked, interrupts back to what they were
/// ```
pub struct SpinLock<T> {
    raw: RawSpinLock,
    data: UnsafeCell<T>,
}

// SAFETY: the lock hands out access to `data` to one core at a time, so
// sharing the lock only requires that the data may move between cores.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub fn new(value: T) -> Self {
        Self { raw: RawSpinLock::new(), data: UnsafeCell::new(value) }
    }

    /// Spin until the lock is ours. Interrupts stay disabled on this core
    /// until the guard is dropped.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let was_disabled = self.raw.acquire();
        SpinLockGuard { lock: self, was_disabled }
    }

    /// One attempt, no spinning.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.raw
            .try_acquire()
            .map(|was_disabled| SpinLockGuard { lock: self, was_disabled })
    }

    /// Advisory.
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// `&mut self` proves nobody else can be holding the lock.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock").field("locked", &self.is_locked()).finish_non_exhaustive()
    }
}

/// RAII guard for a held spinlock.
///
/// Dropping it releases the lock and restores the interrupt state captured
/// by the acquisition that created it.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    was_disabled: bool,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: we hold the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: we hold the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.release(self.was_disabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::vec::Vec;

    #[test]
    fn guard_masks_interrupts_while_held() {
        let lock = SpinLock::new(0);
        assert!(!Interrupts::is_disabled());
        {
            let mut g = lock.lock();
            *g += 1;
            assert!(Interrupts::is_disabled());
            assert!(lock.is_locked());
        }
        assert!(!Interrupts::is_disabled());
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn guard_restores_what_it_found() {
        let lock = SpinLock::new(());
        let was = Interrupts::disable();
        drop(lock.lock());
        assert!(Interrupts::is_disabled(), "unlock must not enable interrupts it did not disable");
        Interrupts::restore(was);
    }

    #[test]
    fn nested_locks_unwind_in_order() {
        let a = SpinLock::new(1);
        let b = SpinLock::new(2);
        let ga = a.lock();
        let gb = b.lock();
        assert_eq!(*ga + *gb, 3);
        drop(gb);
        assert!(Interrupts::is_disabled(), "outer guard still held");
        drop(ga);
        assert!(!Interrupts::is_disabled());
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(5);
        let g = lock.lock();
        assert!(lock.try_lock().is_none());
        // A failed attempt leaves the holder's masking alone.
        assert!(Interrupts::is_disabled());
        drop(g);
        assert_eq!(lock.try_lock().map(|g| *g), Some(5));
    }

    #[test]
    fn no_lock_is_free() {
        assert_eq!(core::mem::size_of::<NoLock>(), 0);
        NoLock.acquire();
        NoLock.release(());
    }

    #[test]
    fn contended_counter() {
        let lock = Arc::new(SpinLock::new(0u64));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..5_000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(*lock.lock(), 20_000);
    }
}

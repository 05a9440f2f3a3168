//! Timed sleep.
//!
//! Each core keeps its own sleep queue, sorted by deadline. Only that
//! core's helper touches it, so it has no lock.
//!
//! A sleeper wakes once `jiffies >= wake_at`, on the core it fell asleep
//! on, and goes to the back of the ready queue. Sleepers with the same
//! deadline wake in the order they fell asleep.

use alloc::boxed::Box;

use super::request::Request;
use super::state::Kernel;
use super::tcb::Tcb;

impl Kernel {
    /// Block the calling thread for at least `seconds` seconds.
    pub fn sleep(&self, seconds: u32) {
        self.reap();
        self.block("sleep", move |tcb| Request::Sleep { tcb, seconds });
    }

    /// Helper side of `sleep`. O(n) in the length of this core's queue.
    pub(crate) fn add_sleeper(&self, core: usize, mut tcb: Box<Tcb>, seconds: u32) {
        let platform = self.platform();
        tcb.wake_at = platform.jiffies() + platform.seconds_to_jiffies(seconds);
        log::trace!("core {}: {} sleeps until jiffy {}", core, tcb.id(), tcb.wake_at);
        self.stats().sleeping_changed(1);
        // SAFETY: only the helper of `core` touches its sleep queue.
        let queue = unsafe { &*self.sleepers.get(core) };
        queue.insert_by(tcb, |new, queued| new.wake_at < queued.wake_at);
    }

    /// Move every due sleeper of `core` to the ready queue. O(1) per
    /// thread woken. Helper only.
    pub(crate) fn wake_sleepers(&self, core: usize) {
        // SAFETY: only the helper of `core` touches its sleep queue.
        let queue = unsafe { &*self.sleepers.get(core) };
        if queue.is_empty() {
            return;
        }
        let now = self.platform().jiffies();
        while let Some(tcb) = queue.remove_if(|t| t.wake_at <= now) {
            self.stats().sleeping_changed(-1);
            self.make_ready(tcb);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::sync::atomic::Atomic;
    use crate::sync::SpinLock;
    use crate::testing;
    use alloc::vec::Vec;
    use proptest::prelude::*;

    #[test]
    fn sleeper_wakes_once_the_clock_passes_its_deadline() {
        let rig = testing::boot(2);
        let kernel = rig.kernel;
        let woke: &'static Atomic<bool> = testing::leak(Atomic::new(false));

        kernel.spawn(move || {
            kernel.sleep(2);
            woke.store(true);
        });
        rig.start();

        rig.wait_for("thread asleep", || kernel.stats().sleeping() == 1);
        rig.platform.advance(199);
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(!woke.load(), "one jiffy early");

        rig.platform.advance(1);
        rig.wait_for("thread woke", || woke.load());
        assert_eq!(kernel.stats().sleeping(), 0);
    }

    #[test]
    fn zero_seconds_is_a_yield() {
        let rig = testing::boot(1);
        let kernel = rig.kernel;
        let done: &'static Atomic<bool> = testing::leak(Atomic::new(false));

        kernel.spawn(move || {
            kernel.sleep(0);
            done.store(true);
        });
        rig.start();
        rig.wait_for("thread came back without the clock moving", || done.load());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        /// Sleepers wake in deadline order; equal deadlines in the order the
        /// threads fell asleep.
        #[test]
        fn sleepers_wake_in_deadline_order(seconds in proptest::collection::vec(1u32..4, 1..8)) {
            let rig = testing::boot(1);
            let kernel = rig.kernel;
            let order: &'static SpinLock<Vec<usize>> = testing::leak(SpinLock::new(Vec::new()));
            let n = seconds.len();

            for (i, &s) in seconds.iter().enumerate() {
                kernel.spawn(move || {
                    kernel.sleep(s);
                    order.lock().push(i);
                });
            }
            rig.start();
            rig.wait_for("everyone asleep", || kernel.stats().sleeping() == n as i32);
            rig.platform.advance(1000);
            rig.wait_for("everyone awake", || order.lock().len() == n);

            let mut expected: Vec<usize> = (0..n).collect();
            expected.sort_by_key(|&i| seconds[i]);
            prop_assert_eq!(order.lock().clone(), expected);
        }
    }
}

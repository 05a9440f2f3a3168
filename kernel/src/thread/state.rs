// =============================================================================
// Relay — Scheduler State
// =============================================================================
//
// The `Kernel` object: every piece of scheduling state, created once at
// boot and shared by all cores as `&'static Kernel`.
//
//   ready     — the system-wide ready queue (spinlock FIFO)
//   sleepers  — one sleep queue per core, sorted by deadline, touched only
//               by that core's helper
//   active    — per-core active thread. Null while the core runs its
//               helper, which is what makes the helper non-preemptible.
//   requests  — per-core pending request, installed by `block`, consumed by
//               the helper
//   helpers   — per-core helper save areas
//   reaper    — the queue of stopped threads and the retained list
//
// OWNERSHIP OF A THREAD:
//   A TCB is always owned by exactly one of: a queue, a request, or an
//   active slot. The active slot holds it as a raw pointer; `block` turns
//   that pointer back into a `Box` when it takes the thread off the core.
//
//   The active slot is never handed out as a reference. Code that needs the
//   calling thread's TCB borrows it through `with_current`, and everything
//   else gets owned handles (`ThreadId`, `Arc<Process>`).
// =============================================================================

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use super::reaper::Reaper;
use super::request::Request;
use super::tcb::{Tcb, ThreadId};
use crate::arch::{self, Platform, SaveArea};
use crate::config::Config;
use crate::error::KernelError;
use crate::process::{AddressSpace, Pid, Process};
use crate::queue::Queue;
use crate::sync::atomic::Atomic;
use crate::sync::interrupts::Interrupts;
use crate::sync::spinlock::RawSpinLock;
use crate::sync::stuck;

/// One `T` per core, each touched only by its own core.
pub(crate) struct PerCore<T> {
    slots: Box<[UnsafeCell<T>]>,
}

// SAFETY: slot `i` is only accessed from core `i` (by its helper, or by a
// thread running there with preemption disabled).
unsafe impl<T: Send> Sync for PerCore<T> {}

impl<T> PerCore<T> {
    fn new(cores: usize, mut init: impl FnMut(usize) -> T) -> Self {
        Self { slots: (0..cores).map(|i| UnsafeCell::new(init(i))).collect() }
    }

    pub(crate) fn get(&self, core: usize) -> *mut T {
        self.slots[core].get()
    }
}

/// Thread accounting, used to check that nothing leaks.
#[derive(Default)]
pub struct ThreadStats {
    live_tcbs: Atomic<i32>,
    live_stacks: Atomic<i32>,
    spawned: Atomic<u32>,
    reaped: Atomic<u32>,
    sleeping: Atomic<i32>,
    retained: Atomic<i32>,
    idle_reports: Atomic<u32>,
}

impl ThreadStats {
    pub(crate) fn thread_created(&self) {
        self.live_tcbs.fetch_add(1);
        self.live_stacks.fetch_add(1);
        self.spawned.fetch_add(1);
    }

    pub(crate) fn thread_destroyed(&self) {
        self.live_tcbs.fetch_add(-1);
        self.live_stacks.fetch_add(-1);
    }

    pub(crate) fn thread_reaped(&self) {
        self.reaped.fetch_add(1);
    }

    pub(crate) fn sleeping_changed(&self, delta: i32) {
        self.sleeping.fetch_add(delta);
    }

    pub(crate) fn retained_changed(&self, delta: i32) {
        self.retained.fetch_add(delta);
    }

    pub(crate) fn idle_reported(&self) {
        self.idle_reports.fetch_add(1);
    }

    pub fn live_tcbs(&self) -> i32 {
        self.live_tcbs.load()
    }

    pub fn live_stacks(&self) -> i32 {
        self.live_stacks.load()
    }

    pub fn spawned(&self) -> u32 {
        self.spawned.load()
    }

    pub fn reaped(&self) -> u32 {
        self.reaped.load()
    }

    pub fn sleeping(&self) -> i32 {
        self.sleeping.load()
    }

    pub fn retained(&self) -> i32 {
        self.retained.load()
    }

    /// How often an idle helper found nothing to run for longer than the
    /// idle threshold.
    pub fn idle_reports(&self) -> u32 {
        self.idle_reports.load()
    }
}

impl fmt::Debug for ThreadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadStats")
            .field("live_tcbs", &self.live_tcbs())
            .field("live_stacks", &self.live_stacks())
            .field("spawned", &self.spawned())
            .field("reaped", &self.reaped())
            .field("sleeping", &self.sleeping())
            .field("retained", &self.retained())
            .field("idle_reports", &self.idle_reports())
            .finish()
    }
}

pub struct Kernel {
    config: Config,
    platform: &'static dyn Platform,
    pub(crate) ready: Queue<Tcb, RawSpinLock>,
    pub(crate) sleepers: PerCore<Queue<Tcb>>,
    active: Box<[AtomicPtr<Tcb>]>,
    requests: PerCore<Option<Request>>,
    pub(crate) helpers: PerCore<SaveArea>,
    pub(crate) reaper: spin::Once<Reaper>,
    stats: ThreadStats,
    next_tid: Atomic<usize>,
    next_pid: Atomic<usize>,
}

impl Kernel {
    /// Build the scheduling state for `config.cores` cores. Nothing runs
    /// until the kernel is installed (`Kernel::leak` or `thread::init`) and
    /// every core calls `boot_core`.
    pub fn new(config: Config, platform: &'static dyn Platform) -> Result<Self, KernelError> {
        config.validate()?;
        stuck::set_threshold(config.stuck_threshold);
        let cores = config.cores;
        Ok(Self {
            config,
            platform,
            ready: Queue::new(),
            sleepers: PerCore::new(cores, |_| Queue::new()),
            active: (0..cores).map(|_| AtomicPtr::new(ptr::null_mut())).collect::<Vec<_>>().into_boxed_slice(),
            requests: PerCore::new(cores, |_| None),
            helpers: PerCore::new(cores, |_| SaveArea::new()),
            reaper: spin::Once::new(),
            stats: ThreadStats::default(),
            next_tid: Atomic::new(0),
            next_pid: Atomic::new(1),
        })
    }

    /// Give the kernel a `'static` home on the heap and start its reaper.
    pub fn leak(self) -> &'static Kernel {
        let kernel: &'static Kernel = Box::leak(Box::new(self));
        kernel.start();
        kernel
    }

    /// Start the reaper thread. Called once, right after the kernel got its
    /// final address.
    pub(crate) fn start(&'static self) {
        self.reaper.call_once(|| Reaper::new(self));
        self.spawn(move || self.reaper_loop());
        log::info!("relay: kernel up, {} cores, {} byte stacks", self.config.cores, self.config.stack_bytes);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn platform(&self) -> &'static dyn Platform {
        self.platform
    }

    pub fn stats(&self) -> &ThreadStats {
        &self.stats
    }

    pub(crate) fn next_thread_id(&self) -> ThreadId {
        ThreadId(self.next_tid.fetch_add(1))
    }

    pub(crate) fn next_pid(&self) -> Pid {
        Pid(self.next_pid.fetch_add(1))
    }

    /// The active slot of this core: the calling thread's TCB, or null in a
    /// helper thread.
    fn active_tcb(&self) -> *const Tcb {
        let was = Interrupts::disable();
        let tcb = self.active[arch::core_id()].load(Ordering::SeqCst);
        Interrupts::restore(was);
        tcb
    }

    /// Run `f` on the calling thread's TCB. `None` in a helper thread.
    ///
    /// The TCB is only lent for the duration of `f`: it is destroyed by the
    /// reaper once the thread stops, so no reference to it may escape.
    pub fn with_current<R>(&self, f: impl FnOnce(&Tcb) -> R) -> Option<R> {
        // SAFETY: a non-null active slot points at the TCB of the thread
        // running on this core, i.e. the caller. It cannot be reaped before
        // the caller stops, and `f` runs on the caller's stack.
        unsafe { self.active_tcb().as_ref() }.map(f)
    }

    pub fn current_id(&self) -> Option<ThreadId> {
        self.with_current(Tcb::id)
    }

    /// The calling thread's process. The handle stays valid after the
    /// thread is gone.
    pub fn current_process(&self) -> Option<Arc<Process>> {
        self.with_current(|me| Arc::clone(me.process()))
    }

    pub fn current_address_space(&self) -> Option<Arc<AddressSpace>> {
        self.with_current(|me| Arc::clone(me.address_space()))
    }

    pub fn in_helper_thread(&self) -> bool {
        self.active_tcb().is_null()
    }

    pub fn preemption_is_disabled(&self) -> bool {
        Interrupts::is_disabled() || self.in_helper_thread()
    }

    /// Advisory.
    pub fn has_ready_threads(&self) -> bool {
        !self.ready.is_empty()
    }

    pub(crate) fn make_ready(&self, tcb: Box<Tcb>) {
        self.ready.add(tcb);
    }

    /// Take the calling thread off its core and let the helper carry out
    /// the request built by `make`. Returns when some later request makes
    /// the thread ready and a core picks it up again (possibly a different
    /// core).
    ///
    /// O(1). Must be called from a thread, never from a helper.
    pub(crate) fn block(&self, tag: &'static str, make: impl FnOnce(Box<Tcb>) -> Request) {
        let was = Interrupts::disable();
        let core = arch::core_id();
        let me = self.active[core].swap(ptr::null_mut(), Ordering::SeqCst);
        Interrupts::restore(was);

        kassert!(!me.is_null(), "{}: blocking outside a thread on core {}", tag, core);

        // SAFETY: the active slot owned `me`; emptying the slot handed it to
        // us. From here until the switch, preemption is off on this core.
        let tcb = unsafe { Box::from_raw(me) };
        let save = tcb.save_area();
        log::trace!("core {}: {} blocks ({})", core, tcb.id(), tag);

        let slot = self.requests.get(core);
        // SAFETY: the request slot belongs to this core's helper, which is
        // switched out until we switch to it below. The save area stays put
        // because the TCB is boxed.
        unsafe {
            kassert!((*slot).is_none(), "{}: core {} already has a pending request", tag, core);
            *slot = Some(make(tcb));
            arch::context_switch(save, self.helpers.get(core));
        }
    }

    /// Take this core's pending request. Helper only.
    pub(crate) fn take_request(&self, core: usize) -> Option<Request> {
        // SAFETY: called by the helper of `core`, which owns the slot now.
        unsafe { (*self.requests.get(core)).take() }
    }

    /// Publish `tcb` as the thread running on `core`, enabling preemption.
    /// Helper only, with interrupts disabled.
    pub(crate) fn set_active(&self, core: usize, tcb: Box<Tcb>) {
        self.active[core].store(Box::into_raw(tcb), Ordering::SeqCst);
    }

    /// Body of the timer interrupt: count the tick, then preempt the thread
    /// running on this core, if there is one. A helper is never preempted.
    pub fn timer_interrupt(&self) {
        let was = Interrupts::disable();
        let core = arch::core_id();
        self.platform.tick(core);
        if !self.active[core].load(Ordering::SeqCst).is_null() {
            self.block("preempt", Request::Ready);
        }
        Interrupts::restore(was);
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("cores", &self.config.cores)
            .field("ready", &!self.ready.is_empty())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    assert_impl_all!(Kernel: Send, Sync);
    assert_impl_all!(Tcb: Send, Sync);
    assert_impl_all!(Queue<Tcb, RawSpinLock>: Sync);
    assert_not_impl_any!(Queue<Tcb>: Sync);

    #[test]
    fn rejects_invalid_configs() {
        let platform = testing::platform();
        assert_eq!(
            Kernel::new(Config::new(0), platform).err(),
            Some(KernelError::BadConfig("at least one core is required"))
        );
        assert_eq!(
            Kernel::new(Config::new(17), platform).err(),
            Some(KernelError::TooManyCores { requested: 17 })
        );
    }

    #[test]
    fn leak_starts_the_reaper() {
        let rig = testing::boot(2);
        let stats = rig.kernel.stats();
        assert_eq!(stats.spawned(), 1);
        assert_eq!(stats.live_tcbs(), 1);
        assert!(rig.kernel.has_ready_threads(), "reaper waits for a core");
        assert_eq!(rig.platform.live_page_tables(), 1);
    }

    #[test]
    fn per_core_slots_are_distinct() {
        let slots = PerCore::new(4, |i| i * 10);
        // SAFETY: single-threaded test.
        unsafe {
            assert_eq!(*slots.get(3), 30);
            *slots.get(1) = 7;
            assert_eq!(*slots.get(1), 7);
            assert_eq!(*slots.get(0), 0);
        }
    }
}

//! Hosted machine backend.
//!
//! Cores are host threads, and so is every kernel thread. At most one host
//! thread per core executes kernel code at any time: a context switch hands
//! the core's baton to the target save area and parks the caller until some
//! later switch hands a baton back to it. A save area primed for a thread
//! that never ran has no host thread yet; the first switch into it starts
//! one.
//!
//! The interrupt-enable flag is per host thread. On bare metal the flag is
//! saved and restored by every context switch, so tying it to the thread of
//! execution is the same contract.
//!
//! Shutting a `HostedPlatform` down unwinds every host thread it started
//! (parked threads, spinning helpers) with a private payload that is never
//! reported as a failure.

use core::any::Any;
use core::cell::{Cell, RefCell};
use core::ops::Range;
use core::panic::AssertUnwindSafe;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::boxed::Box;
use std::string::{String, ToString};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::thread_local;
use std::time::{Duration, Instant};
use std::vec::Vec;

use super::{Entry, PageTableRoot, PageTables, Platform};
use crate::thread::Kernel;

/// How long a parked host thread sleeps before re-checking for shutdown.
const PARK_POLL: Duration = Duration::from_millis(20);

thread_local! {
    static CORE: Cell<Option<usize>> = const { Cell::new(None) };
    static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
    static SESSION: RefCell<Option<Arc<Session>>> = const { RefCell::new(None) };
}

/// Unwind payload used to retire host threads.
struct Retired;

fn retire_current() -> ! {
    std::panic::resume_unwind(Box::new(Retired))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Interrupts, identity, spinning ──────────────────────────────

pub fn core_id() -> usize {
    match CORE.with(Cell::get) {
        Some(id) => id,
        None => panic!("core_id: host thread {:?} is not attached to a core", thread::current().name()),
    }
}

pub fn interrupts_enabled() -> bool {
    IRQ_ENABLED.with(Cell::get)
}

pub fn disable_interrupts() {
    IRQ_ENABLED.with(|f| f.set(false));
}

pub fn enable_interrupts() {
    IRQ_ENABLED.with(|f| f.set(true));
}

/// Give the host CPU away for a moment. Also the point where spinning
/// threads notice that their platform is shutting down.
pub fn spin_hint() {
    if Session::current().is_some_and(|s| s.is_shut_down()) {
        retire_current();
    }
    thread::yield_now();
}

// ── Sessions ────────────────────────────────────────────────────

/// Book-keeping shared by every host thread of one platform.
#[derive(Default)]
struct Session {
    shutdown: AtomicBool,
    running: AtomicUsize,
    failures: Mutex<Vec<String>>,
}

impl Session {
    fn current() -> Option<Arc<Session>> {
        SESSION.with(|s| s.borrow().clone())
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Start a host thread belonging to this session.
    fn launch<F>(self: &Arc<Self>, name: String, body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let session = Arc::clone(self);
        session.running.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new().name(name).spawn(move || {
            SESSION.with(|s| *s.borrow_mut() = Some(Arc::clone(&session)));
            if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(body)) {
                if !payload.is::<Retired>() {
                    lock(&session.failures).push(describe(payload.as_ref()));
                }
            }
            session.running.fetch_sub(1, Ordering::SeqCst);
        });
        if let Err(e) = spawned {
            panic!("hosted: cannot start a host thread: {e}");
        }
    }
}

fn describe(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

// ── Save areas and the context switch ───────────────────────────

#[derive(Default)]
struct Slot {
    /// Core the parked owner resumes on, set by whoever switches to it.
    resume_on: Option<usize>,
    /// Entry of a primed thread that has no host thread yet.
    entry: Option<Entry>,
    retired: bool,
}

#[derive(Default)]
struct Baton {
    slot: Mutex<Slot>,
    wakeup: Condvar,
}

impl Baton {
    /// Let the owner of this baton run on `core`. Returns the entry point
    /// if the owner still has to be started.
    fn hand_to(&self, core: usize) -> Option<Entry> {
        let mut slot = lock(&self.slot);
        assert!(slot.resume_on.is_none(), "hosted: switching to a save area that is already running");
        slot.resume_on = Some(core);
        let entry = slot.entry.take();
        drop(slot);
        self.wakeup.notify_all();
        entry
    }

    /// Park until someone hands us a core, then adopt it.
    fn wait(&self) {
        let mut slot = lock(&self.slot);
        loop {
            if let Some(core) = slot.resume_on.take() {
                CORE.with(|c| c.set(Some(core)));
                return;
            }
            if slot.retired || Session::current().is_some_and(|s| s.is_shut_down()) {
                drop(slot);
                retire_current();
            }
            slot = match self.wakeup.wait_timeout(slot, PARK_POLL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn retire(&self) {
        lock(&self.slot).retired = true;
        self.wakeup.notify_all();
    }
}

/// Saved execution state of a thread or of a core's helper.
pub struct SaveArea {
    baton: Arc<Baton>,
}

impl SaveArea {
    pub fn new() -> Self {
        Self { baton: Arc::new(Baton::default()) }
    }
}

impl Default for SaveArea {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SaveArea {
    /// A dropped save area belongs to a reaped thread whose host thread is
    /// parked for good; let it go.
    fn drop(&mut self) {
        self.baton.retire();
    }
}

/// Make `area` look like a thread that switched out right before `entry`.
/// The stack is not used: the host thread brings its own.
pub fn prime(area: &mut SaveArea, _stack: &mut [usize], entry: Entry) {
    lock(&area.baton.slot).entry = Some(entry);
}

/// Save the caller into `from` and resume whatever was saved in `to`.
///
/// # Safety
/// Both pointers must refer to live save areas. `to` must not be running.
/// `from` may be freed by someone else as soon as the switch has happened.
pub unsafe fn context_switch(from: *mut SaveArea, to: *const SaveArea) {
    let core = core_id();
    // SAFETY: the caller guarantees both save areas are live right now.
    // Clone the batons so nothing touches the save areas after the hand-off.
    let (mine, next) = unsafe { (Arc::clone(&(*from).baton), Arc::clone(&(*to).baton)) };

    if let Some(entry) = next.hand_to(core) {
        let session = match Session::current() {
            Some(s) => s,
            None => panic!("context_switch: host thread does not belong to a platform"),
        };
        let baton = Arc::clone(&next);
        session.launch("relay-thread".to_string(), move || {
            baton.wait();
            IRQ_ENABLED.with(|f| f.set(true));
            (entry.func)(entry.arg)
        });
    }

    mine.wait();
}

// ── Platform ────────────────────────────────────────────────────

/// The hosted machine: a timer the test drives by hand and a page-table
/// ledger that counts roots instead of allocating frames.
pub struct HostedPlatform {
    hz: u32,
    jiffies: AtomicU64,
    next_root: AtomicUsize,
    live_roots: AtomicUsize,
    dispatches: AtomicU64,
    session: Arc<Session>,
}

impl HostedPlatform {
    /// A platform whose timer ticks `hz` times per second.
    pub fn new(hz: u32) -> Self {
        Self {
            hz,
            jiffies: AtomicU64::new(0),
            next_root: AtomicUsize::new(1),
            live_roots: AtomicUsize::new(0),
            dispatches: AtomicU64::new(0),
            session: Arc::new(Session::default()),
        }
    }

    /// Bring up one host thread per configured core; each becomes that
    /// core's helper thread.
    pub fn start_cores(&'static self, kernel: &'static Kernel) {
        for core in 0..kernel.config().cores {
            self.session.launch(std::format!("relay-core-{core}"), move || {
                CORE.with(|c| c.set(Some(core)));
                IRQ_ENABLED.with(|f| f.set(true));
                kernel.boot_core()
            });
        }
    }

    /// Move the clock forward by `ticks`.
    pub fn advance(&self, ticks: u64) {
        self.jiffies.fetch_add(ticks, Ordering::SeqCst);
    }

    pub fn live_page_tables(&self) -> usize {
        self.live_roots.load(Ordering::SeqCst)
    }

    /// Number of times a core switched into a thread.
    pub fn dispatches(&self) -> u64 {
        self.dispatches.load(Ordering::SeqCst)
    }

    /// Messages of every host thread that died of a real panic.
    pub fn failures(&self) -> Vec<String> {
        lock(&self.session.failures).clone()
    }

    /// Retire every host thread of this platform and wait (bounded) for
    /// them to finish unwinding. Returns the number still running.
    pub fn shutdown(&self, grace: Duration) -> usize {
        self.session.shutdown.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + grace;
        loop {
            let running = self.session.running.load(Ordering::SeqCst);
            if running == 0 || Instant::now() >= deadline {
                return running;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl PageTables for HostedPlatform {
    fn create(&self) -> PageTableRoot {
        self.live_roots.fetch_add(1, Ordering::SeqCst);
        PageTableRoot(self.next_root.fetch_add(1, Ordering::SeqCst) << 12)
    }

    fn duplicate(&self, _parent: PageTableRoot) -> PageTableRoot {
        self.create()
    }

    fn unmap(&self, root: PageTableRoot, range: Range<usize>) {
        log::trace!("hosted: unmap {:#x}..{:#x} from root {:#x}", range.start, range.end, root.0);
    }

    fn free(&self, root: PageTableRoot) {
        let before = self.live_roots.fetch_sub(1, Ordering::SeqCst);
        assert!(before > 0, "hosted: freeing page table {:#x} with none live", root.0);
    }
}

impl Platform for HostedPlatform {
    fn jiffies(&self) -> u64 {
        self.jiffies.load(Ordering::SeqCst)
    }

    fn seconds_to_jiffies(&self, seconds: u32) -> u64 {
        u64::from(seconds) * u64::from(self.hz)
    }

    /// The boot core owns the tick count, the other cores only preempt.
    fn tick(&self, core: usize) {
        if core == 0 {
            self.jiffies.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn dispatch(&self, _core: usize, _interrupt_stack_top: usize, _root: PageTableRoot) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    fn page_tables(&self) -> &dyn PageTables {
        self
    }
}

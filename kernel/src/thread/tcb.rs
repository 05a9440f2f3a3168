// =============================================================================
// Relay — Thread Control Blocks
// =============================================================================
//
// A TCB is everything the kernel knows about one thread:
//
//   save_area — where the thread's registers go while it is switched out
//   stack     — its kernel stack, fixed size, allocated at spawn
//   wake_at   — deadline in jiffies, meaningful only on a sleep queue
//   link      — membership of at most one queue
//   process   — the owning process (shared with its sibling threads)
//   space     — the user address-space description
//   root      — the page-table root, installed on every dispatch
//   work      — the closure the thread runs, taken exactly once
//
// LIFETIME:
//   Created by `spawn`, owned by whichever queue or request holds it, or by
//   the active slot of the core running it. Destroyed only by the reaper:
//   dropping a TCB tears down the user mappings of its page tables and frees
//   the root.
// =============================================================================

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::fmt;

use super::state::Kernel;
use crate::arch::{self, Entry, PageTableRoot, SaveArea};
use crate::error::KernelError;
use crate::process::{AddressSpace, Process};
use crate::queue::{Link, Linked};
use crate::sync::interrupts::Interrupts;
use crate::sync::spinlock::SpinLock;

/// What a thread runs.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub usize);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread {}", self.0)
    }
}

pub struct Tcb {
    id: ThreadId,
    link: Link<Tcb>,
    save_area: UnsafeCell<SaveArea>,
    pub(crate) wake_at: u64,
    stack: Box<[usize]>,
    work: SpinLock<Option<Work>>,
    process: Arc<Process>,
    space: Arc<AddressSpace>,
    root: PageTableRoot,
    kernel: &'static Kernel,
}

// SAFETY: the save area is only touched by `block` on the thread's own core
// and by that core's helper, never concurrently. Everything else is either
// immutable after construction or behind a lock.
unsafe impl Send for Tcb {}
unsafe impl Sync for Tcb {}

unsafe impl Linked for Tcb {
    fn link(&self) -> &Link<Tcb> {
        &self.link
    }
}

impl Tcb {
    /// Allocate a TCB and its stack, primed so that the first switch to it
    /// enters `thread_entry`.
    pub(crate) fn new(
        kernel: &'static Kernel,
        id: ThreadId,
        work: Work,
        root: PageTableRoot,
        process: Arc<Process>,
        space: Arc<AddressSpace>,
    ) -> Result<Box<Tcb>, KernelError> {
        let config = kernel.config();
        let words = config.stack_words();
        let mut stack = Vec::new();
        stack
            .try_reserve_exact(words)
            .map_err(|_| KernelError::OutOfMemory { what: "thread stack", bytes: config.stack_bytes })?;
        stack.resize(words, 0);

        let mut tcb = Box::new(Tcb {
            id,
            link: Link::new(),
            save_area: UnsafeCell::new(SaveArea::new()),
            wake_at: 0,
            stack: stack.into_boxed_slice(),
            work: SpinLock::new(Some(work)),
            process,
            space,
            root,
            kernel,
        });

        let entry = Entry { func: thread_entry, arg: kernel as *const Kernel as usize };
        let t = &mut *tcb;
        arch::prime(t.save_area.get_mut(), &mut t.stack, entry);

        kernel.stats().thread_created();
        Ok(tcb)
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    pub fn address_space(&self) -> &Arc<AddressSpace> {
        &self.space
    }

    pub fn page_table_root(&self) -> PageTableRoot {
        self.root
    }

    /// Top of the kernel stack, where the CPU lands on an interrupt taken
    /// while this thread runs in user mode.
    pub(crate) fn interrupt_stack_top(&self) -> usize {
        self.stack.as_ptr_range().end as usize
    }

    pub(crate) fn save_area(&self) -> *mut SaveArea {
        self.save_area.get()
    }

    fn take_work(&self) -> Option<Work> {
        self.work.lock().take()
    }
}

impl Drop for Tcb {
    fn drop(&mut self) {
        let tables = self.kernel.platform().page_tables();
        tables.unmap(self.root, self.space.range());
        tables.free(self.root);
        self.kernel.stats().thread_destroyed();
    }
}

impl fmt::Debug for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcb")
            .field("id", &self.id)
            .field("pid", &self.process.pid())
            .field("root", &self.root)
            .field("queued", &self.link.is_queued())
            .finish_non_exhaustive()
    }
}

/// First code of every thread: run the work, then stop.
///
/// `C-unwind` because the hosted backend retires host threads by unwinding
/// through here.
extern "C-unwind" fn thread_entry(kernel: usize) -> ! {
    // SAFETY: `Tcb::new` primed us with the address of a `&'static Kernel`.
    let kernel = unsafe { &*(kernel as *const Kernel) };
    kassert!(!Interrupts::is_disabled(), "threads start with interrupts enabled");
    let work = match kernel.with_current(Tcb::take_work) {
        Some(work) => work,
        None => panic!("thread_entry: no current thread"),
    };
    if let Some(work) = work {
        work();
    }
    kernel.stop()
}

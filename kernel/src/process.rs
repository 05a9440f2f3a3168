// =============================================================================
// Relay — Process Records
// =============================================================================
//
// A process is what a thread belongs to: an id, a parent, children, and an
// exit status the parent can collect. The concurrency core only needs the
// part of a process that interacts with thread teardown:
//
//   - `Kernel::spawn_child` forks the caller's process. The child gets a
//     `Weak` back-reference to the parent; the parent's child table holds
//     the child strongly together with the child's exit promise.
//   - `Kernel::exit(status)` marks the process a zombie, fulfils its exit
//     promise and stops the thread.
//   - `Kernel::wait(pid)` blocks on the child's promise, then marks the
//     child terminated and forgets it.
//
// A process also owns a table of counting semaphores, addressed by small
// integer ids. A forked child starts with a copy of its parent's table: the
// entries are shared, so parent and child can synchronize through them.
// Closing an entry only affects the process that closes it.
//
// RETENTION:
//   A stopped thread whose process may still be waited for must not be
//   destroyed yet: the reaper keeps it while the parent is alive (the weak
//   reference still upgrades) and has not collected the status. Once the
//   parent is gone or has waited, the next reap pass destroys it.
// =============================================================================

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::ops::Range;

use crate::error::KernelError;
use crate::sync::blocking::{BlockingLock, Promise};
use crate::sync::semaphore::Semaphore;
use crate::sync::spinlock::SpinLock;
use crate::thread::Kernel;

/// Process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub usize);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// Capacity of a process' semaphore table.
pub const MAX_SEMAPHORES: usize = 100;

/// Index into a process' semaphore table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemaphoreId(pub usize);

impl fmt::Display for SemaphoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "semaphore {}", self.0)
    }
}

type SemaphoreTable = Vec<Option<Arc<Semaphore>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Blocked in `wait` for a child.
    Waiting,
    /// Exited, status not collected yet.
    Zombie,
    /// Status collected; nothing refers to the process any more.
    Terminated,
}

/// A child as seen from its parent.
struct Child {
    process: Arc<Process>,
    exit: Arc<Promise<i32>>,
}

pub struct Process {
    pid: Pid,
    parent: Weak<Process>,
    state: SpinLock<ProcessState>,
    exit: Arc<Promise<i32>>,
    children: BlockingLock<Vec<Child>>,
    semaphores: BlockingLock<SemaphoreTable>,
    kernel: &'static Kernel,
}

impl Process {
    /// A process without a parent.
    pub fn new(kernel: &'static Kernel, pid: Pid) -> Arc<Self> {
        Self::with_parent(kernel, pid, Weak::new(), Vec::new())
    }

    fn with_parent(kernel: &'static Kernel, pid: Pid, parent: Weak<Process>, semaphores: SemaphoreTable) -> Arc<Self> {
        Arc::new(Self {
            pid,
            parent,
            state: SpinLock::new(ProcessState::Running),
            exit: Arc::new(Promise::new(kernel)),
            children: BlockingLock::new(kernel, Vec::new()),
            semaphores: BlockingLock::new(kernel, semaphores),
            kernel,
        })
    }

    /// Create a child of `parent` and enter it in the parent's child table.
    /// The child shares every semaphore the parent has open. May block on
    /// the parent's tables.
    pub fn fork(kernel: &'static Kernel, parent: &Arc<Process>, pid: Pid) -> Arc<Process> {
        let inherited = parent.semaphores.lock().clone();
        let child = Self::with_parent(kernel, pid, Arc::downgrade(parent), inherited);
        parent.children.lock().push(Child {
            process: Arc::clone(&child),
            exit: Arc::clone(&child.exit),
        });
        child
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn parent(&self) -> Option<Arc<Process>> {
        self.parent.upgrade()
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ProcessState) {
        *self.state.lock() = state;
    }

    /// Move from `from` to `to`. Leaves any other state alone.
    pub(crate) fn change_state(&self, from: ProcessState, to: ProcessState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    /// Record the exit status. The status is visible to the parent through
    /// its child table even after this record is gone.
    ///
    /// Any thread of the process may exit. The first status wins; later
    /// ones are dropped.
    pub(crate) fn set_exit(&self, status: i32) {
        {
            let mut state = self.state.lock();
            if matches!(*state, ProcessState::Running | ProcessState::Waiting) {
                *state = ProcessState::Zombie;
            }
        }
        if !self.exit.try_set(status) {
            log::debug!("exit: {} already exited, status {} dropped", self.pid, status);
        }
    }

    /// The exit status, once some thread of the process has exited.
    pub fn exit_status(&self) -> Option<i32> {
        self.exit.try_get()
    }

    /// Whether a stopped thread of this process must be kept around: the
    /// parent still exists and has not collected the exit status.
    pub fn must_retain(&self) -> bool {
        self.parent.upgrade().is_some() && self.state() != ProcessState::Terminated
    }

    /// The exit promise of child `pid`, if it is ours. May block.
    pub(crate) fn child_exit(&self, pid: Pid) -> Option<(Arc<Process>, Arc<Promise<i32>>)> {
        let children = self.children.lock();
        children
            .iter()
            .find(|c| c.process.pid == pid)
            .map(|c| (Arc::clone(&c.process), Arc::clone(&c.exit)))
    }

    /// Drop child `pid` from the table. May block.
    pub(crate) fn forget_child(&self, pid: Pid) {
        self.children.lock().retain(|c| c.process.pid != pid);
    }

    /// Number of children not waited for yet. May block.
    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }

    /// Create a semaphore with `initial` units in the lowest free slot of
    /// the table. May block on the table's lock.
    pub fn open_semaphore(&self, initial: u32) -> Result<SemaphoreId, KernelError> {
        let mut table = self.semaphores.lock();
        let semaphore = Some(Arc::new(Semaphore::new(self.kernel, initial)));
        let id = match table.iter().position(Option::is_none) {
            Some(free) => {
                table[free] = semaphore;
                free
            }
            None if table.len() < MAX_SEMAPHORES => {
                table.push(semaphore);
                table.len() - 1
            }
            None => return Err(KernelError::TooManySemaphores),
        };
        Ok(SemaphoreId(id))
    }

    /// The semaphore open at `id`. May block on the table's lock.
    pub fn semaphore(&self, id: SemaphoreId) -> Result<Arc<Semaphore>, KernelError> {
        match self.semaphores.lock().get(id.0) {
            Some(Some(semaphore)) => Ok(Arc::clone(semaphore)),
            _ => Err(KernelError::NoSuchSemaphore(id)),
        }
    }

    /// Remove `id` from this process' table. Threads blocked on it stay
    /// blocked until some other holder ups it. May block.
    pub fn close_semaphore(&self, id: SemaphoreId) -> Result<(), KernelError> {
        let closed = self.semaphores.lock().get_mut(id.0).and_then(Option::take);
        match closed {
            Some(_) => Ok(()),
            None => Err(KernelError::NoSuchSemaphore(id)),
        }
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("parent", &self.parent.upgrade().map(|p| p.pid))
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// The user half of a thread's address space.
///
/// The pages themselves belong to the virtual-memory subsystem. The thread
/// layer only carries the range around so that reaping a thread can tear
/// down exactly the user mappings of its page tables.
#[derive(Debug, PartialEq, Eq)]
pub struct AddressSpace {
    range: Range<usize>,
}

impl AddressSpace {
    pub fn new(range: Range<usize>) -> Self {
        Self { range }
    }

    /// A copy for a forked child.
    pub fn duplicate(&self) -> Self {
        Self { range: self.range.clone() }
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }
}

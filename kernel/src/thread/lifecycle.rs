// =============================================================================
// Relay — Thread Lifecycle
// =============================================================================
//
//   spawn / spawn_in      — create a thread and make it ready. Never block.
//   spawn_child           — fork the caller's process and run `work` as the
//                           child's first thread; its return value becomes
//                           the child's exit status.
//   exit(status)          — publish the exit status, then stop.
//   wait(pid)             — collect the exit status of a child.
//   open_semaphore, semaphore_up, semaphore_down, close_semaphore
//                         — the calling process' semaphore table, which
//                           forked children inherit.
//
// Every entry point reaps first, so stopped threads never pile up for
// longer than it takes some thread to spawn, yield, sleep or stop.
// =============================================================================

use alloc::boxed::Box;
use alloc::sync::Arc;

use super::state::Kernel;
use super::tcb::{Tcb, ThreadId};
use crate::arch::PageTableRoot;
use crate::error::KernelError;
use crate::process::{AddressSpace, Pid, Process, ProcessState, SemaphoreId};
use crate::sync::semaphore::Semaphore;

impl Kernel {
    /// Start a kernel thread in a fresh process with fresh page tables.
    ///
    /// Panics if the thread's stack cannot be allocated; see `try_spawn`.
    pub fn spawn(&'static self, work: impl FnOnce() + Send + 'static) -> ThreadId {
        match self.try_spawn(work) {
            Ok(id) => id,
            Err(e) => panic!("spawn: {}", e),
        }
    }

    pub fn try_spawn(&'static self, work: impl FnOnce() + Send + 'static) -> Result<ThreadId, KernelError> {
        let root = self.platform().page_tables().create();
        let process = Process::new(self, self.next_pid());
        let space = Arc::new(AddressSpace::new(self.config().user_range.clone()));
        self.try_spawn_in(work, root, process, space)
    }

    /// Start a thread that shares `process` and `space`. The thread owns
    /// `root` from here on: it is freed when the thread is reaped.
    pub fn spawn_in(
        &'static self,
        work: impl FnOnce() + Send + 'static,
        root: PageTableRoot,
        process: Arc<Process>,
        space: Arc<AddressSpace>,
    ) -> ThreadId {
        match self.try_spawn_in(work, root, process, space) {
            Ok(id) => id,
            Err(e) => panic!("spawn_in: {}", e),
        }
    }

    /// Like `spawn_in`, but reports a failed stack allocation. On error
    /// `root` has already been freed.
    pub fn try_spawn_in(
        &'static self,
        work: impl FnOnce() + Send + 'static,
        root: PageTableRoot,
        process: Arc<Process>,
        space: Arc<AddressSpace>,
    ) -> Result<ThreadId, KernelError> {
        self.reap();
        let id = self.next_thread_id();
        let pid = process.pid();
        let tcb = match Tcb::new(self, id, Box::new(work), root, process, space) {
            Ok(tcb) => tcb,
            Err(e) => {
                log::warn!("spawn: {} of {} failed: {}", id, pid, e);
                self.platform().page_tables().free(root);
                return Err(e);
            }
        };
        log::debug!("spawn: {} in {}, root {:#x}", id, pid, root.0);
        self.make_ready(tcb);
        Ok(id)
    }

    /// Fork the calling thread's process. The child runs `work` in a copy
    /// of the caller's address space and exits with its return value.
    ///
    /// Must be called from a thread. May block on the parent's child table.
    pub fn spawn_child(&'static self, work: impl FnOnce() -> i32 + Send + 'static) -> Result<Pid, KernelError> {
        let caller = self.with_current(|me| (Arc::clone(me.process()), me.page_table_root(), Arc::clone(me.address_space())));
        let (parent, root, space) = match caller {
            Some(caller) => caller,
            None => panic!("spawn_child: called from a helper thread"),
        };
        let root = self.platform().page_tables().duplicate(root);
        let space = Arc::new(space.duplicate());
        let pid = self.next_pid();
        let child = Process::fork(self, &parent, pid);

        let spawned = self.try_spawn_in(
            move || {
                let status = work();
                self.exit(status)
            },
            root,
            child,
            space,
        );
        match spawned {
            Ok(_) => Ok(pid),
            Err(e) => {
                parent.forget_child(pid);
                Err(e)
            }
        }
    }

    /// Stop the calling thread with `status` as its process' exit status.
    pub fn exit(&self, status: i32) -> ! {
        let exited = self.with_current(|me| {
            log::debug!("exit: {} of {} with status {}", me.id(), me.process().pid(), status);
            me.process().set_exit(status);
        });
        if exited.is_none() {
            panic!("exit: called from a helper thread");
        }
        self.stop()
    }

    /// Block until child `pid` of the calling thread's process has exited,
    /// then return its exit status. Each child can be waited for once.
    pub fn wait(&self, pid: Pid) -> Result<i32, KernelError> {
        let me = self.caller_process("wait");
        let (child, exit) = me.child_exit(pid).ok_or(KernelError::NoSuchChild(pid))?;

        me.change_state(ProcessState::Running, ProcessState::Waiting);
        let status = exit.get();
        me.change_state(ProcessState::Waiting, ProcessState::Running);

        child.set_state(ProcessState::Terminated);
        me.forget_child(pid);
        drop(child);
        self.reap();
        Ok(status)
    }

    fn caller_process(&self, what: &str) -> Arc<Process> {
        match self.current_process() {
            Some(process) => process,
            None => panic!("{}: called from a helper thread", what),
        }
    }

    /// Open a semaphore with `initial` units in the calling process.
    pub fn open_semaphore(&self, initial: u32) -> Result<SemaphoreId, KernelError> {
        self.caller_process("open_semaphore").open_semaphore(initial)
    }

    pub fn semaphore_up(&self, id: SemaphoreId) -> Result<(), KernelError> {
        self.caller_semaphore("semaphore_up", id)?.up();
        Ok(())
    }

    /// Take a unit of semaphore `id`, blocking until one is available.
    pub fn semaphore_down(&self, id: SemaphoreId) -> Result<(), KernelError> {
        self.caller_semaphore("semaphore_down", id)?.down();
        Ok(())
    }

    pub fn close_semaphore(&self, id: SemaphoreId) -> Result<(), KernelError> {
        self.caller_process("close_semaphore").close_semaphore(id)
    }

    fn caller_semaphore(&self, what: &str, id: SemaphoreId) -> Result<Arc<Semaphore>, KernelError> {
        self.caller_process(what).semaphore(id).inspect_err(|e| log::debug!("{}: {}", what, e))
    }
}

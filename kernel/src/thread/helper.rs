// =============================================================================
// Relay — Per-core Helper Threads
// =============================================================================
//
// Every core becomes a helper thread when it boots. The helper is where
// all blocking transitions actually happen:
//
//   loop {
//       move due sleepers of this core to the ready queue
//       execute the pending request of this core, if any
//       take the next ready thread (spin until there is one)
//       mask interrupts, publish it as active, install its interrupt stack
//       and page tables, switch to it
//       ...the thread blocks: we are back here, unmask interrupts
//   }
//
// The helper never blocks, never allocates, and is never preempted (its
// core's active slot is null while it runs). Each step is O(1) except the
// sleep queue insert.
// =============================================================================

use alloc::boxed::Box;

use super::request::Request;
use super::state::Kernel;
use super::tcb::Tcb;
use crate::arch;
use crate::sync::interrupts::Interrupts;
use crate::sync::stuck::LoopWatch;

impl Kernel {
    /// Called by every core once the kernel is installed. Never returns:
    /// the core turns into its helper thread.
    pub fn boot_core(&self) -> ! {
        kassert!(self.in_helper_thread(), "boot_core: core {} already runs a thread", arch::core_id());
        log::info!("core {}: online", arch::core_id());
        self.stop()
    }

    pub(crate) fn helper_loop(&self) -> ! {
        let core = arch::core_id();
        kassert!(self.in_helper_thread(), "helper: core {} has an active thread", core);

        loop {
            kassert!(!Interrupts::is_disabled(), "helper: core {} runs with interrupts masked", core);
            kassert!(arch::core_id() == core, "helper for core {} moved to core {}", core, arch::core_id());

            self.wake_sleepers(core);

            if let Some(request) = self.take_request(core) {
                log::trace!("core {}: helping with {:?}", core, request);
                request.execute(self, core);
            }

            let next = self.next_ready(core);

            // Publishing the active thread enables preemption; keep the
            // timer out until we are on the thread's stack.
            arch::disable_interrupts();
            let save = next.save_area();
            self.platform().dispatch(core, next.interrupt_stack_top(), next.page_table_root());
            self.set_active(core, next);
            // SAFETY: `save` belongs to the TCB we just made active, which
            // nobody else can reach until it blocks again.
            unsafe { arch::context_switch(self.helpers.get(core), save) };
            arch::enable_interrupts();
        }
    }

    fn next_ready(&self, core: usize) -> Box<Tcb> {
        let mut idle = LoopWatch::idle("idle helper", self.config().idle_threshold);
        loop {
            if let Some(next) = self.ready.remove() {
                return next;
            }
            self.wake_sleepers(core);
            if idle.spin() {
                self.stats().idle_reported();
            }
            arch::spin_hint();
        }
    }

    /// Stop the calling thread for good. A core that has just booted (no
    /// current thread) becomes its helper instead.
    pub fn stop(&self) -> ! {
        if self.in_helper_thread() {
            self.helper_loop()
        }
        self.reap();
        self.block("stop", Request::Exit);
        panic!("stop: a stopped thread was resumed");
    }

    /// Give the core to the next ready thread, if there is one.
    pub fn yield_now(&self) {
        self.reap();
        // Unlocked peek: at worst a thread that just became ready waits a turn.
        if self.ready.is_empty() {
            return;
        }
        self.block("yield", Request::Ready);
    }
}

// =============================================================================
// Relay — Architecture Abstraction
// =============================================================================
//
// This module re-exports the current machine backend. The rest of the kernel
// uses `crate::arch::*` and never references a backend directly.
//
// Two backends exist:
//   x86_64/  — bare metal (`target_os = "none"`): real CLI/STI, a real
//              stack-switching context switch, core identity via GS.
//   hosted.rs — everything else: host threads stand in for cores, and a
//              context switch hands a baton from one host thread to another.
//              This is what `cargo test` runs on.
//
// Every backend provides the same free functions:
//   core_id()              — index of the calling core, O(1)
//   interrupts_enabled()   — the calling core's interrupt-enable flag
//   disable_interrupts()   — CLI
//   enable_interrupts()    — STI
//   spin_hint()            — PAUSE (or the host equivalent)
//   prime(..)              — make a fresh save area look switched-out
//   context_switch(..)     — save into one save area, resume from another
//
// and a `SaveArea` type. Per-kernel services that need state (the timer
// tick count, page tables, the interrupt stack of the running thread) go
// through the `Platform` trait instead.
// =============================================================================

use core::fmt;
use core::ops::Range;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86_64;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use self::x86_64::*;

#[cfg(not(target_os = "none"))]
pub mod hosted;

#[cfg(not(target_os = "none"))]
pub use self::hosted::{
    context_switch, core_id, disable_interrupts, enable_interrupts, interrupts_enabled, prime,
    spin_hint, HostedPlatform, SaveArea,
};

/// First code a freshly primed thread executes.
///
/// The entry function receives `arg` and never returns; a finished thread
/// leaves through `Kernel::stop`.
#[derive(Clone, Copy)]
pub struct Entry {
    pub func: extern "C-unwind" fn(usize) -> !,
    pub arg: usize,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("func", &(self.func as usize as *const ()))
            .field("arg", &format_args!("{:#x}", self.arg))
            .finish()
    }
}

/// Physical address (or backend-specific handle) of a top-level page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageTableRoot(pub usize);

/// Page-table duplication and teardown.
///
/// The virtual-memory subsystem owns the frames; the thread layer only
/// creates a root when a thread is spawned and tears it down when the
/// thread is reaped.
pub trait PageTables: Sync {
    /// A fresh root that shares the kernel half of the address space.
    fn create(&self) -> PageTableRoot;

    /// A fresh root whose user half is a copy of `parent`'s.
    fn duplicate(&self, parent: PageTableRoot) -> PageTableRoot;

    /// Remove every user mapping of `root` inside `range`.
    fn unmap(&self, root: PageTableRoot, range: Range<usize>);

    /// Return the root's frame. `root` must not be active on any core.
    fn free(&self, root: PageTableRoot);
}

/// Machine services that carry per-kernel state.
pub trait Platform: Sync {
    /// Monotonic timer tick count ("jiffies").
    fn jiffies(&self) -> u64;

    /// Wall seconds expressed in timer ticks.
    fn seconds_to_jiffies(&self, seconds: u32) -> u64;

    /// Account for one timer interrupt on `core`.
    fn tick(&self, core: usize);

    /// Prepare `core` to run a thread: install its kernel stack top for
    /// interrupt re-entry and activate its page tables. Runs with
    /// interrupts disabled, right before the switch.
    fn dispatch(&self, core: usize, interrupt_stack_top: usize, root: PageTableRoot);

    fn page_tables(&self) -> &dyn PageTables;
}

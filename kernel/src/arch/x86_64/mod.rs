// =============================================================================
// Relay — x86_64 Bare-Metal Backend
// =============================================================================
//
// The machine half of the concurrency core on a real x86_64 kernel:
//
//   cpu.rs     — HLT, CR3, MSR access
//   serial.rs  — COM1, usable as the kernel console
//
// CORE IDENTITY:
//   Every core points its GS base at its own entry of `CORE_IDS` during
//   bring-up (`attach_core`). `core_id()` is then one `mov` from gs:[0]
//   and stays correct across migrations, because it reads the core the
//   instruction actually executes on.
//
// CONTEXT SWITCH:
//   A save area holds one word: the stack pointer of the switched-out
//   context. Everything else lives on that stack. `relay_switch` pushes
//   the callee-saved registers and RFLAGS (so the interrupt flag travels
//   with the thread), stores RSP, loads the other RSP and pops in reverse.
//
//   A fresh thread's stack is primed with exactly the frame
//   `relay_switch` would have left behind, returning into
//   `relay_thread_start`, which calls the entry function with its
//   argument:
//
//     top ─►  (16-byte aligned)
//             relay_thread_start   ← ret
//             0                    ← rbp
//             arg                  ← rbx
//             func                 ← r12
//             0, 0, 0              ← r13, r14, r15
//             0x202                ← RFLAGS (IF set)   ◄── save.rsp
// =============================================================================

pub mod cpu;
pub mod serial;

use core::arch::{asm, global_asm};
use core::sync::atomic::{AtomicU64, Ordering};

use ::x86_64::instructions::interrupts;

pub use self::cpu::halt_forever;
use super::{Entry, PageTableRoot, PageTables, Platform};
use crate::config::MAX_CORES;

const IA32_GS_BASE: u32 = 0xC000_0101;

/// RFLAGS of a fresh thread: interrupts enabled, reserved bit 1 set.
const INITIAL_RFLAGS: usize = 0x202;

static CORE_IDS: [u32; MAX_CORES] = {
    let mut ids = [0; MAX_CORES];
    let mut i = 0;
    while i < MAX_CORES {
        ids[i] = i as u32;
        i += 1;
    }
    ids
};

/// Bind the calling core to index `core`. Once per core, during bring-up,
/// before anything calls `core_id`.
pub fn attach_core(core: usize) {
    kassert!(core < MAX_CORES, "attach_core: core {} out of range", core);
    // SAFETY: IA32_GS_BASE exists on every x86_64 CPU; the target is a
    // static that lives forever.
    unsafe { cpu::write_msr(IA32_GS_BASE, &CORE_IDS[core] as *const u32 as u64) };
}

#[inline]
pub fn core_id() -> usize {
    let id: u32;
    // SAFETY: `attach_core` pointed GS at a `u32` of `CORE_IDS`.
    unsafe { asm!("mov {0:e}, gs:[0]", out(reg) id, options(nostack, readonly, preserves_flags)) };
    id as usize
}

#[inline]
pub fn interrupts_enabled() -> bool {
    interrupts::are_enabled()
}

#[inline]
pub fn disable_interrupts() {
    interrupts::disable();
}

#[inline]
pub fn enable_interrupts() {
    interrupts::enable();
}

#[inline]
pub fn spin_hint() {
    core::hint::spin_loop();
}

// ── Context switch ──────────────────────────────────────────────

#[repr(C)]
pub struct SaveArea {
    rsp: usize,
}

impl SaveArea {
    pub const fn new() -> Self {
        Self { rsp: 0 }
    }
}

impl Default for SaveArea {
    fn default() -> Self {
        Self::new()
    }
}

global_asm!(
    ".global relay_switch",
    "relay_switch:",
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "pushfq",
    "mov [rdi], rsp",
    "mov rsp, [rsi]",
    "popfq",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "ret",
    "",
    ".global relay_thread_start",
    "relay_thread_start:",
    "mov rdi, rbx",
    "and rsp, -16",
    "call r12",
    "ud2",
);

unsafe extern "C" {
    fn relay_switch(from: *mut SaveArea, to: *const SaveArea);
    fn relay_thread_start();
}

/// Make `area` look like a thread that switched out right before `entry`.
pub fn prime(area: &mut SaveArea, stack: &mut [usize], entry: Entry) {
    let frame = [
        INITIAL_RFLAGS,
        0,
        0,
        0,
        entry.func as usize,
        entry.arg,
        0,
        relay_thread_start as usize,
    ];
    let misalign = (stack.as_ptr_range().end as usize % 16) / size_of::<usize>();
    let end = stack.len() - misalign;
    kassert!(end >= frame.len(), "prime: stack of {} words is too small", stack.len());
    let start = end - frame.len();
    stack[start..end].copy_from_slice(&frame);
    area.rsp = &stack[start] as *const usize as usize;
}

/// Save the caller into `from` and resume whatever was saved in `to`.
///
/// # Safety
/// Both pointers must refer to live save areas. `to` must hold a context
/// that is not running. The stack saved into `from` must stay allocated
/// until something switches back to it.
#[inline]
pub unsafe fn context_switch(from: *mut SaveArea, to: *const SaveArea) {
    // SAFETY: forwarded to the caller.
    unsafe { relay_switch(from, to) }
}

// ── Platform ────────────────────────────────────────────────────

/// The bare-metal machine. The embedding kernel supplies its page-table
/// manager and a hook that installs a core's interrupt stack (RSP0 of its
/// TSS); the timer interrupt calls `Kernel::timer_interrupt`, which ticks
/// this platform.
pub struct BareMetal {
    hz: u32,
    jiffies: AtomicU64,
    tables: &'static dyn PageTables,
    set_interrupt_stack: fn(core: usize, top: usize),
}

impl BareMetal {
    pub const fn new(hz: u32, tables: &'static dyn PageTables, set_interrupt_stack: fn(usize, usize)) -> Self {
        Self { hz, jiffies: AtomicU64::new(0), tables, set_interrupt_stack }
    }
}

impl Platform for BareMetal {
    fn jiffies(&self) -> u64 {
        self.jiffies.load(Ordering::SeqCst)
    }

    fn seconds_to_jiffies(&self, seconds: u32) -> u64 {
        u64::from(seconds) * u64::from(self.hz)
    }

    fn tick(&self, core: usize) {
        if core == 0 {
            self.jiffies.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn dispatch(&self, core: usize, interrupt_stack_top: usize, root: PageTableRoot) {
        (self.set_interrupt_stack)(core, interrupt_stack_top);
        let root = root.0 as u64;
        if cpu::read_cr3() & !0xFFF != root {
            // SAFETY: `root` came from `tables`, which maps the kernel half
            // into every root it hands out.
            unsafe { cpu::write_cr3(root) };
        }
    }

    fn page_tables(&self) -> &dyn PageTables {
        self.tables
    }
}

// =============================================================================
// Relay — CPU Utilities (x86_64)
// =============================================================================
//
// Thin wrappers around the privileged instructions the backend needs. No
// logic beyond executing the instruction.
// =============================================================================

/// Stop the calling core for good: interrupts off, HLT in a loop.
#[inline(always)]
pub fn halt_forever() -> ! {
    loop {
        // SAFETY: CLI + HLT only stops this core.
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack));
        }
    }
}

/// Physical address of the active top-level page table, plus flag bits.
#[inline]
pub fn read_cr3() -> u64 {
    let value: u64;
    // SAFETY: reading CR3 has no side effects.
    unsafe {
        core::arch::asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

/// Switch address spaces. Flushes the non-global TLB entries.
///
/// # Safety
/// `value` must be a valid, 4 KiB-aligned PML4 that maps the code and
/// stack currently executing.
#[inline]
pub unsafe fn write_cr3(value: u64) {
    // SAFETY: forwarded to the caller.
    unsafe {
        core::arch::asm!("mov cr3, {}", in(reg) value, options(nostack, preserves_flags));
    }
}

/// # Safety
/// `msr` must exist on this CPU and `value` must be valid for it.
#[inline]
pub unsafe fn write_msr(msr: u32, value: u64) {
    let low = value as u32;
    let high = (value >> 32) as u32;
    // SAFETY: forwarded to the caller.
    unsafe {
        core::arch::asm!("wrmsr", in("ecx") msr, in("eax") low, in("edx") high, options(nomem, nostack));
    }
}

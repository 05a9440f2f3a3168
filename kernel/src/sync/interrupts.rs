//! Interrupt masking on the calling core.
//!
//! The pattern everywhere in the core is save/disable/restore:
//!
//! ```ignore
//! let was = Interrupts::disable();
//! // O(1) work that must not be interrupted on this core
//! Interrupts::restore(was);
//! ```
//!
//! `restore` puts back exactly the state `disable` found, so nested
//! critical sections compose.

use crate::arch;

pub struct Interrupts;

impl Interrupts {
    #[inline]
    pub fn is_disabled() -> bool {
        !arch::interrupts_enabled()
    }

    /// Disable interrupts, returning whether they were already disabled.
    #[inline]
    pub fn disable() -> bool {
        let was = Self::is_disabled();
        arch::disable_interrupts();
        was
    }

    /// Undo one `disable`.
    #[inline]
    pub fn restore(was_disabled: bool) {
        if !was_disabled {
            arch::enable_interrupts();
        }
    }

    /// Run `f` with interrupts disabled.
    pub fn protect<R>(f: impl FnOnce() -> R) -> R {
        let was = Self::disable();
        let out = f();
        Self::restore(was);
        out
    }
}

// =============================================================================
// Relay — Kernel Errors
// =============================================================================
//
// Two kinds of failure exist in the core:
//
//   1. Broken invariants (a TCB on two queues, a thread blocking from the
//      helper, a request slot that is already taken). These are kernel bugs.
//      They go through `kassert!` / `panic!` and halt the core.
//
//   2. Conditions a caller can act on (no memory for a stack, waiting for a
//      pid that is not our child). These are `KernelError`s, returned as
//      `Result` so the caller decides.
//
// Nothing in the core retries.
// =============================================================================

use core::fmt;

use crate::config::MAX_CORES;
use crate::process::{Pid, SemaphoreId, MAX_SEMAPHORES};

/// A failure the caller can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// An allocation the caller asked for could not be satisfied.
    OutOfMemory { what: &'static str, bytes: usize },

    /// `wait` was called with a pid that is not a live child of the caller.
    NoSuchChild(Pid),

    /// No semaphore is open at this id in the caller's process.
    NoSuchSemaphore(SemaphoreId),

    /// The caller's semaphore table is full.
    TooManySemaphores,

    /// The configuration asks for more cores than the core supports.
    TooManyCores { requested: usize },

    /// The configuration asks for no cores or a stack too small to be useful.
    BadConfig(&'static str),

    /// The boot-time kernel has already been installed.
    AlreadyInitialized,

    /// Another `log` implementation was installed first.
    LoggerAlreadySet,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory { what, bytes } => {
                write!(f, "out of memory allocating {what} ({bytes} bytes)")
            }
            KernelError::NoSuchChild(pid) => write!(f, "{pid} is not a child of the caller"),
            KernelError::NoSuchSemaphore(id) => write!(f, "{id} is not open in the caller's process"),
            KernelError::TooManySemaphores => {
                write!(f, "semaphore table full ({MAX_SEMAPHORES} entries)")
            }
            KernelError::TooManyCores { requested } => {
                write!(f, "{requested} cores requested, at most {MAX_CORES} supported")
            }
            KernelError::BadConfig(why) => write!(f, "bad configuration: {why}"),
            KernelError::AlreadyInitialized => f.write_str("kernel already initialized"),
            KernelError::LoggerAlreadySet => f.write_str("a logger is already installed"),
        }
    }
}

/// Fatal assertion for kernel invariants.
///
/// Unlike `assert!`, the failure message always names the broken invariant
/// first, so a panic dump on a serial line is readable on its own.
#[macro_export]
macro_rules! kassert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            panic!("kassert({}) failed: {}", stringify!($cond), format_args!($($arg)+));
        }
    };
    ($cond:expr $(,)?) => {
        if !$cond {
            panic!("kassert({}) failed", stringify!($cond));
        }
    };
}

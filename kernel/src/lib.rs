// =============================================================================
// Relay — Kernel Concurrency Core
// =============================================================================
//
// Everything a small SMP kernel needs in order to let code block:
//
//   sync/     — interrupt masking, SeqCst atomics, the exchange spinlock,
//               the counting semaphore and the blocking primitives built on
//               top of it (queue, lock, barrier, bounded buffer, promise)
//   queue.rs  — the one intrusive FIFO used for every queue role
//   thread/   — TCBs, the per-core helper threads, sleep queues, the reaper
//               and the `Kernel` object that ties them together
//   process.rs — process records with wait/exit semantics
//   arch/     — the machine: bare-metal x86_64 or the hosted emulation
//
// THE CENTRAL IDEA:
//   Blocking is never done by the blocked thread itself. A thread that wants
//   to block packages what should happen to it into a `Request`, hands its
//   own TCB to that request, and switches to its core's helper thread. The
//   helper is never preempted and only ever does O(1) work before it picks
//   the next ready thread. Interrupt handlers and spinlock holders therefore
//   never have to wait for anything.
//
// Crate-level attributes:
//   #![no_std]: the core runs inside a kernel. On hosted targets we still
//   link `std`, but only the hosted backend (and the tests) use it.
// =============================================================================

#![no_std]

extern crate alloc;

#[cfg(not(target_os = "none"))]
extern crate std;

#[macro_use]
pub mod error;

#[macro_use]
pub mod util;

pub mod arch;
pub mod config;
pub mod process;
pub mod queue;
pub mod sync;
pub mod thread;

#[cfg(test)]
mod testing;

pub use config::{Config, MAX_CORES};
pub use error::KernelError;
pub use process::{AddressSpace, Pid, Process, ProcessState, SemaphoreId};
pub use sync::semaphore::Semaphore;
pub use thread::{Kernel, ThreadId};

// =============================================================================
// Relay — Kernel Synchronization Primitives
// =============================================================================
//
// Two families of primitives live here:
//
//   Spinning (safe anywhere, including the helper threads and interrupt
//   handlers):
//     atomic.rs     — SeqCst atomics over machine words
//     interrupts.rs — per-core interrupt masking
//     spinlock.rs   — exchange spinlock that masks interrupts while held,
//                     plus the `RawLock` strategies used by `Queue`
//     stuck.rs      — advisory detector for busy-wait loops that never end
//
//   Blocking (threads only, never the helper, never with a spinlock held):
//     semaphore.rs  — the counting semaphore, the only thing that blocks
//     blocking/     — queue, lock, barrier, bounded buffer and promise,
//                     all built from semaphores
//
// LOCK ORDERING:
//   The core never nests spinlocks. `Semaphore::up` and the helper's half
//   of `down` release the semaphore's spinlock before the woken thread goes
//   onto the ready queue, and nothing takes a semaphore's spinlock while
//   holding the ready queue lock.
// =============================================================================

pub mod atomic;
pub mod blocking;
pub mod interrupts;
pub mod semaphore;
pub mod spinlock;
pub mod stuck;

pub use atomic::Atomic;
pub use interrupts::Interrupts;
pub use semaphore::Semaphore;
pub use spinlock::{NoLock, RawLock, RawSpinLock, SpinLock, SpinLockGuard};

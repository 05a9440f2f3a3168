//! Blocking primitives built from semaphores.
//!
//! Everything here may block the calling thread, so none of it may be used
//! from a helper thread, an interrupt handler, or with a spinlock held.
//! Operations documented as "never blocks" are the exception.

mod barrier;
mod buffer;
mod lock;
mod promise;
mod queue;

pub use barrier::Barrier;
pub use buffer::BoundedBuffer;
pub use lock::{BlockingLock, BlockingLockGuard};
pub use promise::Promise;
pub use queue::BlockingQueue;

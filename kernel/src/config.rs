// =============================================================================
// Relay — Boot-time Configuration
// =============================================================================
//
// All tunables of the concurrency core in one place. A `Config` is handed to
// `Kernel::new` once at boot and never changes afterwards.
//
//   cores           — number of cores that will run `Kernel::boot_core`
//   stack_bytes     — size of every thread's kernel stack
//   stuck_threshold — spins before a busy-wait loop logs a warning (0 = off)
//   idle_threshold  — empty polls of the ready queue before an idle helper
//                     reports itself (0 = off)
//   user_range      — the user half of every address space; torn down when
//                     a thread is reaped
// =============================================================================

use core::ops::Range;

use crate::error::KernelError;

/// Upper bound on the number of cores. Per-core tables are sized at boot,
/// this only bounds what a configuration may ask for.
pub const MAX_CORES: usize = 16;

/// Default kernel stack size: 2K machine words on a 32-bit machine, 1K on a
/// 64-bit one.
pub const DEFAULT_STACK_BYTES: usize = 8 * 1024;

/// Default number of spins before a busy-wait loop reports itself.
pub const DEFAULT_STUCK_THRESHOLD: u32 = 1_000_000;

/// Default number of empty ready-queue polls before an idle helper reports.
/// Idling is normal, so this is far above the stuck threshold.
pub const DEFAULT_IDLE_THRESHOLD: u32 = 100_000_000;

/// Default user virtual range `[2 GiB, 3.75 GiB)`.
pub const DEFAULT_USER_RANGE: Range<usize> = 0x8000_0000..0xF000_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub cores: usize,
    pub stack_bytes: usize,
    pub stuck_threshold: u32,
    pub idle_threshold: u32,
    pub user_range: Range<usize>,
}

impl Config {
    pub const fn new(cores: usize) -> Self {
        Self {
            cores,
            stack_bytes: DEFAULT_STACK_BYTES,
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            user_range: DEFAULT_USER_RANGE,
        }
    }

    pub const fn with_stack_bytes(mut self, bytes: usize) -> Self {
        self.stack_bytes = bytes;
        self
    }

    pub const fn with_stuck_threshold(mut self, spins: u32) -> Self {
        self.stuck_threshold = spins;
        self
    }

    pub const fn with_idle_threshold(mut self, polls: u32) -> Self {
        self.idle_threshold = polls;
        self
    }

    pub const fn with_user_range(mut self, range: Range<usize>) -> Self {
        self.user_range = range;
        self
    }

    /// Reject configurations the core cannot run with.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.cores == 0 {
            return Err(KernelError::BadConfig("at least one core is required"));
        }
        if self.cores > MAX_CORES {
            return Err(KernelError::TooManyCores { requested: self.cores });
        }
        // Room for the priming frame plus some actual work.
        if self.stack_bytes < 1024 {
            return Err(KernelError::BadConfig("thread stacks must be at least 1 KiB"));
        }
        if self.user_range.start >= self.user_range.end {
            return Err(KernelError::BadConfig("user range is empty"));
        }
        Ok(())
    }

    /// Stack size in machine words, rounded up.
    pub(crate) fn stack_words(&self) -> usize {
        self.stack_bytes.div_ceil(core::mem::size_of::<usize>())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.cores, 1);
        assert_eq!(c.stack_bytes, 8192);
        assert!(c.idle_threshold > c.stuck_threshold);
        assert_eq!(c.user_range, 0x8000_0000..0xF000_0000);
        assert_eq!(c.validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_core_counts() {
        assert_eq!(
            Config::new(0).validate(),
            Err(KernelError::BadConfig("at least one core is required"))
        );
        assert_eq!(
            Config::new(MAX_CORES + 1).validate(),
            Err(KernelError::TooManyCores { requested: MAX_CORES + 1 })
        );
        assert_eq!(Config::new(MAX_CORES).validate(), Ok(()));
    }

    #[test]
    fn rejects_tiny_stacks_and_empty_ranges() {
        assert!(Config::new(2).with_stack_bytes(64).validate().is_err());
        assert!(Config::new(2).with_user_range(0x1000..0x1000).validate().is_err());
    }

    #[test]
    fn stack_words_round_up() {
        let word = core::mem::size_of::<usize>();
        assert_eq!(Config::new(1).with_stack_bytes(1024 + 1).stack_words(), 1024 / word + 1);
    }
}

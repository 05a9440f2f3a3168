//! Busy-wait loop watchdog.
//!
//! Purely advisory: a loop that spins more than the threshold logs one
//! warning and starts counting again. A lock held across a blocking call
//! shows up in the log instead of as a silent hang.
//!
//! Idle helpers polling an empty ready queue use their own watch with their
//! own threshold, and report at `info` rather than `warn`.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::config::DEFAULT_STUCK_THRESHOLD;

static THRESHOLD: AtomicU32 = AtomicU32::new(DEFAULT_STUCK_THRESHOLD);

/// Set the spin count after which loops report themselves. 0 turns the
/// watchdog off.
pub fn set_threshold(spins: u32) {
    THRESHOLD.store(spins, Ordering::Relaxed);
}

pub fn threshold() -> u32 {
    THRESHOLD.load(Ordering::Relaxed)
}

/// Counts the iterations of one busy-wait loop.
pub struct LoopWatch {
    what: &'static str,
    spins: u32,
    limit: u32,
    reports: u32,
    level: log::Level,
}

impl LoopWatch {
    pub fn new(what: &'static str) -> Self {
        Self::with_threshold(what, threshold())
    }

    pub fn with_threshold(what: &'static str, limit: u32) -> Self {
        Self { what, spins: 0, limit, reports: 0, level: log::Level::Warn }
    }

    /// A watch for a loop that is expected to wait, possibly for long.
    pub fn idle(what: &'static str, limit: u32) -> Self {
        Self { level: log::Level::Info, ..Self::with_threshold(what, limit) }
    }

    /// Record one more iteration. Returns whether this one was reported.
    pub fn spin(&mut self) -> bool {
        if self.limit == 0 {
            return false;
        }
        self.spins += 1;
        if self.spins < self.limit {
            return false;
        }
        self.reports += 1;
        log::log!(
            self.level,
            "stuck: {} spun {} times (report #{})",
            self.what,
            self.limit,
            self.reports
        );
        self.spins = 0;
        true
    }

    /// How many times this loop has reported itself.
    pub fn reports(&self) -> u32 {
        self.reports
    }
}

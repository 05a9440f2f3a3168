//! Test rig: a kernel on hosted cores.
//!
//! Every test boots its own kernel. Kernels, and anything the test's
//! threads share, are leaked: threads hold `&'static` references and the
//! rig cannot prove they are all gone.

use std::boxed::Box;
use std::string::String;
use std::thread;
use std::time::{Duration, Instant};
use std::vec::Vec;

use crate::arch::HostedPlatform;
use crate::config::Config;
use crate::thread::Kernel;

const TIMER_HZ: u32 = 100;
const PATIENCE: Duration = Duration::from_secs(10);
const GRACE: Duration = Duration::from_secs(2);

pub fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

pub fn platform() -> &'static HostedPlatform {
    leak(HostedPlatform::new(TIMER_HZ))
}

pub struct Rig {
    pub kernel: &'static Kernel,
    pub platform: &'static HostedPlatform,
}

/// A kernel on `cores` hosted cores. The cores are not running yet, so the
/// test can spawn its threads first and `start` them all at once.
pub fn boot(cores: usize) -> Rig {
    boot_with(Config::new(cores))
}

pub fn boot_with(config: Config) -> Rig {
    let platform = platform();
    let kernel = match Kernel::new(config, platform) {
        Ok(kernel) => kernel.leak(),
        Err(e) => panic!("rig: {e}"),
    };
    Rig { kernel, platform }
}

impl Rig {
    pub fn start(&self) {
        self.platform.start_cores(self.kernel);
    }

    /// Poll `cond` until it holds. Fails the test if it does not within a
    /// generous timeout, or as soon as any kernel thread panicked.
    pub fn wait_for(&self, what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + PATIENCE;
        loop {
            let failures = self.platform.failures();
            if !failures.is_empty() {
                panic!("while waiting for {what}: kernel threads panicked: {failures:#?}");
            }
            if cond() {
                return;
            }
            if Instant::now() >= deadline {
                panic!("timed out waiting for {what}; {:?}", self.kernel);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        // A thread still running test code retires at its next spin or
        // switch; it cannot touch another rig's kernel.
        let stragglers = self.platform.shutdown(GRACE);
        if stragglers != 0 {
            let failures: Vec<String> = self.platform.failures();
            std::eprintln!("rig: {stragglers} host threads still running; failures: {failures:#?}");
        }
    }
}

// =============================================================================
// Relay — Threads and Scheduling
// =============================================================================
//
// A thread is a TCB plus a kernel stack. It is always in exactly one of
// these places:
//
//   running   — published in its core's active slot
//   ready     — on the global ready queue
//   sleeping  — on the sleep queue of the core it fell asleep on
//   blocked   — on a semaphore's wait list
//   requested — inside its core's pending request, between `block` and the
//               helper picking the request up
//   stopped   — on the reaper queue or the retained list
//
//   Ready → Running → { Ready, Sleeping → Ready, Blocked → Ready,
//                       Stopped → destroyed }
//
// Submodules:
//   state     — the `Kernel` object, `with_current`, `block`, preemption
//   tcb       — thread control blocks and the thread entry trampoline
//   request   — what a blocking thread asks its helper to do
//   helper    — the per-core helper loop, `stop`, `yield_now`
//   sleep     — per-core sleep queues
//   reaper    — destruction and retention of stopped threads
//   lifecycle — spawn, fork, exit, wait
// =============================================================================

mod helper;
mod lifecycle;
mod reaper;
mod request;
mod sleep;
mod state;
mod tcb;

pub use state::{Kernel, ThreadStats};
pub use tcb::{Tcb, ThreadId, Work};

pub(crate) use request::Request;

use crate::arch::Platform;
use crate::config::Config;
use crate::error::KernelError;

static KERNEL: spin::Once<Kernel> = spin::Once::new();

/// Install the boot-time kernel and start its reaper. After this every core
/// calls `boot_core` on the returned kernel.
pub fn init(config: Config, platform: &'static dyn Platform) -> Result<&'static Kernel, KernelError> {
    let mut fresh = false;
    let kernel = KERNEL.try_call_once(|| {
        fresh = true;
        Kernel::new(config, platform)
    })?;
    if !fresh {
        return Err(KernelError::AlreadyInitialized);
    }
    kernel.start();
    Ok(kernel)
}

/// The kernel installed by `init`, if any.
pub fn kernel() -> Option<&'static Kernel> {
    KERNEL.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{Pid, Process, ProcessState};
    use alloc::sync::Arc;
    use crate::sync::atomic::Atomic;
    use crate::sync::SpinLock;
    use crate::testing;
    use alloc::vec::Vec;
    use proptest::prelude::*;

    #[test]
    fn init_installs_once() {
        let platform = testing::platform();
        let kernel = init(Config::new(1), platform).unwrap();
        assert!(core::ptr::eq(super::kernel().unwrap(), kernel));
        assert_eq!(init(Config::new(2), platform).err(), Some(KernelError::AlreadyInitialized));
        assert_eq!(kernel.config().cores, 1);
        assert_eq!(kernel.stats().spawned(), 1, "the reaper");
    }

    #[test]
    fn yielding_threads_alternate_on_one_core() {
        let rig = testing::boot(1);
        let kernel = rig.kernel;
        let log: &'static SpinLock<Vec<char>> = testing::leak(SpinLock::new(Vec::new()));

        for name in ['a', 'b'] {
            kernel.spawn(move || {
                for _ in 0..10 {
                    log.lock().push(name);
                    kernel.yield_now();
                }
            });
        }
        rig.start();
        rig.wait_for("both threads finished", || log.lock().len() == 20);

        let expected: Vec<char> = "ab".repeat(10).chars().collect();
        assert_eq!(*log.lock(), expected);
    }

    #[test]
    fn yield_without_competition_returns_at_once() {
        let rig = testing::boot(1);
        let kernel = rig.kernel;
        let done: &'static Atomic<bool> = testing::leak(Atomic::new(false));

        kernel.spawn(move || {
            for _ in 0..100 {
                kernel.yield_now();
            }
            done.store(true);
        });
        rig.start();
        rig.wait_for("thread finished", || done.load());
    }

    #[test]
    fn timer_interrupt_preempts_a_spinning_thread() {
        let rig = testing::boot(1);
        let kernel = rig.kernel;
        let release: &'static Atomic<bool> = testing::leak(Atomic::new(false));
        let spins: &'static Atomic<u32> = testing::leak(Atomic::new(0));

        kernel.spawn(move || {
            while !release.load() {
                spins.fetch_add(1);
                kernel.timer_interrupt();
            }
        });
        kernel.spawn(move || release.store(true));
        rig.start();

        rig.wait_for("spinner got preempted and released", || release.load() && rig.kernel.stats().live_tcbs() == 1);
        assert!(spins.load() >= 1);
        assert!(rig.platform.jiffies() >= 1, "core 0 counts ticks");
    }

    #[test]
    fn helpers_are_never_preempted() {
        let rig = testing::boot(1);
        let kernel = rig.kernel;
        let seen: &'static Atomic<bool> = testing::leak(Atomic::new(false));

        kernel.spawn(move || {
            assert!(!kernel.in_helper_thread());
            assert!(!kernel.preemption_is_disabled());
            crate::sync::Interrupts::protect(|| assert!(kernel.preemption_is_disabled()));
            seen.store(true);
        });
        rig.start();
        rig.wait_for("checks ran", || seen.load());
        assert!(rig.platform.failures().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        /// M threads on N cores, each adding to one spinlocked counter.
        #[test]
        fn spinlocked_counter_sees_every_increment(cores in 1usize..=4, threads in 1u32..8) {
            const ROUNDS: u32 = 500;
            let rig = testing::boot(cores);
            let kernel = rig.kernel;
            let counter: &'static SpinLock<u32> = testing::leak(SpinLock::new(0));
            let finished: &'static Atomic<u32> = testing::leak(Atomic::new(0));

            for _ in 0..threads {
                kernel.spawn(move || {
                    for i in 0..ROUNDS {
                        *counter.lock() += 1;
                        if i % 100 == 0 {
                            kernel.yield_now();
                        }
                    }
                    finished.fetch_add(1);
                });
            }
            rig.start();
            rig.wait_for("every counting thread finished", || finished.load() == threads);
            prop_assert_eq!(*counter.lock(), threads * ROUNDS);
        }
    }

    #[test]
    fn stopped_threads_release_everything() {
        let rig = testing::boot(2);
        let kernel = rig.kernel;
        let ran: &'static Atomic<u32> = testing::leak(Atomic::new(0));

        for _ in 0..50 {
            kernel.spawn(move || {
                ran.fetch_add(1);
            });
        }
        rig.start();
        rig.wait_for("every thread was reaped", || kernel.stats().reaped() == 50);

        let stats = kernel.stats();
        assert_eq!(ran.load(), 50);
        assert_eq!(stats.spawned(), 51);
        assert_eq!(stats.live_tcbs(), 1, "only the reaper is left");
        assert_eq!(stats.live_stacks(), 1);
        assert_eq!(rig.platform.live_page_tables(), 1);
    }

    #[test]
    fn threads_can_stop_explicitly() {
        let rig = testing::boot(1);
        let kernel = rig.kernel;
        let before: &'static Atomic<bool> = testing::leak(Atomic::new(false));

        kernel.spawn(move || {
            before.store(true);
            kernel.stop()
        });
        rig.start();
        rig.wait_for("thread reaped", || kernel.stats().reaped() == 1);
        assert!(before.load());
        assert_eq!(kernel.stats().live_tcbs(), 1);
    }

    #[test]
    fn parent_collects_exit_status_of_retained_child() {
        let rig = testing::boot(2);
        let kernel = rig.kernel;
        let status: &'static SpinLock<Option<i32>> = testing::leak(SpinLock::new(None));
        let retained_seen: &'static Atomic<bool> = testing::leak(Atomic::new(false));

        kernel.spawn(move || {
            let pid = kernel.spawn_child(|| 42).unwrap();
            while kernel.stats().retained() == 0 {
                kernel.yield_now();
            }
            retained_seen.store(true);
            *status.lock() = Some(kernel.wait(pid).unwrap());
            assert_eq!(kernel.wait(pid), Err(KernelError::NoSuchChild(pid)), "a child is waited for once");
        });
        rig.start();

        rig.wait_for("parent and child reaped", || {
            status.lock().is_some() && kernel.stats().live_tcbs() == 1 && kernel.stats().retained() == 0
        });
        assert!(retained_seen.load());
        assert_eq!(*status.lock(), Some(42));
        assert_eq!(rig.platform.live_page_tables(), 1);
    }

    #[test]
    fn wait_blocks_until_the_child_exits() {
        let rig = testing::boot(2);
        let kernel = rig.kernel;
        let status: &'static SpinLock<Option<i32>> = testing::leak(SpinLock::new(None));

        kernel.spawn(move || {
            let pid = kernel.spawn_child(move || {
                kernel.sleep(1);
                -3
            });
            *status.lock() = Some(kernel.wait(pid.unwrap()).unwrap());
        });
        rig.start();

        rig.wait_for("child asleep", || kernel.stats().sleeping() == 1);
        assert_eq!(*status.lock(), None);
        rig.platform.advance(100);
        rig.wait_for("status collected", || status.lock().is_some());
        assert_eq!(*status.lock(), Some(-3));
    }

    #[test]
    fn orphans_are_destroyed_without_waiting() {
        let rig = testing::boot(2);
        let kernel = rig.kernel;
        let forked: &'static Atomic<bool> = testing::leak(Atomic::new(false));

        kernel.spawn(move || {
            kernel.spawn_child(move || {
                kernel.sleep(1);
                7
            })
            .unwrap();
            forked.store(true);
        });
        rig.start();

        rig.wait_for("parent gone, child asleep", || {
            forked.load() && kernel.stats().sleeping() == 1 && kernel.stats().live_tcbs() == 2
        });
        rig.platform.advance(100);
        rig.wait_for("orphan reaped", || kernel.stats().live_tcbs() == 1);
        assert_eq!(kernel.stats().retained(), 0);
        assert_eq!(rig.platform.live_page_tables(), 1);
    }

    #[test]
    fn waiting_for_a_stranger_fails() {
        let rig = testing::boot(1);
        let kernel = rig.kernel;
        let result: &'static SpinLock<Option<Result<i32, KernelError>>> = testing::leak(SpinLock::new(None));

        kernel.spawn(move || {
            *result.lock() = Some(kernel.wait(Pid(999)));
        });
        rig.start();
        rig.wait_for("wait returned", || result.lock().is_some());
        assert_eq!(*result.lock(), Some(Err(KernelError::NoSuchChild(Pid(999)))));
    }

    #[test]
    fn threads_of_one_process_share_it() {
        let rig = testing::boot(2);
        let kernel = rig.kernel;
        let pids: &'static SpinLock<Vec<Pid>> = testing::leak(SpinLock::new(Vec::new()));

        kernel.spawn(move || {
            let process = kernel.current_process().unwrap();
            let space = kernel.current_address_space().unwrap();
            let root = kernel.platform().page_tables().create();
            pids.lock().push(process.pid());
            kernel.spawn_in(
                move || {
                    let pid = kernel.with_current(|me| me.process().pid()).unwrap();
                    pids.lock().push(pid);
                },
                root,
                process,
                space,
            );
        });
        rig.start();
        rig.wait_for("both threads ran", || pids.lock().len() == 2);
        let pids = pids.lock();
        assert_eq!(pids[0], pids[1]);
    }

    #[test]
    fn handles_to_the_current_thread_outlive_it() {
        let rig = testing::boot(2);
        let kernel = rig.kernel;
        let seen: &'static SpinLock<Option<(ThreadId, Arc<Process>)>> = testing::leak(SpinLock::new(None));

        let id = kernel.spawn(move || {
            let me = (kernel.current_id().unwrap(), kernel.current_process().unwrap());
            *seen.lock() = Some(me);
        });
        rig.start();
        rig.wait_for("thread reaped", || kernel.stats().reaped() == 1 && kernel.stats().live_tcbs() == 1);

        let seen = seen.lock();
        let (seen_id, process) = seen.as_ref().unwrap();
        assert_eq!(*seen_id, id);
        assert_eq!(process.state(), ProcessState::Running);
        assert_eq!(process.child_count(), 0);
        assert!(!process.must_retain());
    }

    #[test]
    fn parent_and_child_share_a_semaphore() {
        let rig = testing::boot(2);
        let kernel = rig.kernel;
        let status: &'static SpinLock<Option<i32>> = testing::leak(SpinLock::new(None));
        let child_blocked: &'static Atomic<bool> = testing::leak(Atomic::new(false));

        kernel.spawn(move || {
            let id = kernel.open_semaphore(0).unwrap();
            let pid = kernel
                .spawn_child(move || {
                    kernel.semaphore_down(id).unwrap();
                    11
                })
                .unwrap();

            let shared = kernel.current_process().unwrap().semaphore(id).unwrap();
            while shared.waiters() == 0 {
                kernel.yield_now();
            }
            child_blocked.store(true);
            kernel.semaphore_up(id).unwrap();
            *status.lock() = Some(kernel.wait(pid).unwrap());
        });
        rig.start();

        rig.wait_for("child released and collected", || status.lock().is_some());
        assert!(child_blocked.load());
        assert_eq!(*status.lock(), Some(11));
    }

    #[test]
    fn unknown_semaphore_ids_are_rejected() {
        let rig = testing::boot(1);
        let kernel = rig.kernel;
        let results: &'static SpinLock<Vec<Result<(), KernelError>>> = testing::leak(SpinLock::new(Vec::new()));

        kernel.spawn(move || {
            let id = kernel.open_semaphore(1).unwrap();
            let seen = [
                kernel.semaphore_down(id),
                kernel.close_semaphore(id),
                kernel.semaphore_up(id),
                kernel.semaphore_down(id),
            ];
            results.lock().extend(seen);
        });
        rig.start();
        rig.wait_for("calls returned", || results.lock().len() == 4);

        let id = crate::process::SemaphoreId(0);
        assert_eq!(
            *results.lock(),
            [Ok(()), Ok(()), Err(KernelError::NoSuchSemaphore(id)), Err(KernelError::NoSuchSemaphore(id))]
        );
    }

    #[test]
    fn only_the_first_exit_of_a_process_counts() {
        let rig = testing::boot(2);
        let kernel = rig.kernel;
        let status: &'static SpinLock<Option<i32>> = testing::leak(SpinLock::new(None));

        kernel.spawn(move || {
            let pid = kernel
                .spawn_child(move || {
                    let process = kernel.current_process().unwrap();
                    let space = kernel.current_address_space().unwrap();
                    let root = kernel.platform().page_tables().create();
                    kernel.spawn_in(move || kernel.exit(5), root, Arc::clone(&process), space);
                    while process.state() != ProcessState::Zombie {
                        kernel.yield_now();
                    }
                    9
                })
                .unwrap();
            *status.lock() = Some(kernel.wait(pid).unwrap());
        });
        rig.start();

        rig.wait_for("status collected and both threads reaped", || {
            status.lock().is_some() && kernel.stats().live_tcbs() == 1
        });
        assert_eq!(*status.lock(), Some(5));
        assert!(rig.platform.failures().is_empty());
    }
}

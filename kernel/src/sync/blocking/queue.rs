use alloc::boxed::Box;

use crate::queue::{Chain, Linked, Queue};
use crate::sync::semaphore::Semaphore;
use crate::sync::spinlock::RawSpinLock;
use crate::thread::Kernel;

/// A spinlock FIFO with a semaphore counting its elements.
///
/// The semaphore may run ahead of the queue: `remove_all` drains elements
/// without taking units. `remove` copes by going back to the semaphore
/// until it actually gets an element.
pub struct BlockingQueue<T: Linked> {
    items: Queue<T, RawSpinLock>,
    available: Semaphore,
}

impl<T: Linked> BlockingQueue<T> {
    pub fn new(kernel: &'static Kernel) -> Self {
        Self { items: Queue::new(), available: Semaphore::new(kernel, 0) }
    }

    /// Never blocks.
    pub fn add(&self, elem: Box<T>) {
        self.items.add(elem);
        self.available.up();
    }

    /// Blocks until an element is available. Never returns empty-handed.
    pub fn remove(&self) -> Box<T> {
        loop {
            self.available.down();
            if let Some(elem) = self.items.remove() {
                return elem;
            }
        }
    }

    /// Never blocks.
    pub fn remove_all(&self) -> Chain<T> {
        self.items.remove_all()
    }

    /// Advisory.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Link;
    use crate::sync::atomic::Atomic;
    use crate::sync::SpinLock;
    use crate::testing;
    use alloc::vec::Vec;

    struct Job {
        id: u32,
        link: Link<Job>,
    }

    unsafe impl Linked for Job {
        fn link(&self) -> &Link<Job> {
            &self.link
        }
    }

    fn job(id: u32) -> Box<Job> {
        Box::new(Job { id, link: Link::new() })
    }

    #[test]
    fn consumer_blocks_until_producer_adds() {
        let rig = testing::boot(2);
        let kernel = rig.kernel;
        let jobs: &'static BlockingQueue<Job> = testing::leak(BlockingQueue::new(kernel));
        let seen: &'static SpinLock<Vec<u32>> = testing::leak(SpinLock::new(Vec::new()));

        kernel.spawn(move || {
            for _ in 0..3 {
                let j = jobs.remove();
                seen.lock().push(j.id);
            }
        });
        rig.start();
        rig.wait_for("consumer blocked", || jobs.available.has_waiters());

        // `add` never blocks, so the test thread itself can produce.
        for id in 1..=3 {
            jobs.add(job(id));
        }
        rig.wait_for("consumer got everything", || seen.lock().len() == 3);
        assert_eq!(*seen.lock(), [1, 2, 3]);
        assert!(jobs.is_empty());
    }

    #[test]
    fn remove_skips_units_whose_elements_were_drained() {
        let rig = testing::boot(1);
        let kernel = rig.kernel;
        let jobs: &'static BlockingQueue<Job> = testing::leak(BlockingQueue::new(kernel));
        jobs.add(job(1));
        jobs.add(job(2));
        let drained: Vec<u32> = jobs.remove_all().map(|j| j.id).collect();
        assert_eq!(drained, [1, 2]);

        let got: &'static Atomic<u32> = testing::leak(Atomic::new(0));
        kernel.spawn(move || got.store(jobs.remove().id));
        rig.start();
        // Two stale units are consumed, then the consumer has to wait.
        rig.wait_for("consumer waits for a real element", || jobs.available.has_waiters());
        jobs.add(job(3));
        rig.wait_for("consumer got the new element", || got.load() == 3);
    }
}

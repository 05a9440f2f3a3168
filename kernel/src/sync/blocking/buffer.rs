use alloc::collections::VecDeque;

use crate::sync::semaphore::Semaphore;
use crate::sync::spinlock::SpinLock;
use crate::thread::Kernel;

/// A fixed-capacity producer/consumer FIFO.
///
/// `put` blocks while the buffer is full, `get` blocks while it is empty.
/// The storage is reserved up front, so neither side allocates.
pub struct BoundedBuffer<T> {
    items: SpinLock<VecDeque<T>>,
    empty_slots: Semaphore,
    full_slots: Semaphore,
}

impl<T: Send> BoundedBuffer<T> {
    pub fn new(kernel: &'static Kernel, capacity: u32) -> Self {
        kassert!(capacity > 0, "a bounded buffer needs room for at least one item");
        Self {
            items: SpinLock::new(VecDeque::with_capacity(capacity as usize)),
            empty_slots: Semaphore::new(kernel, capacity),
            full_slots: Semaphore::new(kernel, 0),
        }
    }

    pub fn put(&self, value: T) {
        self.empty_slots.down();
        self.items.lock().push_back(value);
        self.full_slots.up();
    }

    pub fn get(&self) -> T {
        self.full_slots.down();
        let value = self.items.lock().pop_front();
        self.empty_slots.up();
        match value {
            Some(v) => v,
            None => panic!("bounded buffer: a full slot without an item"),
        }
    }

    /// Advisory.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Advisory.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

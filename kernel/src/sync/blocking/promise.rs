use crate::sync::semaphore::Semaphore;
use crate::thread::Kernel;

/// A value that becomes available once.
///
/// `get` blocks until `set` has been called, and can be called any number
/// of times afterwards.
pub struct Promise<T> {
    value: spin::Once<T>,
    ready: Semaphore,
}

impl<T: Clone> Promise<T> {
    pub fn new(kernel: &'static Kernel) -> Self {
        Self { value: spin::Once::new(), ready: Semaphore::new(kernel, 0) }
    }

    /// Fulfil the promise. Never blocks. Setting twice is a kernel bug.
    pub fn set(&self, value: T) {
        kassert!(self.try_set(value), "promise fulfilled twice");
    }

    /// Fulfil the promise unless it already is. Returns whether `value` was
    /// stored; the first value always wins. Never blocks.
    pub fn try_set(&self, value: T) -> bool {
        let mut fresh = false;
        self.value.call_once(|| {
            fresh = true;
            value
        });
        if fresh {
            self.ready.up();
        }
        fresh
    }

    /// Block until the promise is fulfilled, then return a copy.
    pub fn get(&self) -> T {
        self.ready.down();
        self.ready.up();
        match self.value.get() {
            Some(v) => v.clone(),
            None => panic!("promise: released before it was set"),
        }
    }

    /// The value, if already set. Never blocks.
    pub fn try_get(&self) -> Option<T> {
        self.value.get().cloned()
    }

    pub fn is_set(&self) -> bool {
        self.value.is_completed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::atomic::Atomic;
    use crate::testing;

    #[test]
    fn every_reader_gets_the_value() {
        let rig = testing::boot(2);
        let kernel = rig.kernel;
        let p: &'static Promise<i32> = testing::leak(Promise::new(kernel));
        let sum: &'static Atomic<i32> = testing::leak(Atomic::new(0));
        let readers: &'static Atomic<u32> = testing::leak(Atomic::new(0));

        for _ in 0..3 {
            kernel.spawn(move || {
                sum.fetch_add(p.get());
                readers.fetch_add(1);
            });
        }
        rig.start();
        rig.wait_for("readers wait for the value", || p.ready.waiters() == 3);
        assert_eq!(p.try_get(), None);

        p.set(14);
        rig.wait_for("all readers done", || readers.load() == 3);
        assert_eq!(sum.load(), 42);
        assert!(p.is_set());
    }

    #[test]
    fn later_values_are_ignored() {
        let rig = testing::boot(1);
        let p = Promise::new(rig.kernel);
        assert!(p.try_set(1));
        assert!(!p.try_set(2));
        assert_eq!(p.try_get(), Some(1));
        assert_eq!(p.ready.count(), 1, "only the first value releases readers");
    }

    #[test]
    #[should_panic(expected = "promise fulfilled twice")]
    fn second_set_is_fatal() {
        let rig = testing::boot(1);
        let p = Promise::new(rig.kernel);
        p.set(1);
        p.set(2);
    }
}

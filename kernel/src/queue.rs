// =============================================================================
// Relay — Intrusive FIFO Queue
// =============================================================================
//
// One queue implementation for every queue role in the kernel: the ready
// queue (spinlock), the per-core sleep queues (no lock, helper only), the
// semaphore wait lists (no lock, protected by the semaphore's spinlock),
// the reaper queue (spinlock, under a semaphore).
//
// INTRUSIVE:
//   The `next` pointer lives inside the element (`Link<T>`), so adding and
//   removing never allocates. The helper threads and interrupt handlers rely
//   on this: they may not touch the heap.
//
// OWNERSHIP:
//   A queue owns its elements. `add` takes a `Box<T>`, `remove` gives one
//   back. While queued, the box is held as a raw pointer in the chain.
//   Dropping a queue drops whatever it still holds.
//
// SINGLE MEMBERSHIP:
//   An element may be on at most one queue at a time. `Link` carries a
//   `queued` flag; enqueueing an element that is already queued is a kernel
//   bug and panics.
//
// COST:
//   add / add_front / remove / remove_all / remove_if — O(1)
//   insert_by — O(n), used only by the sleep queues
// =============================================================================

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::sync::spinlock::{NoLock, RawLock, RawSpinLock};

/// The link field embedded in every queueable element.
pub struct Link<T> {
    next: UnsafeCell<*mut T>,
    queued: AtomicBool,
}

// SAFETY: `next` is only read or written by the holder of the queue's lock
// (or the single owner of a `NoLock` queue). Nothing else touches it.
unsafe impl<T: Send> Send for Link<T> {}
unsafe impl<T: Send> Sync for Link<T> {}

impl<T> Link<T> {
    pub const fn new() -> Self {
        Self { next: UnsafeCell::new(ptr::null_mut()), queued: AtomicBool::new(false) }
    }

    /// Whether the element is currently on some queue. Advisory.
    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::SeqCst)
    }

    pub(crate) fn mark(&self) {
        if self.queued.swap(true, Ordering::SeqCst) {
            panic!("queue: element is already on a queue");
        }
    }

    fn unmark(&self) {
        self.queued.store(false, Ordering::SeqCst);
    }

    fn next(&self) -> *mut T {
        // SAFETY: see the Send/Sync impls above.
        unsafe { *self.next.get() }
    }

    fn set_next(&self, next: *mut T) {
        // SAFETY: see the Send/Sync impls above.
        unsafe { *self.next.get() = next }
    }
}

impl<T> Default for Link<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").field("queued", &self.is_queued()).finish()
    }
}

/// An element that can be put on a `Queue`.
///
/// # Safety
/// `link` must always return the same `Link`, embedded in `self`.
pub unsafe trait Linked: Sized {
    fn link(&self) -> &Link<Self>;
}

struct Ends<T> {
    last: *mut T,
}

/// A FIFO of boxed `T`s, guarded by the lock strategy `L`.
pub struct Queue<T: Linked, L: RawLock = NoLock> {
    lock: L,
    /// Mirrors the head so `is_empty` can peek without the lock.
    first: AtomicPtr<T>,
    ends: UnsafeCell<Ends<T>>,
    _owns: PhantomData<Box<T>>,
}

// SAFETY: a queue owns boxed `T`s, moving it moves them.
unsafe impl<T: Linked + Send, L: RawLock + Send> Send for Queue<T, L> {}

// SAFETY: with a spinlock every access to the chain is serialized. A `NoLock`
// queue is deliberately not `Sync`: sharing one needs an outer guarantee.
unsafe impl<T: Linked + Send> Sync for Queue<T, RawSpinLock> {}

impl<T: Linked, L: RawLock> Queue<T, L> {
    pub fn new() -> Self {
        Self {
            lock: L::default(),
            first: AtomicPtr::new(ptr::null_mut()),
            ends: UnsafeCell::new(Ends { last: ptr::null_mut() }),
            _owns: PhantomData,
        }
    }

    fn locked<R>(&self, f: impl FnOnce(&AtomicPtr<T>, &mut Ends<T>) -> R) -> R {
        let token = self.lock.acquire();
        // SAFETY: the lock strategy serializes access to `ends`.
        let out = f(&self.first, unsafe { &mut *self.ends.get() });
        self.lock.release(token);
        out
    }

    fn claim(elem: Box<T>) -> *mut T {
        elem.link().mark();
        elem.link().set_next(ptr::null_mut());
        Box::into_raw(elem)
    }

    /// # Safety
    /// `p` must have come from `claim` and just been unlinked.
    unsafe fn release(p: *mut T) -> Box<T> {
        // SAFETY: forwarded to the caller.
        let elem = unsafe { Box::from_raw(p) };
        elem.link().set_next(ptr::null_mut());
        elem.link().unmark();
        elem
    }

    /// Append at the tail.
    pub fn add(&self, elem: Box<T>) {
        let p = Self::claim(elem);
        self.locked(|first, ends| {
            if ends.last.is_null() {
                first.store(p, Ordering::SeqCst);
            } else {
                // SAFETY: `last` is a live element owned by this queue.
                unsafe { (*ends.last).link().set_next(p) };
            }
            ends.last = p;
        });
    }

    /// Push at the head, ahead of everything already queued.
    pub fn add_front(&self, elem: Box<T>) {
        let p = Self::claim(elem);
        self.locked(|first, ends| {
            let old = first.load(Ordering::SeqCst);
            // SAFETY: `p` is ours until it is published below.
            unsafe { (*p).link().set_next(old) };
            first.store(p, Ordering::SeqCst);
            if ends.last.is_null() {
                ends.last = p;
            }
        });
    }

    /// Take the head, if any.
    pub fn remove(&self) -> Option<Box<T>> {
        self.remove_if(|_| true)
    }

    /// Take the head if `pred` accepts it. Only the head is examined.
    pub fn remove_if(&self, pred: impl FnOnce(&T) -> bool) -> Option<Box<T>> {
        let p = self.locked(|first, ends| {
            let head = first.load(Ordering::SeqCst);
            // SAFETY: a non-null head is a live element owned by this queue.
            if head.is_null() || !pred(unsafe { &*head }) {
                return ptr::null_mut();
            }
            // SAFETY: as above.
            let next = unsafe { (*head).link().next() };
            first.store(next, Ordering::SeqCst);
            if next.is_null() {
                ends.last = ptr::null_mut();
            }
            head
        });
        // SAFETY: `p` was just unlinked from this queue.
        (!p.is_null()).then(|| unsafe { Self::release(p) })
    }

    /// Detach the whole chain in one step.
    pub fn remove_all(&self) -> Chain<T> {
        let head = self.locked(|first, ends| {
            ends.last = ptr::null_mut();
            first.swap(ptr::null_mut(), Ordering::SeqCst)
        });
        Chain { head, _owns: PhantomData }
    }

    /// Insert in front of the first element `e` for which `before(new, e)`
    /// holds, or at the tail. With `before = |a, b| key(a) < key(b)` this
    /// keeps the queue sorted and is stable among equal keys.
    pub fn insert_by(&self, elem: Box<T>, before: impl Fn(&T, &T) -> bool) {
        let p = Self::claim(elem);
        self.locked(|first, ends| {
            let mut prev: *mut T = ptr::null_mut();
            let mut cur = first.load(Ordering::SeqCst);
            // SAFETY: every pointer walked here is a live element owned by
            // this queue, and `p` is ours until it is linked in.
            unsafe {
                while !cur.is_null() && !before(&*p, &*cur) {
                    prev = cur;
                    cur = (*cur).link().next();
                }
                (*p).link().set_next(cur);
                if prev.is_null() {
                    first.store(p, Ordering::SeqCst);
                } else {
                    (*prev).link().set_next(p);
                }
            }
            if cur.is_null() {
                ends.last = p;
            }
        });
    }

    /// Advisory: without a lock the answer can be stale immediately.
    pub fn is_empty(&self) -> bool {
        self.first.load(Ordering::SeqCst).is_null()
    }
}

impl<T: Linked, L: RawLock> Default for Queue<T, L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Linked, L: RawLock> Drop for Queue<T, L> {
    fn drop(&mut self) {
        drop(self.remove_all());
    }
}

impl<T: Linked, L: RawLock> fmt::Debug for Queue<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("empty", &self.is_empty()).finish_non_exhaustive()
    }
}

/// A chain detached by `Queue::remove_all`, yielded front to back.
pub struct Chain<T: Linked> {
    head: *mut T,
    _owns: PhantomData<Box<T>>,
}

// SAFETY: a chain owns its elements exclusively.
unsafe impl<T: Linked + Send> Send for Chain<T> {}

impl<T: Linked> Iterator for Chain<T> {
    type Item = Box<T>;

    fn next(&mut self) -> Option<Box<T>> {
        if self.head.is_null() {
            return None;
        }
        let p = self.head;
        // SAFETY: the chain owns `p`.
        self.head = unsafe { (*p).link().next() };
        // SAFETY: `p` is no longer reachable from the chain.
        Some(unsafe { Queue::<T, NoLock>::release(p) })
    }
}

impl<T: Linked> Drop for Chain<T> {
    fn drop(&mut self) {
        for elem in self.by_ref() {
            drop(elem);
        }
    }
}

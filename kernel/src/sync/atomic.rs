//! Sequentially consistent atomics over machine words.
//!
//! Every operation is `SeqCst`. The core never needs anything weaker and
//! reasoning about the helper protocol is hard enough with a single total
//! order. Only 32-bit and pointer-sized words are supported, so nothing here
//! assumes a 64-bit atomic on a 32-bit machine.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};

/// A value that fits in one atomic machine word.
pub trait AtomicWord: Copy {
    #[doc(hidden)]
    type Cell;

    #[doc(hidden)]
    fn cell(value: Self) -> Self::Cell;
    #[doc(hidden)]
    fn load(cell: &Self::Cell) -> Self;
    #[doc(hidden)]
    fn store(cell: &Self::Cell, value: Self);
    #[doc(hidden)]
    fn exchange(cell: &Self::Cell, value: Self) -> Self;
}

/// An `AtomicWord` that supports wrapping addition.
pub trait AtomicInt: AtomicWord {
    #[doc(hidden)]
    fn fetch_add(cell: &Self::Cell, delta: Self) -> Self;
    #[doc(hidden)]
    fn wrapping_add(a: Self, b: Self) -> Self;
}

macro_rules! atomic_word {
    ($t:ty, $cell:ty) => {
        impl AtomicWord for $t {
            type Cell = $cell;

            #[inline]
            fn cell(value: Self) -> $cell {
                <$cell>::new(value)
            }
            #[inline]
            fn load(cell: &$cell) -> Self {
                cell.load(Ordering::SeqCst)
            }
            #[inline]
            fn store(cell: &$cell, value: Self) {
                cell.store(value, Ordering::SeqCst)
            }
            #[inline]
            fn exchange(cell: &$cell, value: Self) -> Self {
                cell.swap(value, Ordering::SeqCst)
            }
        }
    };
}

macro_rules! atomic_int {
    ($t:ty, $cell:ty) => {
        atomic_word!($t, $cell);

        impl AtomicInt for $t {
            #[inline]
            fn fetch_add(cell: &$cell, delta: Self) -> Self {
                cell.fetch_add(delta, Ordering::SeqCst)
            }
            #[inline]
            fn wrapping_add(a: Self, b: Self) -> Self {
                a.wrapping_add(b)
            }
        }
    };
}

atomic_int!(u32, AtomicU32);
atomic_int!(i32, AtomicI32);
atomic_int!(usize, AtomicUsize);
atomic_word!(bool, AtomicBool);

/// A machine word shared between cores.
pub struct Atomic<T: AtomicWord> {
    cell: T::Cell,
}

impl<T: AtomicWord> Atomic<T> {
    pub fn new(value: T) -> Self {
        Self { cell: T::cell(value) }
    }

    #[inline]
    pub fn load(&self) -> T {
        T::load(&self.cell)
    }

    #[inline]
    pub fn store(&self, value: T) {
        T::store(&self.cell, value)
    }

    /// Store `value` and return what was there before.
    #[inline]
    pub fn exchange(&self, value: T) -> T {
        T::exchange(&self.cell, value)
    }
}

impl<T: AtomicInt> Atomic<T> {
    /// Add `delta`, return the old value.
    #[inline]
    pub fn fetch_add(&self, delta: T) -> T {
        T::fetch_add(&self.cell, delta)
    }

    /// Add `delta`, return the new value.
    #[inline]
    pub fn add_fetch(&self, delta: T) -> T {
        T::wrapping_add(T::fetch_add(&self.cell, delta), delta)
    }
}

impl<T: AtomicWord + Default> Default for Atomic<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: AtomicWord + fmt::Debug> fmt::Debug for Atomic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Atomic").field(&self.load()).finish()
    }
}

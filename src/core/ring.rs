//! Cache-line-aligned slot array plus the two ticket counters.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::ops::{Deref, DerefMut};

#[cfg(not(loom))]
use core::sync::atomic::{AtomicU64, Ordering};
#[cfg(loom)]
use loom::sync::atomic::{AtomicU64, Ordering};

use super::slot::Slot;
pub use super::slot::CACHE_LINE;

/// Cache-line aligned wrapper to prevent false sharing.
#[repr(align(64))]
pub struct CachePadded<T>(pub T);

impl<T> CachePadded<T> {
    /// Wrap `val` on its own cache line.
    pub fn new(val: T) -> Self {
        Self(val)
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;
    #[inline(always)]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for CachePadded<T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

#[cfg(not(loom))]
const _: () = {
    assert!(core::mem::size_of::<CachePadded<AtomicU64>>() == CACHE_LINE);
    assert!(core::mem::align_of::<CachePadded<AtomicU64>>() == CACHE_LINE);
};

/// Ring construction rejected the requested geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityError;

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capacity must be at least 1")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CapacityError {}

/// A fixed array of `capacity + 1` slots plus the two unbounded ticket
/// counters.
///
/// The final slot is a sentinel that is never addressed by the protocol;
/// it only keeps slot `capacity - 1` from sharing a cache line with
/// whatever the allocator places next. `head` counts enqueue tickets ever
/// issued and sits a full cache line before `tail`, which counts dequeue
/// tickets. The ring index for ticket `k` is `k % capacity` and its lap is
/// `k / capacity`.
pub struct Ring<T> {
    slots: Box<[Slot<T>]>,
    capacity: usize,
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
}

unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> core::fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ring")
            .field("capacity", &self.capacity)
            .field("head", &self.head.load(Ordering::Relaxed))
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> Ring<T> {
    /// Allocate a ring of `capacity` usable slots, all at turn 0.
    pub fn with_capacity(capacity: usize) -> Result<Self, CapacityError> {
        let _ = Slot::<T>::LAYOUT_CHECK;
        if capacity < 1 {
            return Err(CapacityError);
        }

        let mut slots = Vec::with_capacity(capacity + 1);
        for _ in 0..=capacity {
            slots.push(Slot::new());
        }
        let slots = slots.into_boxed_slice();
        debug_assert_eq!(slots.as_ptr() as usize % CACHE_LINE, 0);

        Ok(Self {
            slots,
            capacity,
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
        })
    }

    /// Number of usable slots (the sentinel does not count).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn head(&self) -> &AtomicU64 {
        &self.head.0
    }

    #[inline]
    pub(crate) fn tail(&self) -> &AtomicU64 {
        &self.tail.0
    }

    #[inline]
    pub(crate) fn slot(&self, ticket: u64) -> &Slot<T> {
        &self.slots[(ticket % self.capacity as u64) as usize]
    }

    /// Turn an enqueuer holding `ticket` must observe before writing.
    #[inline]
    pub(crate) fn enqueue_turn(&self, ticket: u64) -> u64 {
        2 * (ticket / self.capacity as u64)
    }

    /// Turn a dequeuer holding `ticket` must observe before taking.
    #[inline]
    pub(crate) fn dequeue_turn(&self, ticket: u64) -> u64 {
        self.enqueue_turn(ticket) + 1
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // Odd turn: the cell still owns a live element.
        let capacity = self.capacity;
        for slot in self.slots[..capacity].iter_mut() {
            if slot.turn.load(Ordering::Relaxed) % 2 == 1 {
                unsafe { slot.drop_in_place() };
            }
        }
    }
}

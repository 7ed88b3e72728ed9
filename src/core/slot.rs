//! One ring cell: a turn counter plus inline storage for one element.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;

#[cfg(not(loom))]
use core::sync::atomic::{AtomicU64, Ordering};
#[cfg(loom)]
use loom::sync::atomic::{AtomicU64, Ordering};

/// Cache line size the whole layout is tuned for.
pub const CACHE_LINE: usize = 64;

/// A single ring cell, padded to whole cache lines.
///
/// `turn` is the only atomic; `storage` is serialized by the turn protocol.
/// For a cell at lap `L`: `turn == 2L` means empty and claimable by the
/// enqueuer holding lap-`L` tickets, `turn == 2L + 1` means full and
/// claimable by the matching dequeuer, `turn == 2(L + 1)` means empty again
/// for the next lap. Every completed handoff bumps `turn` by exactly one,
/// so the counter is strictly monotonic over the cell's lifetime.
#[repr(C, align(64))]
pub struct Slot<T> {
    pub(crate) turn: AtomicU64,
    storage: UnsafeCell<MaybeUninit<T>>,
}

// Safety: `storage` is only touched by the unique holder of the current
// turn parity; `turn` itself synchronizes the handoff.
unsafe impl<T: Send> Send for Slot<T> {}
unsafe impl<T: Send> Sync for Slot<T> {}

impl<T> core::fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Slot")
            .field("turn", &self.turn.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> Slot<T> {
    /// Evaluated at monomorphization: a slot must cover whole cache lines,
    /// or neighbouring slots would share one.
    pub(crate) const LAYOUT_CHECK: () = {
        assert!(core::mem::align_of::<Slot<T>>() >= CACHE_LINE);
        assert!(core::mem::size_of::<Slot<T>>() % CACHE_LINE == 0);
    };

    pub(crate) fn new() -> Self {
        Self {
            turn: AtomicU64::new(0),
            storage: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Current turn value. Racy snapshot, mostly useful for diagnostics.
    #[inline]
    pub fn turn(&self) -> u64 {
        self.turn.load(Ordering::Acquire)
    }

    /// In-place initialize the storage.
    ///
    /// # Safety
    ///
    /// The caller must hold the cell's enqueue claim: it observed the even
    /// turn for its lap, and no other thread may touch `storage` until the
    /// caller publishes the odd turn.
    #[inline]
    pub(crate) unsafe fn write(&self, value: T) {
        unsafe { (*self.storage.get()).write(value) };
    }

    /// Move the stored element out, leaving the storage uninitialized.
    ///
    /// # Safety
    ///
    /// The caller must hold the cell's dequeue claim: it observed the odd
    /// turn for its lap, so `storage` is live and exclusively owned.
    #[inline]
    pub(crate) unsafe fn take(&self) -> T {
        unsafe { (*self.storage.get()).assume_init_read() }
    }

    /// Drop the stored element in place.
    ///
    /// # Safety
    ///
    /// Requires exclusive access and a live element (odd turn).
    pub(crate) unsafe fn drop_in_place(&mut self) {
        unsafe { (*self.storage.get()).assume_init_drop() };
    }
}

//! The ticket fast path: blocking and non-blocking enqueue/dequeue.

use core::fmt;

#[cfg(not(loom))]
use core::sync::atomic::Ordering;
#[cfg(loom)]
use loom::sync::atomic::Ordering;

use super::ring::Ring;
pub use super::ring::CapacityError;

/// Non-blocking enqueue rejected; gives the value back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full<T>(pub T);

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue is full")
    }
}

/// Non-blocking dequeue found nothing to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Empty;

impl fmt::Display for Empty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue is empty")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Empty {}

/// Spins before the ladder starts yielding.
#[cfg(not(loom))]
const SPIN_LIMIT: u32 = 64;
/// Nanosleep at deep contention.
#[cfg(all(feature = "std", not(loom)))]
const SLEEP_NS: u64 = 50;

#[cfg(loom)]
pub(crate) fn backoff(spin: u32) -> u32 {
    loom::thread::yield_now();
    spin
}

/// Adaptive backoff: spin a bit, then yield, then nanosleep.
#[cfg(not(loom))]
#[inline]
pub(crate) fn backoff(mut spin: u32) -> u32 {
    if spin < SPIN_LIMIT {
        spin += 1;
        core::hint::spin_loop();
        return spin;
    }
    #[cfg(feature = "std")]
    {
        if spin < SPIN_LIMIT * 8 {
            spin += 1;
            std::thread::yield_now();
        } else {
            std::thread::sleep(core::time::Duration::from_nanos(SLEEP_NS));
        }
    }
    #[cfg(not(feature = "std"))]
    core::hint::spin_loop();
    spin
}

/// Bounded lock-free MPMC queue over turn-sequenced slots.
///
/// FIFO holds in *ticket order*: the k-th successful fetch-add on the head
/// counter owns the k-th logical position, regardless of wall-clock
/// arrival. Any two enqueues are totally ordered and consumers see values
/// in that order.
///
/// Blocking variants spin until their slot's turn comes around; a ticket
/// once drawn must be honored, so callers that need to give up or cancel
/// must use [`try_push`](Queue::try_push) / [`try_pop`](Queue::try_pop),
/// which never draw a ticket they cannot service immediately.
pub struct Queue<T> {
    ring: Ring<T>,
}

impl<T> Queue<T> {
    /// Create a queue holding up to `capacity` elements.
    ///
    /// Any `capacity >= 1` is accepted; there is no power-of-two
    /// restriction.
    pub fn with_capacity(capacity: usize) -> Result<Self, CapacityError> {
        Ok(Self {
            ring: Ring::with_capacity(capacity)?,
        })
    }

    /// Blocking enqueue. Spins until the claimed slot becomes writable.
    pub fn push(&self, value: T) {
        self.push_with(move || value);
    }

    /// Blocking in-place enqueue: `make` runs only after the slot is
    /// claimed and writable, so the element is constructed directly in the
    /// ring rather than moved into it.
    pub fn push_with<F: FnOnce() -> T>(&self, make: F) {
        let ticket = self.ring.head().fetch_add(1, Ordering::AcqRel);
        let slot = self.ring.slot(ticket);
        let turn = self.ring.enqueue_turn(ticket);

        let mut spin = 0;
        while slot.turn.load(Ordering::Acquire) != turn {
            spin = backoff(spin);
        }

        // Sole owner of the cell until the odd turn is published.
        unsafe { slot.write(make()) };
        slot.turn.store(turn + 1, Ordering::Release);
    }

    /// Non-blocking enqueue. Returns the value back when the queue is
    /// full; never waits on a slot.
    pub fn try_push(&self, value: T) -> Result<(), Full<T>> {
        let mut ticket = self.ring.head().load(Ordering::Acquire);
        loop {
            let slot = self.ring.slot(ticket);
            let turn = self.ring.enqueue_turn(ticket);
            if slot.turn.load(Ordering::Acquire) == turn {
                match self.ring.head().compare_exchange(
                    ticket,
                    ticket + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        unsafe { slot.write(value) };
                        slot.turn.store(turn + 1, Ordering::Release);
                        return Ok(());
                    }
                    // Lost the race; chase the new ticket.
                    Err(current) => ticket = current,
                }
            } else {
                let prev = ticket;
                ticket = self.ring.head().load(Ordering::Acquire);
                if ticket == prev {
                    return Err(Full(value));
                }
            }
        }
    }

    /// Non-blocking in-place enqueue. `make` runs only on success; on a
    /// full queue it is dropped unused and `false` is returned.
    pub fn try_push_with<F: FnOnce() -> T>(&self, make: F) -> bool {
        let mut ticket = self.ring.head().load(Ordering::Acquire);
        loop {
            let slot = self.ring.slot(ticket);
            let turn = self.ring.enqueue_turn(ticket);
            if slot.turn.load(Ordering::Acquire) == turn {
                match self.ring.head().compare_exchange(
                    ticket,
                    ticket + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        unsafe { slot.write(make()) };
                        slot.turn.store(turn + 1, Ordering::Release);
                        return true;
                    }
                    Err(current) => ticket = current,
                }
            } else {
                let prev = ticket;
                ticket = self.ring.head().load(Ordering::Acquire);
                if ticket == prev {
                    return false;
                }
            }
        }
    }

    /// Blocking dequeue. Spins until the claimed slot holds an element.
    pub fn pop(&self) -> T {
        let ticket = self.ring.tail().fetch_add(1, Ordering::AcqRel);
        let slot = self.ring.slot(ticket);
        let turn = self.ring.dequeue_turn(ticket);

        let mut spin = 0;
        while slot.turn.load(Ordering::Acquire) != turn {
            spin = backoff(spin);
        }

        let value = unsafe { slot.take() };
        // turn + 1 == 2 * (lap + 1): empty again, next lap's enqueuer may
        // enter.
        slot.turn.store(turn + 1, Ordering::Release);
        value
    }

    /// Non-blocking dequeue. Never waits on a slot.
    pub fn try_pop(&self) -> Result<T, Empty> {
        let mut ticket = self.ring.tail().load(Ordering::Acquire);
        loop {
            let slot = self.ring.slot(ticket);
            let turn = self.ring.dequeue_turn(ticket);
            if slot.turn.load(Ordering::Acquire) == turn {
                match self.ring.tail().compare_exchange(
                    ticket,
                    ticket + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        let value = unsafe { slot.take() };
                        slot.turn.store(turn + 1, Ordering::Release);
                        return Ok(value);
                    }
                    Err(current) => ticket = current,
                }
            } else {
                let prev = ticket;
                ticket = self.ring.tail().load(Ordering::Acquire);
                if ticket == prev {
                    return Err(Empty);
                }
            }
        }
    }

    /// Signed occupancy estimate: enqueue tickets minus dequeue tickets.
    ///
    /// A racy observation, not a transactional query; it can be briefly
    /// negative while consumers hold tickets for not-yet-published slots.
    pub fn size(&self) -> i64 {
        let head = self.ring.head().load(Ordering::Relaxed);
        let tail = self.ring.tail().load(Ordering::Relaxed);
        head.wrapping_sub(tail) as i64
    }

    /// Whether the queue currently looks empty. As racy as [`size`](Queue::size).
    pub fn is_empty(&self) -> bool {
        self.size() <= 0
    }

    /// Number of usable slots.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

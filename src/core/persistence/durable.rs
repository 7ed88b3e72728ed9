//! The ticket fast path bound to a pool, with a persist after every
//! state-changing slot store.
//!
//! Same protocol as the volatile queue; the only addition is a durability
//! step. A producer's element bytes are flushed before the odd turn is
//! published and the turn is flushed before `push` returns, so any push
//! that was acknowledged survives a crash. Head and tail stay volatile:
//! reopening the pool recomputes them from the slot turns alone.

use core::marker::PhantomData;
use core::mem::{align_of, size_of};
use core::sync::atomic::{AtomicU64, Ordering};
use std::fmt;
use std::path::Path;

use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::core::queue::{backoff, CapacityError, Empty, Full};
use crate::core::ring::{CachePadded, CACHE_LINE};

use super::pool::{Pool, PoolError, PoolGeometry};
use super::recovery::{recover, RecoveredSlot, RecoveredState, RecoveryError};

/// Element contract for durable storage: plain bytes in, plain bytes out.
///
/// `FromBytes` makes any post-crash bit pattern a valid element image,
/// `IntoBytes` lets the queue write the image straight into the pool, and
/// `Copy` rules out drop glue — which is why closing a durable queue never
/// destroys elements: the pool keeps them for the next open.
pub trait DurableElem: FromBytes + IntoBytes + Immutable + Copy + Send {}

impl<T: FromBytes + IntoBytes + Immutable + Copy + Send> DurableElem for T {}

/// Errors surfaced while constructing, reopening, or driving a durable
/// queue.
#[derive(Debug)]
pub enum DurableError {
    /// Requested capacity was rejected.
    Capacity(CapacityError),
    /// Pool I/O, integrity, or geometry failure.
    Pool(PoolError),
    /// The persisted turns violate the ticket discipline; the pool is
    /// unrecoverable without operator intervention.
    Recovery(RecoveryError),
}

impl fmt::Display for DurableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurableError::Capacity(err) => write!(f, "{err}"),
            DurableError::Pool(err) => write!(f, "{err}"),
            DurableError::Recovery(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for DurableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DurableError::Capacity(err) => Some(err),
            DurableError::Pool(err) => Some(err),
            DurableError::Recovery(err) => Some(err),
        }
    }
}

impl From<CapacityError> for DurableError {
    fn from(err: CapacityError) -> Self {
        DurableError::Capacity(err)
    }
}

impl From<PoolError> for DurableError {
    fn from(err: PoolError) -> Self {
        DurableError::Pool(err)
    }
}

impl From<RecoveryError> for DurableError {
    fn from(err: RecoveryError) -> Self {
        DurableError::Recovery(err)
    }
}

/// Byte offset of the element image inside a pooled slot.
fn value_offset<T>() -> usize {
    align_of::<T>().max(8)
}

/// Distance between consecutive pooled slots: turn word, element image,
/// padding out to whole cache lines.
fn slot_stride<T>() -> usize {
    let raw = value_offset::<T>() + size_of::<T>();
    raw.div_ceil(CACHE_LINE).max(1) * CACHE_LINE
}

fn geometry_for<T>(capacity: u64) -> Result<PoolGeometry, PoolError> {
    if align_of::<T>() > CACHE_LINE {
        return Err(PoolError::Layout("element alignment exceeds a cache line"));
    }
    Ok(PoolGeometry {
        capacity,
        elem_size: size_of::<T>() as u64,
        elem_align: align_of::<T>() as u64,
        slot_stride: slot_stride::<T>() as u64,
    })
}

/// Bounded lock-free MPMC queue whose slots live in a [`Pool`].
///
/// Blocking and non-blocking variants mirror the volatile
/// [`Queue`](crate::core::queue::Queue); the fallible return types exist
/// because flushing to the persistence domain can fail, not because the
/// protocol can.
///
/// Dropping a durable queue flushes the mapping and releases the pool
/// lock. Elements are *not* destroyed: the element type is plain data by
/// contract, and the pool is expected to be reopened.
pub struct DurableQueue<T> {
    pool: Pool,
    /// Active slot region base inside the mapping. Stable for the life of
    /// the mapping.
    base: *mut u8,
    /// File offset of the active region, for persist calls.
    region_off: usize,
    capacity: u64,
    stride: usize,
    value_off: usize,
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    _marker: PhantomData<T>,
}

// Safety: slot handoff is synchronized by the per-slot atomic turns, as in
// the volatile ring; the raw base pointer is just the mapped region.
unsafe impl<T: Send> Send for DurableQueue<T> {}
unsafe impl<T: Send> Sync for DurableQueue<T> {}

impl<T> fmt::Debug for DurableQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableQueue")
            .field("pool", &self.pool)
            .field("capacity", &self.capacity)
            .field("head", &self.head.load(Ordering::Relaxed))
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T: DurableElem> DurableQueue<T> {
    /// Create a fresh pool at `path` and bind an empty queue to it.
    pub fn create<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, DurableError> {
        if capacity < 1 {
            return Err(CapacityError.into());
        }
        let geometry = geometry_for::<T>(capacity as u64)?;
        let pool = Pool::create(path, geometry)?;
        Ok(Self::from_parts(pool, RecoveredState { head: 0, tail: 0 }))
    }

    /// Reopen an existing pool, integrity-check it, and recover the queue
    /// before admitting any producer or consumer.
    ///
    /// Recovery snapshots the active region, canonicalizes it, writes the
    /// result into the inactive region, persists that, and only then flips
    /// the root. A crash anywhere in between replays cleanly on the next
    /// open.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DurableError> {
        let mut pool = Pool::open(path)?;

        let geometry = geometry_for::<T>(pool.capacity())?;
        if pool.elem_size() != geometry.elem_size
            || pool.elem_align() != geometry.elem_align
            || pool.slot_stride() != geometry.slot_stride
        {
            return Err(PoolError::Layout("element geometry does not match pool").into());
        }

        let capacity = pool.capacity() as usize;
        let stride = pool.slot_stride() as usize;
        let value_off = value_offset::<T>();
        let elem = size_of::<T>();

        let mut snapshot: Vec<RecoveredSlot<T>> = Vec::with_capacity(capacity);
        {
            let bytes = pool.region(pool.active_region());
            for i in 0..capacity {
                let off = i * stride;
                let mut turn_word = [0u8; 8];
                turn_word.copy_from_slice(&bytes[off..off + 8]);
                let value = T::read_from_bytes(&bytes[off + value_off..off + value_off + elem])
                    .map_err(|_| PoolError::Corrupt("slot image size"))?;
                snapshot.push(RecoveredSlot {
                    turn: u64::from_ne_bytes(turn_word),
                    value,
                });
            }
        }

        let turn_sum_before: u64 = snapshot.iter().map(|s| s.turn).sum();
        let state = recover(&mut snapshot)?;
        let turn_sum_after: u64 = snapshot.iter().map(|s| s.turn).sum();

        let target = 1 - pool.active_region();
        {
            let bytes = pool.region_mut(target);
            for (i, slot) in snapshot.iter().enumerate() {
                let off = i * stride;
                bytes[off..off + 8].copy_from_slice(&slot.turn.to_ne_bytes());
                bytes[off + value_off..off + value_off + elem]
                    .copy_from_slice(slot.value.as_bytes());
            }
            // Sentinel slot and region padding stay zero.
            bytes[capacity * stride..].fill(0);
        }
        let target_off = pool.region_offset(target);
        let region_len = pool.region_len();
        pool.persist(target_off, region_len)?;
        pool.set_active_region(target)?;

        log::info!(
            "recovered queue: capacity={} head={} tail={} credited_dequeues={}",
            capacity,
            state.head,
            state.tail,
            turn_sum_after - turn_sum_before
        );
        Ok(Self::from_parts(pool, state))
    }

    /// Open `path` if it exists, create it otherwise. An existing pool
    /// must have been created with the same capacity.
    pub fn open_or_create<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, DurableError> {
        if path.as_ref().exists() {
            let queue = Self::open(path)?;
            if queue.capacity() != capacity {
                return Err(PoolError::Layout("capacity does not match pool").into());
            }
            Ok(queue)
        } else {
            Self::create(path, capacity)
        }
    }

    fn from_parts(mut pool: Pool, state: RecoveredState) -> Self {
        let region = pool.active_region();
        let region_off = pool.region_offset(region);
        let base = unsafe { pool.base_ptr().add(region_off) };
        let capacity = pool.capacity();
        let stride = pool.slot_stride() as usize;
        Self {
            pool,
            base,
            region_off,
            capacity,
            stride,
            value_off: value_offset::<T>(),
            head: CachePadded::new(AtomicU64::new(state.head)),
            tail: CachePadded::new(AtomicU64::new(state.tail)),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn index(&self, ticket: u64) -> usize {
        (ticket % self.capacity) as usize
    }

    #[inline]
    fn enqueue_turn(&self, ticket: u64) -> u64 {
        2 * (ticket / self.capacity)
    }

    #[inline]
    fn dequeue_turn(&self, ticket: u64) -> u64 {
        self.enqueue_turn(ticket) + 1
    }

    #[inline]
    fn turn(&self, ticket: u64) -> &AtomicU64 {
        // In-bounds and 8-aligned: the region is page-aligned and the
        // stride is a cache-line multiple.
        unsafe { &*(self.base.add(self.index(ticket) * self.stride) as *const AtomicU64) }
    }

    #[inline]
    fn value_ptr(&self, ticket: u64) -> *mut u8 {
        unsafe { self.base.add(self.index(ticket) * self.stride + self.value_off) }
    }

    #[inline]
    fn slot_file_off(&self, ticket: u64) -> usize {
        self.region_off + self.index(ticket) * self.stride
    }

    /// Write the element image into the claimed slot and make it durable.
    #[inline]
    fn store_value(&self, ticket: u64, value: &T) -> Result<(), PoolError> {
        let bytes = value.as_bytes();
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), self.value_ptr(ticket), bytes.len());
        }
        self.pool
            .persist(self.slot_file_off(ticket) + self.value_off, bytes.len())
    }

    /// Publish `turn` on the claimed slot and make it durable.
    #[inline]
    fn publish_turn(&self, ticket: u64, turn: u64) -> Result<(), PoolError> {
        self.turn(ticket).store(turn, Ordering::Release);
        self.pool.persist(self.slot_file_off(ticket), 8)
    }

    #[inline]
    fn load_value(&self, ticket: u64) -> T {
        unsafe { core::ptr::read(self.value_ptr(ticket) as *const T) }
    }

    /// Blocking enqueue. Once this returns the element is durable.
    pub fn push(&self, value: T) -> Result<(), PoolError> {
        let ticket = self.head.fetch_add(1, Ordering::AcqRel);
        let turn = self.enqueue_turn(ticket);

        let mut spin = 0;
        while self.turn(ticket).load(Ordering::Acquire) != turn {
            spin = backoff(spin);
        }

        self.store_value(ticket, &value)?;
        self.publish_turn(ticket, turn + 1)
    }

    /// Non-blocking enqueue. Returns the value back when the queue is
    /// full.
    pub fn try_push(&self, value: T) -> Result<(), TryPushError<T>> {
        let mut ticket = self.head.load(Ordering::Acquire);
        loop {
            let turn = self.enqueue_turn(ticket);
            if self.turn(ticket).load(Ordering::Acquire) == turn {
                match self.head.compare_exchange(
                    ticket,
                    ticket + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        self.store_value(ticket, &value)
                            .map_err(TryPushError::Pool)?;
                        return self
                            .publish_turn(ticket, turn + 1)
                            .map_err(TryPushError::Pool);
                    }
                    Err(current) => ticket = current,
                }
            } else {
                let prev = ticket;
                ticket = self.head.load(Ordering::Acquire);
                if ticket == prev {
                    return Err(TryPushError::Full(Full(value)));
                }
            }
        }
    }

    /// Blocking dequeue.
    pub fn pop(&self) -> Result<T, PoolError> {
        let ticket = self.tail.fetch_add(1, Ordering::AcqRel);
        let turn = self.dequeue_turn(ticket);

        let mut spin = 0;
        while self.turn(ticket).load(Ordering::Acquire) != turn {
            spin = backoff(spin);
        }

        let value = self.load_value(ticket);
        self.publish_turn(ticket, turn + 1)?;
        Ok(value)
    }

    /// Non-blocking dequeue.
    pub fn try_pop(&self) -> Result<T, TryPopError> {
        let mut ticket = self.tail.load(Ordering::Acquire);
        loop {
            let turn = self.dequeue_turn(ticket);
            if self.turn(ticket).load(Ordering::Acquire) == turn {
                match self.tail.compare_exchange(
                    ticket,
                    ticket + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        let value = self.load_value(ticket);
                        self.publish_turn(ticket, turn + 1)
                            .map_err(TryPopError::Pool)?;
                        return Ok(value);
                    }
                    Err(current) => ticket = current,
                }
            } else {
                let prev = ticket;
                ticket = self.tail.load(Ordering::Acquire);
                if ticket == prev {
                    return Err(TryPopError::Empty(Empty));
                }
            }
        }
    }

    /// Signed occupancy estimate; racy, exactly like the volatile queue's.
    pub fn size(&self) -> i64 {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail) as i64
    }

    /// Whether the queue currently looks empty.
    pub fn is_empty(&self) -> bool {
        self.size() <= 0
    }

    /// Number of usable slots.
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }
}

/// Non-blocking durable enqueue outcome.
#[derive(Debug)]
pub enum TryPushError<T> {
    /// The queue is full; the value comes back.
    Full(Full<T>),
    /// Flushing to the persistence domain failed after the slot was
    /// claimed; the element may or may not be durable.
    Pool(PoolError),
}

/// Non-blocking durable dequeue outcome.
#[derive(Debug)]
pub enum TryPopError {
    /// Nothing to take.
    Empty(Empty),
    /// Flushing to the persistence domain failed after the slot was
    /// claimed.
    Pool(PoolError),
}

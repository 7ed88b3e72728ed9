//! The guts. Slots, ring layout, the ticket fast path, durability.

pub mod queue;
pub mod ring;
pub mod slot;

#[cfg(feature = "persistence")]
pub mod persistence;

pub use queue::{CapacityError, Empty, Full, Queue};
pub use ring::{CachePadded, Ring, CACHE_LINE};
pub use slot::Slot;

#[cfg(feature = "persistence")]
pub use persistence::{
    recover, DurableError, DurableQueue, Pool, PoolError, RecoveredSlot, RecoveredState,
    RecoveryError,
};

//! # turnstile
//!
//! A bounded, lock-free, multi-producer multi-consumer FIFO queue whose
//! backing store can live on byte-addressable persistent media, plus the
//! recovery procedure that rebuilds a consistent queue from whatever slot
//! state survived a hard crash.
//!
//! ## How it works
//!
//! Producers and consumers never meet on a shared head/tail CAS loop. Each
//! ring slot carries its own monotonic *turn* counter; a ticket drawn by
//! fetch-add binds an operation to one `(slot, lap)` pair, and the slot's
//! turn parity says whose move it is. Even turn: empty, an enqueuer of that
//! lap may claim it. Odd turn: full, a dequeuer of that lap may claim it.
//! Contention is split across the ring instead of funneled through one
//! counter.
//!
//! In durable mode every state-changing slot store is flushed to the
//! backing pool before the operation returns, and head/tail are never
//! persisted at all: reopening the pool recomputes them from the slot
//! turns alone.
//!
//! ## Primary API Surface
//!
//! - [`Queue`] - volatile bounded MPMC queue
//! - [`DurableQueue`] - the same fast path over a memory-mapped pool,
//!   with crash recovery on open (feature `persistence`)
//! - [`recover`] - the pure canonicalization step, usable on any turn
//!   snapshot (feature `persistence`)
//!
//! ## Design Constraints
//!
//! - **Zero allocation** after construction; the fast path is infallible
//! - **Cache-line isolation** for every shared counter and every slot
//! - **POD-only** elements in durable mode (`zerocopy` bounds), so slot
//!   bytes mean the same thing after a crash as before it
//!
//! ## Example
//!
//! ```rust
//! use turnstile::Queue;
//!
//! let q = Queue::with_capacity(8).unwrap();
//! q.push(1u64);
//! q.push(2u64);
//! assert_eq!(q.pop(), 1);
//! assert_eq!(q.pop(), 2);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod core;

/// Prelude for convenient imports of primary API types.
pub mod prelude {
    pub use crate::core::queue::{CapacityError, Empty, Full, Queue};
    pub use crate::core::ring::{CachePadded, Ring, CACHE_LINE};
    pub use crate::core::slot::Slot;

    #[cfg(feature = "persistence")]
    pub use crate::core::persistence::{
        recover, DurableError, DurableQueue, Pool, PoolError, RecoveredSlot, RecoveredState,
        RecoveryError,
    };
}

// Re-export primary types at crate root for convenience.
pub use crate::core::queue::{CapacityError, Empty, Full, Queue};

#[cfg(feature = "persistence")]
pub use crate::core::persistence::{
    recover, DurableError, DurableQueue, Pool, PoolError, RecoveredSlot, RecoveredState,
    RecoveryError,
};

//! Durability: the memory-mapped pool, the persist-interposed fast path,
//! and crash recovery. Feature-gated: `persistence`.
//!
//! Layered bottom-up:
//! - [`pool`]: an integrity-checked file mapping with two slot regions and
//!   a root field saying which one is authoritative.
//! - [`recovery`]: the pure canonicalization step from a turn snapshot to
//!   the unique consistent queue state.
//! - [`durable`]: the ticket fast path re-expressed over pooled slots,
//!   flushing every state-changing store before acknowledging it.

pub mod durable;
pub mod pool;
pub mod recovery;

pub use durable::{DurableElem, DurableError, DurableQueue, TryPopError, TryPushError};
pub use pool::{Pool, PoolError, PoolGeometry, PAGE_SIZE};
pub use recovery::{recover, RecoveredSlot, RecoveredState, RecoveryError};

//! Rebuilding a canonical queue from a persisted turn snapshot.
//!
//! Head and tail are never persisted, so a reopened pool hands us nothing
//! but the slot array as it stood at the crash: up to one enqueue and one
//! dequeue per slot may have been mid-flight. Canonicalization decides, for
//! every incomplete operation, whether to erase it (an enqueue that never
//! published its odd turn) or credit it as complete (a dequeue that took
//! its element but never stored the even turn), then permutes the slots so
//! the turn sequence is non-increasing — the shape a quiescent ring always
//! has when read from its logical beginning.
//!
//! The ticket discipline keeps every in-flight operation within one lap of
//! every other, so a snapshot whose turns spread more than 2 cannot have
//! come from this queue; recovery refuses it outright.

use core::fmt;

/// One recovered cell: the persisted turn plus the element image that
/// accompanied it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredSlot<T> {
    /// Persisted turn counter.
    pub turn: u64,
    /// Element image carried alongside the turn. Only meaningful while
    /// `turn` is odd.
    pub value: T,
}

/// Ticket counters reconstructed from a canonical snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredState {
    /// Enqueue tickets ever issued.
    pub head: u64,
    /// Dequeue tickets ever issued.
    pub tail: u64,
}

/// The snapshot could not have been produced by the ticket discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryError {
    /// Turns more than two apart imply concurrent operations farther apart
    /// than one lap. The pool needs operator attention; nothing is mutated.
    PreconditionViolated {
        /// Smallest turn observed.
        min: u64,
        /// Largest turn observed.
        max: u64,
    },
}

impl fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryError::PreconditionViolated { min, max } => write!(
                f,
                "turn spread {min}..{max} exceeds one lap; snapshot is not recoverable"
            ),
        }
    }
}

impl std::error::Error for RecoveryError {}

/// Canonicalize a turn snapshot in place and reconstruct head and tail.
///
/// On return the slots are permuted (values travel with their turns) into
/// the unique state an observer would have seen had every incomplete
/// enqueue never started and every incomplete dequeue finished:
///
/// - **Max turn odd**: no consumer had started on the newest lap, so the
///   only in-flight operations were enqueues that never published. A
///   stable descending sort by turn restores the canonical layout.
/// - **Max turn even**: some consumer finished a dequeue on the previous
///   lap. FIFO means dequeues sweep the ring in order, so every slot up to
///   the last one that reached the max must also have been taken — any
///   lower turn there is a dequeue that moved its element out but crashed
///   before the final store. Those are credited by raising their turn to
///   the max; the untouched suffix is then sorted as in the odd case.
///
/// Afterwards `tail` is the number of dequeue completions the turns
/// represent (`Σ turn/2` over slots before the first zero) and `head` the
/// number of enqueue completions (`Σ (turn+1)/2` over the same prefix).
pub fn recover<T>(slots: &mut [RecoveredSlot<T>]) -> Result<RecoveredState, RecoveryError> {
    if slots.is_empty() {
        return Ok(RecoveredState { head: 0, tail: 0 });
    }

    let min = slots.iter().map(|s| s.turn).min().unwrap_or(0);
    let max = slots.iter().map(|s| s.turn).max().unwrap_or(0);
    if max - min > 2 {
        return Err(RecoveryError::PreconditionViolated { min, max });
    }

    if max % 2 == 1 {
        slots.sort_by(|a, b| b.turn.cmp(&a.turn));
    } else {
        // Last index still holding the max pins how far the dequeue sweep
        // provably got.
        let last_max = slots
            .iter()
            .rposition(|s| s.turn == max)
            .unwrap_or_default();
        for slot in &mut slots[..last_max] {
            slot.turn = max;
        }
        slots[last_max + 1..].sort_by(|a, b| b.turn.cmp(&a.turn));
    }

    let mut head = 0u64;
    let mut tail = 0u64;
    for slot in slots.iter().take_while(|s| s.turn != 0) {
        tail += slot.turn / 2;
        head += (slot.turn + 1) / 2;
    }

    debug_assert!(slots.windows(2).all(|w| w[0].turn >= w[1].turn));
    debug_assert!(head >= tail && head - tail <= slots.len() as u64);

    Ok(RecoveredState { head, tail })
}

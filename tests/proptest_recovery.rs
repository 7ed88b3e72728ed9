//! Property-based tests for canonicalization: any snapshot a legal
//! history could have produced recovers to a state satisfying the
//! recovery laws, and any snapshot no legal history could have produced
//! is refused.

#![cfg(feature = "persistence")]

use proptest::prelude::*;

use turnstile::{recover, RecoveredSlot, RecoveryError};

/// Snapshots the ticket discipline can actually produce: every turn within
/// one lap of a common base.
fn legal_snapshot() -> impl Strategy<Value = Vec<RecoveredSlot<u64>>> {
    (0u64..64, prop::collection::vec(0u64..=2, 1..48)).prop_map(|(lap, offsets)| {
        offsets
            .into_iter()
            .enumerate()
            .map(|(i, off)| RecoveredSlot {
                turn: 2 * lap + off,
                value: i as u64,
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn canonical_form_is_non_increasing(mut slots in legal_snapshot()) {
        recover(&mut slots).unwrap();
        prop_assert!(slots.windows(2).all(|w| w[0].turn >= w[1].turn));
    }

    #[test]
    fn occupancy_is_bounded_by_capacity(mut slots in legal_snapshot()) {
        let n = slots.len() as u64;
        let state = recover(&mut slots).unwrap();
        let odd = slots.iter().filter(|s| s.turn % 2 == 1).count() as u64;
        prop_assert!(state.head >= state.tail);
        prop_assert_eq!(state.head - state.tail, odd);
        prop_assert!(state.head - state.tail <= n);
    }

    #[test]
    fn turn_sum_never_shrinks(mut slots in legal_snapshot()) {
        let before: u64 = slots.iter().map(|s| s.turn).sum();
        let max = slots.iter().map(|s| s.turn).max().unwrap();
        recover(&mut slots).unwrap();
        let after: u64 = slots.iter().map(|s| s.turn).sum();
        prop_assert!(after >= before);
        if max % 2 == 1 {
            prop_assert_eq!(after, before);
        }
    }

    #[test]
    fn recovery_is_idempotent(mut slots in legal_snapshot()) {
        let first = recover(&mut slots).unwrap();
        let canonical = slots.clone();
        let second = recover(&mut slots).unwrap();
        prop_assert_eq!(first, second);
        prop_assert_eq!(slots, canonical);
    }

    #[test]
    fn values_are_permuted_never_lost(mut slots in legal_snapshot()) {
        let mut before: Vec<u64> = slots.iter().map(|s| s.value).collect();
        recover(&mut slots).unwrap();
        let mut after: Vec<u64> = slots.iter().map(|s| s.value).collect();
        before.sort_unstable();
        after.sort_unstable();
        // Crediting touches turns only; element images are permuted intact.
        prop_assert_eq!(before, after);
    }

    #[test]
    fn head_and_tail_account_for_the_live_prefix(mut slots in legal_snapshot()) {
        let state = recover(&mut slots).unwrap();
        let live_sum: u64 = slots
            .iter()
            .take_while(|s| s.turn != 0)
            .map(|s| s.turn)
            .sum();
        prop_assert_eq!(state.head + state.tail, live_sum);
    }

    #[test]
    fn excessive_spread_is_refused(
        turns in prop::collection::vec(0u64..16, 2..32),
    ) {
        let min = *turns.iter().min().unwrap();
        let max = *turns.iter().max().unwrap();
        prop_assume!(max - min > 2);

        let mut slots: Vec<RecoveredSlot<u64>> = turns
            .iter()
            .map(|&turn| RecoveredSlot { turn, value: 0 })
            .collect();
        let original: Vec<u64> = turns.clone();

        let recovered = matches!(
            recover(&mut slots),
            Err(RecoveryError::PreconditionViolated { .. })
        );
        prop_assert!(recovered, "expected PreconditionViolated error");
        // Refusal must not mutate the snapshot.
        let now: Vec<u64> = slots.iter().map(|s| s.turn).collect();
        prop_assert_eq!(now, original);
    }
}

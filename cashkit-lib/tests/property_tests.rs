//! Property-based tests for selection and counter monotonicity.

use cashkit_lib::{select, Amount, CounterAllocator, KeysetId, MemoryWalletStore};
use cashkit_lib::{Proof, StoredProof};
use cashkit_lib::{MintUrl, ProofState};
use proptest::prelude::*;
use std::sync::Arc;

fn pool(amounts: &[u64]) -> Vec<StoredProof> {
    amounts
        .iter()
        .enumerate()
        .map(|(i, a)| StoredProof {
            proof: Proof {
                keyset_id: KeysetId::from("00ks"),
                amount: Amount::from_sats(*a),
                secret: format!("secret-{}", i),
                c: format!("02c-{}", i),
            },
            mint_url: MintUrl::new("https://mint.a"),
            state: ProofState::Live,
        })
        .collect()
}

proptest! {
    /// A successful selection always covers the target, and change is
    /// exactly the overshoot.
    #[test]
    fn selection_covers_target(
        amounts in prop::collection::vec(1u64..2048, 1..12),
        target in 1u64..4096,
    ) {
        let proofs = pool(&amounts);
        let total: u64 = amounts.iter().sum();
        let target = Amount::from_sats(target);

        match select(&proofs, target) {
            Some(sel) => {
                prop_assert!(sel.total >= target);
                prop_assert_eq!(sel.change, sel.total.saturating_sub(target));
                let chosen_sum: u64 = sel.chosen.iter().map(|p| p.amount().as_sats()).sum();
                prop_assert_eq!(chosen_sum, sel.total.as_sats());
            }
            None => prop_assert!(total < target.as_sats()),
        }
    }

    /// When an exact subset exists within the search bounds, selection
    /// produces zero change.
    #[test]
    fn selection_finds_exact_subsets(
        mask in 1u8..16,
    ) {
        // Pool of distinct powers of two; any mask has an exact subset.
        let proofs = pool(&[64, 32, 16, 8]);
        let target: u64 = [64u64, 32, 16, 8]
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, a)| a)
            .sum();

        let sel = select(&proofs, Amount::from_sats(target)).unwrap();
        prop_assert_eq!(sel.change, Amount::ZERO);
    }

    /// Counters never decrease, whatever order mutations arrive in.
    #[test]
    fn counters_are_monotonic(
        values in prop::collection::vec(0u64..10_000, 1..20),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let alloc = CounterAllocator::new(Arc::new(MemoryWalletStore::new()));
            let keyset = KeysetId::from("00ks");
            let mut high_water = 0u64;

            for value in values {
                alloc.set_if_higher(&keyset, value).await.unwrap();
                high_water = high_water.max(value);

                let snapshot = alloc.snapshot().await.unwrap();
                assert_eq!(snapshot.get(&keyset).copied().unwrap_or(0), high_water);
            }
        });
    }

    /// Reservations tile the index space without gaps or overlap.
    #[test]
    fn reservations_never_overlap(
        counts in prop::collection::vec(1u64..32, 1..16),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let alloc = CounterAllocator::new(Arc::new(MemoryWalletStore::new()));
            let keyset = KeysetId::from("00ks");
            let mut expected_start = 0u64;

            for count in counts {
                let start = alloc.reserve(&keyset, count).await.unwrap();
                assert_eq!(start, expected_start);
                expected_start += count;
            }
        });
    }
}

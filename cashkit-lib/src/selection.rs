//! Proof selection for outgoing spends.
//!
//! Selection prefers a subset that sums exactly to the target, which
//! eliminates change and the future fee surface change carries. The exact
//! search is a bounded subset-sum; past the bounds it falls back to greedy
//! descending accumulation. Both paths order input deterministically, so
//! selection is reproducible.

use crate::proofs::{total_stored_amount, StoredProof};
use crate::types::Amount;

/// Exact-match search is only attempted for targets up to this value.
pub const EXACT_TARGET_CEILING: Amount = Amount(4096);

/// Exact-match search is only attempted over at most this many proofs.
pub const EXACT_PROOF_CEILING: usize = 20;

/// Outcome of a selection.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Proofs chosen to cover the target, in selection order.
    pub chosen: Vec<StoredProof>,
    /// Total value of the chosen proofs.
    pub total: Amount,
    /// Overshoot past the target; zero for an exact match.
    pub change: Amount,
}

/// Choose a subset of proofs covering `target`.
///
/// Returns `None` when the proofs cannot cover the target; the caller owns
/// surfacing the shortfall. Input proofs are expected to be spendable; state
/// filtering happens at the ledger.
pub fn select(proofs: &[StoredProof], target: Amount) -> Option<Selection> {
    if target.is_zero() {
        return Some(Selection {
            chosen: Vec::new(),
            total: Amount::ZERO,
            change: Amount::ZERO,
        });
    }

    let available = total_stored_amount(proofs);
    if available < target {
        return None;
    }

    // Deterministic ordering: amount descending, then secret, so equal-value
    // proof sets always select identically.
    let mut ordered: Vec<&StoredProof> = proofs.iter().collect();
    ordered.sort_by(|a, b| {
        b.amount()
            .cmp(&a.amount())
            .then_with(|| a.proof.secret.cmp(&b.proof.secret))
    });

    if target <= EXACT_TARGET_CEILING && ordered.len() <= EXACT_PROOF_CEILING {
        if let Some(exact) = exact_match(&ordered, target) {
            let total = total_stored_amount(&exact);
            return Some(Selection {
                chosen: exact,
                total,
                change: Amount::ZERO,
            });
        }
    }

    Some(greedy_descending(&ordered, target))
}

/// Depth-first subset-sum over the ordered proofs. Include-first with
/// overshoot pruning; the ordering makes the first hit deterministic.
fn exact_match(ordered: &[&StoredProof], target: Amount) -> Option<Vec<StoredProof>> {
    fn search(
        ordered: &[&StoredProof],
        index: usize,
        remaining: u64,
        picked: &mut Vec<usize>,
    ) -> bool {
        if remaining == 0 {
            return true;
        }
        if index >= ordered.len() {
            return false;
        }

        let amount = ordered[index].amount().as_sats();
        if amount <= remaining {
            picked.push(index);
            if search(ordered, index + 1, remaining - amount, picked) {
                return true;
            }
            picked.pop();
        }
        search(ordered, index + 1, remaining, picked)
    }

    let mut picked = Vec::new();
    if search(ordered, 0, target.as_sats(), &mut picked) {
        Some(picked.into_iter().map(|i| ordered[i].clone()).collect())
    } else {
        None
    }
}

/// Accumulate the descending-ordered prefix until the target is covered.
fn greedy_descending(ordered: &[&StoredProof], target: Amount) -> Selection {
    let mut chosen = Vec::new();
    let mut total = Amount::ZERO;

    for proof in ordered {
        if total >= target {
            break;
        }
        chosen.push((*proof).clone());
        total = Amount::sum([total, proof.amount()]);
    }

    Selection {
        change: total.saturating_sub(target),
        total,
        chosen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proofs::{Proof, StoredProof};
    use crate::types::{KeysetId, MintUrl};

    fn proofs(amounts: &[u64]) -> Vec<StoredProof> {
        amounts
            .iter()
            .enumerate()
            .map(|(i, a)| {
                StoredProof::live(
                    Proof {
                        keyset_id: KeysetId::from("00ks"),
                        amount: Amount::from_sats(*a),
                        secret: format!("secret-{}", i),
                        c: format!("02c-{}", i),
                    },
                    MintUrl::new("https://mint.a"),
                )
            })
            .collect()
    }

    fn amounts(selection: &Selection) -> Vec<u64> {
        let mut v: Vec<u64> = selection.chosen.iter().map(|p| p.amount().as_sats()).collect();
        v.sort_unstable();
        v
    }

    #[test]
    fn test_exact_match_preferred() {
        let pool = proofs(&[64, 32, 16, 8]);
        let sel = select(&pool, Amount::from_sats(40)).unwrap();

        assert_eq!(amounts(&sel), vec![8, 32]);
        assert_eq!(sel.total, Amount::from_sats(40));
        assert_eq!(sel.change, Amount::ZERO);
    }

    #[test]
    fn test_greedy_fallback() {
        let pool = proofs(&[64, 32, 16, 8]);
        let sel = select(&pool, Amount::from_sats(50)).unwrap();

        assert_eq!(amounts(&sel), vec![64]);
        assert_eq!(sel.total, Amount::from_sats(64));
        assert_eq!(sel.change, Amount::from_sats(14));
    }

    #[test]
    fn test_insufficient_funds() {
        let pool = proofs(&[8, 4]);
        assert!(select(&pool, Amount::from_sats(13)).is_none());
    }

    #[test]
    fn test_exact_whole_pool() {
        let pool = proofs(&[8, 4, 2]);
        let sel = select(&pool, Amount::from_sats(14)).unwrap();
        assert_eq!(amounts(&sel), vec![2, 4, 8]);
        assert_eq!(sel.change, Amount::ZERO);
    }

    #[test]
    fn test_zero_target() {
        let pool = proofs(&[8]);
        let sel = select(&pool, Amount::ZERO).unwrap();
        assert!(sel.chosen.is_empty());
    }

    #[test]
    fn test_large_target_skips_exact_search() {
        // Above the exact-search ceiling: greedy path.
        let pool = proofs(&[4096, 2048, 64]);
        let sel = select(&pool, Amount::from_sats(6000)).unwrap();
        assert_eq!(amounts(&sel), vec![2048, 4096]);
        assert_eq!(sel.change, Amount::from_sats(144));
    }

    #[test]
    fn test_selection_deterministic() {
        let pool = proofs(&[16, 16, 8, 8, 4]);
        let a = select(&pool, Amount::from_sats(20)).unwrap();
        let b = select(&pool, Amount::from_sats(20)).unwrap();

        let secrets = |s: &Selection| {
            s.chosen
                .iter()
                .map(|p| p.proof.secret.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(secrets(&a), secrets(&b));
        assert_eq!(a.change, Amount::ZERO);
    }
}

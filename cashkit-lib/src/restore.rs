//! Deterministic wallet recovery from a seed phrase.
//!
//! Given a seed and candidate mints, the scanner walks every keyset's
//! deterministic-secret index space in fixed-size batches, asking the mint
//! which indices carry blind signatures. A keyset's scan stops after a run
//! of consecutive empty batches (the gap limit), which bounds the search
//! while tolerating sparse usage. Recovered proofs are filtered to those
//! the mint still reports unspent before they are stored.
//!
//! After a keyset is scanned, its counter floor becomes the end of the last
//! occupied batch plus a safety buffer, merged into the allocator with
//! max-semantics so recovery can never move a counter backward.

use crate::counters::{CounterAllocator, KeysetCounters};
use crate::keys::KeyCustodian;
use crate::ledger::ProofLedger;
use crate::mint::{MintClient, ProofSpendState};
use crate::proofs::Proof;
use crate::store::record_keys;
use crate::types::{Amount, MintUrl};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Indices scanned per restore request.
pub const RESTORE_BATCH_SIZE: u64 = 100;

/// Consecutive empty batches tolerated before a keyset's scan stops.
pub const GAP_LIMIT: u32 = 3;

/// Outcome of a recovery scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Total value of recovered, still-unspent proofs.
    pub recovered: Amount,
    /// Number of recovered proofs stored.
    pub proofs_found: usize,
    /// Mints that could not be scanned.
    pub mints_failed: Vec<MintUrl>,
    /// Whether the scan was cancelled before completing.
    pub cancelled: bool,
}

/// Scans mints for proofs derivable from a seed.
pub struct RecoveryScanner {
    client: Arc<dyn MintClient>,
    ledger: Arc<ProofLedger>,
    counters: Arc<CounterAllocator>,
    custodian: Arc<KeyCustodian>,
}

impl RecoveryScanner {
    pub fn new(
        client: Arc<dyn MintClient>,
        ledger: Arc<ProofLedger>,
        counters: Arc<CounterAllocator>,
        custodian: Arc<KeyCustodian>,
    ) -> Self {
        Self {
            client,
            ledger,
            counters,
            custodian,
        }
    }

    /// Scan the given mints for proofs derivable from the client's seed.
    ///
    /// `phrase` is the human-entered recovery phrase; it is persisted only
    /// if the scan succeeds, so a mistyped phrase cannot overwrite a valid
    /// stored one. Cancellation is honored between batches, never inside a
    /// batch write.
    pub async fn scan(
        &self,
        phrase: &str,
        mints: &[MintUrl],
        cancel: &AtomicBool,
    ) -> Result<RestoreSummary> {
        let mut summary = RestoreSummary::default();
        let mut floors = KeysetCounters::new();

        'mints: for mint_url in mints {
            let snapshot = match self.client.load_mint(mint_url).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(mint = %mint_url, error = %e, "recovery: mint unreachable");
                    summary.mints_failed.push(mint_url.clone());
                    continue;
                }
            };

            // Inactive keysets stay redeemable; scan them all.
            for keyset in &snapshot.keysets {
                let mut start = 0u64;
                let mut empty_batches = 0u32;
                let mut last_occupied_end = 0u64;

                loop {
                    if cancel.load(Ordering::Relaxed) {
                        summary.cancelled = true;
                        break 'mints;
                    }
                    if empty_batches >= GAP_LIMIT {
                        break;
                    }

                    let batch = match self
                        .client
                        .restore_batch(mint_url, &keyset.id, start, RESTORE_BATCH_SIZE)
                        .await
                    {
                        Ok(batch) => batch,
                        Err(e) => {
                            warn!(mint = %mint_url, keyset = %keyset.id, error = %e, "recovery: batch failed");
                            summary.mints_failed.push(mint_url.clone());
                            continue 'mints;
                        }
                    };

                    if batch.is_empty() {
                        empty_batches += 1;
                    } else {
                        empty_batches = 0;
                        last_occupied_end = start + RESTORE_BATCH_SIZE;

                        let unspent = self.filter_unspent(mint_url, batch).await?;
                        if !unspent.is_empty() {
                            summary.proofs_found += unspent.len();
                            summary.recovered = Amount::sum([
                                summary.recovered,
                                crate::proofs::total_amount(&unspent),
                            ]);
                            self.ledger.add_proofs(unspent, mint_url).await?;
                        }
                    }

                    start += RESTORE_BATCH_SIZE;
                }

                if last_occupied_end > 0 {
                    let floor = last_occupied_end + u64::from(GAP_LIMIT) * RESTORE_BATCH_SIZE;
                    floors.insert(keyset.id.clone(), floor);
                    debug!(keyset = %keyset.id, floor, "recovery set counter floor");
                }
            }
        }

        // Max-merge so a restore can never lower an existing counter.
        self.counters.merge_taking_max(&floors).await?;

        let succeeded = !summary.cancelled && summary.mints_failed.is_empty();
        if summary.proofs_found > 0 || succeeded {
            self.persist_phrase(phrase).await?;
        }

        info!(
            recovered = %summary.recovered,
            proofs = summary.proofs_found,
            cancelled = summary.cancelled,
            "recovery scan finished"
        );
        Ok(summary)
    }

    async fn filter_unspent(&self, mint_url: &MintUrl, proofs: Vec<Proof>) -> Result<Vec<Proof>> {
        let states = self.client.check_proof_states(mint_url, &proofs).await?;
        Ok(proofs
            .into_iter()
            .zip(states)
            .filter(|(_, state)| *state == ProofSpendState::Unspent)
            .map(|(proof, _)| proof)
            .collect())
    }

    async fn persist_phrase(&self, phrase: &str) -> Result<()> {
        self.custodian
            .store_encrypted(record_keys::RECOVERY_PHRASE, phrase.as_bytes())
            .await
    }
}

/// Persist the wallet seed that backs deterministic secrets. The host
/// derives it from the recovery phrase when configuring the mint client.
pub async fn store_seed(custodian: &KeyCustodian, seed: &[u8]) -> Result<()> {
    custodian.store_encrypted(record_keys::SEED, seed).await
}

/// Load the wallet seed, if one is configured.
pub async fn load_seed(custodian: &KeyCustodian) -> Result<Option<Vec<u8>>> {
    custodian.load_encrypted(record_keys::SEED).await
}

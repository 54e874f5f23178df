//! The authoritative store of bearer proofs and their lifecycle state.
//!
//! The whole proof list is one encrypted storage document. Every mutation
//! runs under the ledger lock as a load-decrypt-modify-encrypt-store cycle,
//! so compound transitions (`finalize_spend` removing spent proofs and
//! inserting change) are a single atomic write — no observer can see
//! "change added, spent not removed" or the reverse.
//!
//! `mark_pending_spend` (and its selecting variant) is the only path by
//! which proofs leave the selectable pool. Reservation and release are the
//! exclusive mutators, which is what makes the crash-recovery protocol
//! sufficient: any interruption leaves proofs either Live or PendingSpend,
//! and `resolve_pending` can always decide which way to settle them.

use crate::errors::CustodyError;
use crate::keys::KeyCustodian;
use crate::mint::{MintClient, ProofSpendState};
use crate::proofs::{Proof, ProofState, StoredProof};
use crate::selection::{self, Selection};
use crate::store::record_keys;
use crate::types::{Amount, MintUrl};
use crate::Result;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of a pending-proof recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingResolution {
    /// Proofs the mint reported spent: the prior operation succeeded and
    /// only the local finalize was interrupted; they are removed.
    pub removed: usize,
    /// Proofs the mint reported unspent: the prior operation never
    /// completed; they are reverted to Live.
    pub reverted: usize,
}

/// The proof ledger.
pub struct ProofLedger {
    custodian: Arc<KeyCustodian>,
    lock: Mutex<()>,
}

impl ProofLedger {
    pub fn new(custodian: Arc<KeyCustodian>) -> Self {
        Self {
            custodian,
            lock: Mutex::new(()),
        }
    }

    async fn load_doc(&self) -> Result<Vec<StoredProof>> {
        match self.custodian.load_encrypted(record_keys::PROOFS).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save_doc(&self, doc: &[StoredProof]) -> Result<()> {
        let bytes = serde_json::to_vec(doc)?;
        self.custodian
            .store_encrypted(record_keys::PROOFS, &bytes)
            .await
    }

    /// Store freshly received proofs as Live.
    pub async fn add_proofs(&self, proofs: Vec<Proof>, mint_url: &MintUrl) -> Result<()> {
        if proofs.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock().await;

        let mut doc = self.load_doc().await?;
        let existing: HashSet<String> = doc.iter().map(|p| p.proof.secret.clone()).collect();
        let mut added = 0usize;
        for proof in proofs {
            // Receiving the same proof twice (e.g. a replayed token) must
            // not inflate the balance.
            if existing.contains(&proof.secret) {
                continue;
            }
            doc.push(StoredProof::live(proof, mint_url.clone()));
            added += 1;
        }
        self.save_doc(&doc).await?;

        debug!(mint = %mint_url, added, "stored received proofs");
        Ok(())
    }

    /// All custodied proofs for a mint, in any state.
    pub async fn proofs_for_mint(&self, mint_url: &MintUrl) -> Result<Vec<StoredProof>> {
        Ok(self
            .load_doc()
            .await?
            .into_iter()
            .filter(|p| &p.mint_url == mint_url)
            .collect())
    }

    /// Spendable balance per mint: the sum of Live proof amounts.
    pub async fn balance_by_mint(&self) -> Result<BTreeMap<MintUrl, Amount>> {
        let mut balances = BTreeMap::new();
        for stored in self.load_doc().await? {
            if stored.is_live() {
                let entry = balances.entry(stored.mint_url.clone()).or_insert(Amount::ZERO);
                *entry = Amount::sum([*entry, stored.amount()]);
            }
        }
        Ok(balances)
    }

    /// Spendable balance for one mint.
    pub async fn balance_for_mint(&self, mint_url: &MintUrl) -> Result<Amount> {
        Ok(self
            .balance_by_mint()
            .await?
            .remove(mint_url)
            .unwrap_or(Amount::ZERO))
    }

    /// Reserve specific proofs for an in-flight spend.
    ///
    /// Fails without writing if any proof is absent or already reserved;
    /// partial reservation would defeat the exclusivity guarantee.
    pub async fn mark_pending_spend(&self, proofs: &[Proof]) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut doc = self.load_doc().await?;
        let wanted: HashSet<&str> = proofs.iter().map(|p| p.secret.as_str()).collect();

        let live_matches = doc
            .iter()
            .filter(|p| p.is_live() && wanted.contains(p.proof.secret.as_str()))
            .count();
        if live_matches != wanted.len() {
            return Err(CustodyError::Internal(
                "cannot reserve: proof missing or already pending".to_string(),
            ));
        }

        for stored in doc.iter_mut() {
            if wanted.contains(stored.proof.secret.as_str()) {
                stored.state = ProofState::PendingSpend;
            }
        }
        self.save_doc(&doc).await
    }

    /// Settle a completed spend: remove the spent proofs and store change,
    /// in one atomic write.
    pub async fn finalize_spend(
        &self,
        spent: &[Proof],
        change: Vec<Proof>,
        mint_url: &MintUrl,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut doc = self.load_doc().await?;
        let spent_secrets: HashSet<&str> = spent.iter().map(|p| p.secret.as_str()).collect();
        doc.retain(|p| !spent_secrets.contains(p.proof.secret.as_str()));

        let change_total = crate::proofs::total_amount(&change);
        for proof in change {
            doc.push(StoredProof::live(proof, mint_url.clone()));
        }
        self.save_doc(&doc).await?;

        info!(
            mint = %mint_url,
            spent = spent.len(),
            change = %change_total,
            "finalized spend"
        );
        Ok(())
    }

    /// Return reserved proofs to the spendable pool. Proofs that are not
    /// currently reserved are skipped, so the operation is idempotent.
    pub async fn revert_pending(&self, proofs: &[Proof]) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut doc = self.load_doc().await?;
        let wanted: HashSet<&str> = proofs.iter().map(|p| p.secret.as_str()).collect();
        let mut reverted = 0usize;
        for stored in doc.iter_mut() {
            if stored.is_pending_spend() && wanted.contains(stored.proof.secret.as_str()) {
                stored.state = ProofState::Live;
                reverted += 1;
            }
        }
        if reverted > 0 {
            self.save_doc(&doc).await?;
            debug!(reverted, "reverted pending proofs to live");
        }
        Ok(())
    }

    /// All proofs currently reserved by in-flight spends.
    pub async fn list_pending_spend(&self) -> Result<Vec<StoredProof>> {
        Ok(self
            .load_doc()
            .await?
            .into_iter()
            .filter(|p| p.is_pending_spend())
            .collect())
    }

    /// Select proofs covering `target` for a mint and reserve them, inside
    /// one critical section and one storage write.
    ///
    /// This closes the race between "decide what to spend" and "reserve
    /// it": two concurrent payments can never both choose the same proof.
    pub async fn select_and_mark_pending(
        &self,
        mint_url: &MintUrl,
        target: Amount,
    ) -> Result<Selection> {
        let _guard = self.lock.lock().await;

        let mut doc = self.load_doc().await?;
        let live: Vec<StoredProof> = doc
            .iter()
            .filter(|p| p.is_live() && &p.mint_url == mint_url)
            .cloned()
            .collect();

        let selection = selection::select(&live, target).ok_or_else(|| {
            CustodyError::insufficient_funds(
                target,
                crate::proofs::total_stored_amount(&live),
                vec![mint_url.clone()],
            )
        })?;

        let chosen: HashSet<&str> = selection
            .chosen
            .iter()
            .map(|p| p.proof.secret.as_str())
            .collect();
        for stored in doc.iter_mut() {
            if chosen.contains(stored.proof.secret.as_str()) {
                stored.state = ProofState::PendingSpend;
            }
        }
        self.save_doc(&doc).await?;

        debug!(
            mint = %mint_url,
            target = %target,
            total = %selection.total,
            change = %selection.change,
            "selected and reserved proofs"
        );
        Ok(selection)
    }

    /// Remove proofs the mint has already seen spent.
    async fn remove_proofs(&self, proofs: &[Proof]) -> Result<usize> {
        let _guard = self.lock.lock().await;

        let mut doc = self.load_doc().await?;
        let secrets: HashSet<&str> = proofs.iter().map(|p| p.secret.as_str()).collect();
        let before = doc.len();
        doc.retain(|p| !secrets.contains(p.proof.secret.as_str()));
        let removed = before - doc.len();
        if removed > 0 {
            self.save_doc(&doc).await?;
        }
        Ok(removed)
    }

    /// Crash-recovery protocol for reserved proofs. Run at process start
    /// and periodically.
    ///
    /// For every PendingSpend proof, the mint is asked whether it was
    /// spent: spent means the prior operation actually succeeded and only
    /// the local finalize was interrupted, so the proof is removed; unspent
    /// means the operation never completed at the mint, so the proof is
    /// reverted to Live. Idempotent, and safe to run concurrently with a
    /// retry of itself: each settle step re-checks current state under the
    /// ledger lock.
    pub async fn resolve_pending(&self, client: &dyn MintClient) -> Result<PendingResolution> {
        let pending = self.list_pending_spend().await?;
        if pending.is_empty() {
            return Ok(PendingResolution::default());
        }

        let mut by_mint: BTreeMap<MintUrl, Vec<Proof>> = BTreeMap::new();
        for stored in pending {
            by_mint
                .entry(stored.mint_url.clone())
                .or_default()
                .push(stored.proof);
        }

        let mut resolution = PendingResolution::default();
        for (mint_url, proofs) in by_mint {
            // Network calls stay outside the ledger lock.
            let states = match client.check_proof_states(&mint_url, &proofs).await {
                Ok(states) => states,
                Err(e) => {
                    warn!(mint = %mint_url, error = %e, "pending recovery: mint unreachable");
                    continue;
                }
            };

            let mut spent = Vec::new();
            let mut unspent = Vec::new();
            for (proof, state) in proofs.into_iter().zip(states) {
                match state {
                    ProofSpendState::Spent => spent.push(proof),
                    ProofSpendState::Unspent => unspent.push(proof),
                    // Mint-side pending: a melt may still settle; leave it.
                    ProofSpendState::Pending => {}
                }
            }

            resolution.removed += self.remove_proofs(&spent).await?;
            if !unspent.is_empty() {
                self.revert_pending(&unspent).await?;
                resolution.reverted += unspent.len();
            }
        }

        if resolution != PendingResolution::default() {
            info!(
                removed = resolution.removed,
                reverted = resolution.reverted,
                "resolved pending proofs"
            );
        }
        Ok(resolution)
    }

    /// Reconciliation pass over Live proofs: remove any the mint reports
    /// already spent (covers the same seed spending from another device).
    pub async fn reconcile_live(&self, client: &dyn MintClient) -> Result<usize> {
        let doc = self.load_doc().await?;
        let mut by_mint: BTreeMap<MintUrl, Vec<Proof>> = BTreeMap::new();
        for stored in doc {
            if stored.is_live() {
                by_mint
                    .entry(stored.mint_url.clone())
                    .or_default()
                    .push(stored.proof);
            }
        }

        let mut removed = 0usize;
        for (mint_url, proofs) in by_mint {
            let states = match client.check_proof_states(&mint_url, &proofs).await {
                Ok(states) => states,
                Err(e) => {
                    warn!(mint = %mint_url, error = %e, "reconciliation: mint unreachable");
                    continue;
                }
            };

            let spent: Vec<Proof> = proofs
                .into_iter()
                .zip(states)
                .filter(|(_, state)| *state == ProofSpendState::Spent)
                .map(|(proof, _)| proof)
                .collect();

            if !spent.is_empty() {
                warn!(
                    mint = %mint_url,
                    count = spent.len(),
                    "removing proofs spent outside this wallet"
                );
                removed += self.remove_proofs(&spent).await?;
            }
        }
        Ok(removed)
    }
}

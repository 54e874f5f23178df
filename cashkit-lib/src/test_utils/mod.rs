//! Mock collaborators for testing without a real mint.
//!
//! `MockMint` simulates the mint protocol behind the `MintClient` trait:
//! an in-memory spent set, power-of-two denomination splitting, restorable
//! proofs at deterministic indices, and scriptable melt behavior for the
//! failure paths.

use crate::errors::CustodyError;
use crate::mint::{
    KeysetInfo, MeltOutcome, MeltQuote, MeltQuoteState, MintClient, MintQuote, MintSnapshot,
    ProofSpendState, SendOptions, SendOutcome,
};
use crate::proofs::Proof;
use crate::types::{Amount, KeysetId, MintUrl};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// How a `melt` call should behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeltBehavior {
    /// Melt succeeds and reports Paid.
    Succeed,
    /// Melt errors, but the payment actually went through: the inputs are
    /// spent and the quote state reads Paid.
    ErrorThenPaid,
    /// Melt errors and the payment never happened: quote state reads Unpaid.
    ErrorThenUnpaid,
    /// Melt errors and the status query errors too.
    ErrorStatusUnknown,
}

#[derive(Serialize, Deserialize)]
struct MockToken {
    mint: MintUrl,
    unit: String,
    memo: Option<String>,
    proofs: Vec<Proof>,
}

struct MeltQuoteRecord {
    quote: MeltQuote,
    state: MeltQuoteState,
}

/// In-memory mint simulator.
pub struct MockMint {
    url: MintUrl,
    keyset: KeysetInfo,
    secret_seq: AtomicU64,
    spent: RwLock<HashSet<String>>,
    pending: RwLock<HashSet<String>>,
    restorable: RwLock<BTreeMap<(KeysetId, u64), Proof>>,
    mint_quotes: RwLock<HashMap<String, (MintQuote, bool)>>,
    melt_quotes: RwLock<HashMap<String, MeltQuoteRecord>>,
    melt_behavior: RwLock<MeltBehavior>,
    last_send_options: RwLock<Option<SendOptions>>,
    quote_seq: AtomicU64,
}

impl MockMint {
    pub fn new(url: MintUrl) -> Self {
        Self {
            url,
            keyset: KeysetInfo {
                id: KeysetId::from("00ks"),
                unit: "sat".to_string(),
                active: true,
                input_fee_ppk: 0,
            },
            secret_seq: AtomicU64::new(0),
            spent: RwLock::new(HashSet::new()),
            pending: RwLock::new(HashSet::new()),
            restorable: RwLock::new(BTreeMap::new()),
            mint_quotes: RwLock::new(HashMap::new()),
            melt_quotes: RwLock::new(HashMap::new()),
            melt_behavior: RwLock::new(MeltBehavior::Succeed),
            last_send_options: RwLock::new(None),
            quote_seq: AtomicU64::new(0),
        }
    }

    /// Set the input fee rate for the active keyset.
    pub fn with_fee_ppk(mut self, fee_ppk: u64) -> Self {
        self.keyset.input_fee_ppk = fee_ppk;
        self
    }

    pub fn keyset_id(&self) -> KeysetId {
        self.keyset.id.clone()
    }

    /// Create a fresh unspent proof of the given amount.
    pub fn make_proof(&self, amount: u64) -> Proof {
        let seq = self.secret_seq.fetch_add(1, Ordering::SeqCst);
        Proof {
            keyset_id: self.keyset.id.clone(),
            amount: Amount::from_sats(amount),
            secret: format!("mock-secret-{}", seq),
            c: format!("02mock-{}", seq),
        }
    }

    /// Split an amount into fresh power-of-two proofs.
    pub fn make_proofs_for(&self, amount: Amount) -> Vec<Proof> {
        let mut proofs = Vec::new();
        let mut remaining = amount.as_sats();
        while remaining > 0 {
            let denom = 1u64 << (63 - remaining.leading_zeros());
            proofs.push(self.make_proof(denom));
            remaining -= denom;
        }
        proofs
    }

    /// Mark a proof as spent at the mint.
    pub fn mark_spent(&self, proof: &Proof) {
        self.spent.write().unwrap().insert(proof.secret.clone());
    }

    /// Mark a proof as mint-side pending.
    pub fn mark_mint_pending(&self, proof: &Proof) {
        self.pending.write().unwrap().insert(proof.secret.clone());
    }

    /// Place a proof at a deterministic-secret index for restore scans.
    pub fn seed_restorable(&self, keyset_id: &KeysetId, index: u64, proof: Proof) {
        self.restorable
            .write()
            .unwrap()
            .insert((keyset_id.clone(), index), proof);
    }

    /// Script the behavior of subsequent melt calls.
    pub fn set_melt_behavior(&self, behavior: MeltBehavior) {
        *self.melt_behavior.write().unwrap() = behavior;
    }

    /// Register a Lightning invoice so melt quotes can price it.
    pub fn register_invoice(&self, invoice: &str, amount: Amount, fee_reserve: Amount) -> String {
        let quote_id = format!("melt-{}", self.quote_seq.fetch_add(1, Ordering::SeqCst));
        self.melt_quotes.write().unwrap().insert(
            invoice.to_string(),
            MeltQuoteRecord {
                quote: MeltQuote {
                    quote_id: quote_id.clone(),
                    amount,
                    fee_reserve,
                },
                state: MeltQuoteState::Unpaid,
            },
        );
        quote_id
    }

    /// Simulate the user paying a mint quote's invoice.
    pub fn pay_mint_quote(&self, quote_id: &str) {
        if let Some((_, paid)) = self.mint_quotes.write().unwrap().get_mut(quote_id) {
            *paid = true;
        }
    }

    /// Options passed to the most recent `swap_for_send`.
    pub fn last_send_options(&self) -> Option<SendOptions> {
        self.last_send_options.read().unwrap().clone()
    }

    fn require_url(&self, url: &MintUrl) -> Result<()> {
        if url != &self.url {
            return Err(CustodyError::mint_unavailable(
                url.clone(),
                "unknown mint",
            ));
        }
        Ok(())
    }

    fn spend_state(&self, proof: &Proof) -> ProofSpendState {
        if self.spent.read().unwrap().contains(&proof.secret) {
            ProofSpendState::Spent
        } else if self.pending.read().unwrap().contains(&proof.secret) {
            ProofSpendState::Pending
        } else {
            ProofSpendState::Unspent
        }
    }

    fn melt_record_by_id(&self, quote_id: &str) -> Option<(String, MeltQuote, MeltQuoteState)> {
        let quotes = self.melt_quotes.read().unwrap();
        quotes
            .iter()
            .find(|(_, r)| r.quote.quote_id == quote_id)
            .map(|(invoice, r)| (invoice.clone(), r.quote.clone(), r.state))
    }
}

#[async_trait]
impl MintClient for MockMint {
    async fn load_mint(&self, url: &MintUrl) -> Result<MintSnapshot> {
        self.require_url(url)?;
        Ok(MintSnapshot {
            url: self.url.clone(),
            name: Some("mock mint".to_string()),
            keysets: vec![self.keyset.clone()],
        })
    }

    async fn swap_for_send(
        &self,
        url: &MintUrl,
        amount: Amount,
        inputs: Vec<Proof>,
        options: SendOptions,
    ) -> Result<SendOutcome> {
        self.require_url(url)?;

        for input in &inputs {
            if self.spend_state(input) != ProofSpendState::Unspent {
                return Err(CustodyError::mint_unavailable(
                    url.clone(),
                    format!("input already spent: {}", input.secret),
                ));
            }
        }

        let total = crate::proofs::total_amount(&inputs);
        let fee = Amount::from_sats(
            (inputs.len() as u64 * self.keyset.input_fee_ppk).div_ceil(1000),
        );
        let needed = amount
            .checked_add(fee)
            .ok_or_else(|| CustodyError::Internal("amount overflow".to_string()))?;
        if total < needed {
            return Err(CustodyError::mint_unavailable(
                url.clone(),
                format!("inputs {} below amount plus fee {}", total, needed),
            ));
        }

        for input in &inputs {
            self.mark_spent(input);
        }
        *self.last_send_options.write().unwrap() = Some(options);

        Ok(SendOutcome {
            send: self.make_proofs_for(amount),
            keep: self.make_proofs_for(total.saturating_sub(needed)),
        })
    }

    fn encode_token(
        &self,
        url: &MintUrl,
        proofs: &[Proof],
        unit: &str,
        memo: Option<&str>,
    ) -> Result<String> {
        let token = MockToken {
            mint: url.clone(),
            unit: unit.to_string(),
            memo: memo.map(String::from),
            proofs: proofs.to_vec(),
        };
        Ok(format!("cashuB{}", serde_json::to_string(&token)?))
    }

    async fn receive(&self, token: &str) -> Result<(MintUrl, Vec<Proof>)> {
        let body = token
            .strip_prefix("cashuB")
            .ok_or_else(|| CustodyError::validation("token", "unknown token format"))?;
        let decoded: MockToken = serde_json::from_str(body)?;
        self.require_url(&decoded.mint)?;

        let total = crate::proofs::total_amount(&decoded.proofs);
        for proof in &decoded.proofs {
            if self.spend_state(proof) != ProofSpendState::Unspent {
                return Err(CustodyError::mint_unavailable(
                    decoded.mint.clone(),
                    "token already spent",
                ));
            }
        }
        for proof in &decoded.proofs {
            self.mark_spent(proof);
        }

        Ok((decoded.mint, self.make_proofs_for(total)))
    }

    async fn create_mint_quote(&self, url: &MintUrl, amount: Amount) -> Result<MintQuote> {
        self.require_url(url)?;
        let quote_id = format!("mint-{}", self.quote_seq.fetch_add(1, Ordering::SeqCst));
        let quote = MintQuote {
            quote_id: quote_id.clone(),
            invoice: format!("lnbc-mock-{}", quote_id),
            amount,
        };
        self.mint_quotes
            .write()
            .unwrap()
            .insert(quote_id, (quote.clone(), false));
        Ok(quote)
    }

    async fn mint_proofs(&self, url: &MintUrl, quote_id: &str) -> Result<Vec<Proof>> {
        self.require_url(url)?;
        let amount = {
            let quotes = self.mint_quotes.read().unwrap();
            let (quote, paid) = quotes
                .get(quote_id)
                .ok_or_else(|| CustodyError::validation("quote_id", "unknown quote"))?;
            if !*paid {
                return Err(CustodyError::mint_unavailable(
                    url.clone(),
                    "quote not paid",
                ));
            }
            quote.amount
        };
        Ok(self.make_proofs_for(amount))
    }

    async fn create_melt_quote(&self, url: &MintUrl, invoice: &str) -> Result<MeltQuote> {
        self.require_url(url)?;
        let quotes = self.melt_quotes.read().unwrap();
        quotes
            .get(invoice)
            .map(|r| r.quote.clone())
            .ok_or_else(|| CustodyError::validation("invoice", "unknown invoice"))
    }

    async fn melt(&self, url: &MintUrl, quote_id: &str, inputs: Vec<Proof>) -> Result<MeltOutcome> {
        self.require_url(url)?;
        let behavior = *self.melt_behavior.read().unwrap();
        let (invoice, quote, _) = self
            .melt_record_by_id(quote_id)
            .ok_or_else(|| CustodyError::validation("quote_id", "unknown quote"))?;

        match behavior {
            MeltBehavior::Succeed => {
                for input in &inputs {
                    self.mark_spent(input);
                }
                if let Some(record) = self.melt_quotes.write().unwrap().get_mut(&invoice) {
                    record.state = MeltQuoteState::Paid;
                }
                let total = crate::proofs::total_amount(&inputs);
                let consumed = Amount::sum([quote.amount, quote.fee_reserve]);
                Ok(MeltOutcome {
                    state: MeltQuoteState::Paid,
                    preimage: Some("mock-preimage".to_string()),
                    change: self.make_proofs_for(total.saturating_sub(consumed)),
                })
            }
            MeltBehavior::ErrorThenPaid => {
                for input in &inputs {
                    self.mark_spent(input);
                }
                if let Some(record) = self.melt_quotes.write().unwrap().get_mut(&invoice) {
                    record.state = MeltQuoteState::Paid;
                }
                Err(CustodyError::mint_unavailable(
                    url.clone(),
                    "connection reset during melt",
                ))
            }
            MeltBehavior::ErrorThenUnpaid => Err(CustodyError::mint_unavailable(
                url.clone(),
                "melt rejected",
            )),
            MeltBehavior::ErrorStatusUnknown => Err(CustodyError::mint_unavailable(
                url.clone(),
                "connection reset during melt",
            )),
        }
    }

    async fn melt_quote_state(&self, url: &MintUrl, quote_id: &str) -> Result<MeltQuoteState> {
        self.require_url(url)?;
        if *self.melt_behavior.read().unwrap() == MeltBehavior::ErrorStatusUnknown {
            return Err(CustodyError::mint_unavailable(
                url.clone(),
                "status endpoint unreachable",
            ));
        }
        self.melt_record_by_id(quote_id)
            .map(|(_, _, state)| state)
            .ok_or_else(|| CustodyError::validation("quote_id", "unknown quote"))
    }

    async fn check_proof_states(
        &self,
        url: &MintUrl,
        proofs: &[Proof],
    ) -> Result<Vec<ProofSpendState>> {
        self.require_url(url)?;
        Ok(proofs.iter().map(|p| self.spend_state(p)).collect())
    }

    async fn restore_batch(
        &self,
        url: &MintUrl,
        keyset_id: &KeysetId,
        start: u64,
        count: u64,
    ) -> Result<Vec<Proof>> {
        self.require_url(url)?;
        let restorable = self.restorable.read().unwrap();
        Ok(restorable
            .range((keyset_id.clone(), start)..(keyset_id.clone(), start + count))
            .map(|(_, proof)| proof.clone())
            .collect())
    }

    fn verify_dleq(&self, _proof: &Proof) -> bool {
        true
    }
}

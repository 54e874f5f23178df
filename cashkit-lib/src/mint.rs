//! Mint protocol client contract.
//!
//! The wire protocol (blind signature creation, DLEQ verification math,
//! token string encoding) lives behind this trait and is treated as correct
//! and authoritative for spend status. The custody engine only depends on
//! the operations below.

use crate::proofs::Proof;
use crate::types::{Amount, KeysetId, MintUrl};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A mint signing keyset, as advertised by the mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetInfo {
    pub id: KeysetId,
    pub unit: String,
    /// Whether the mint still signs with this keyset. Inactive keysets
    /// remain redeemable and must be included in recovery scans.
    pub active: bool,
    /// Fee per thousand inputs spent from this keyset.
    pub input_fee_ppk: u64,
}

/// A mint's advertised identity and keysets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintSnapshot {
    pub url: MintUrl,
    pub name: Option<String>,
    pub keysets: Vec<KeysetInfo>,
}

impl MintSnapshot {
    /// Keysets the mint currently signs with.
    pub fn active_keysets(&self) -> impl Iterator<Item = &KeysetInfo> {
        self.keysets.iter().filter(|k| k.active)
    }

    /// Network fee for spending the given proofs, computed from each
    /// input's keyset fee rate (ceiling of the summed per-thousand fees).
    pub fn input_fee(&self, proofs: &[Proof]) -> Amount {
        let sum_ppk: u64 = proofs
            .iter()
            .map(|p| {
                self.keysets
                    .iter()
                    .find(|k| k.id == p.keyset_id)
                    .map(|k| k.input_fee_ppk)
                    .unwrap_or(0)
            })
            .sum();
        Amount::from_sats(sum_ppk.div_ceil(1000))
    }
}

/// How secrets for new output proofs are generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretMode {
    /// Random secrets; unrecoverable without local state.
    Random,
    /// Seed-derived secrets starting at a reserved counter index.
    Deterministic { counter_start: u64 },
}

/// Options for building an outgoing send.
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub secret_mode: SecretMode,
    /// Optional locking condition from the payment demand (e.g. P2PK).
    pub lock: Option<String>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            secret_mode: SecretMode::Random,
            lock: None,
        }
    }
}

/// Result of a swap-for-send: proofs to hand over and proofs to keep.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub send: Vec<Proof>,
    pub keep: Vec<Proof>,
}

/// A quote for receiving over Lightning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintQuote {
    pub quote_id: String,
    pub invoice: String,
    pub amount: Amount,
}

/// A quote for paying a Lightning invoice with proofs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltQuote {
    pub quote_id: String,
    /// Invoice amount.
    pub amount: Amount,
    /// Reserve for the Lightning routing fee; unused reserve comes back
    /// as change.
    pub fee_reserve: Amount,
}

/// Mint-side state of a melt quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeltQuoteState {
    Unpaid,
    Pending,
    Paid,
}

/// Result of a melt call.
#[derive(Debug, Clone)]
pub struct MeltOutcome {
    pub state: MeltQuoteState,
    pub preimage: Option<String>,
    /// Change for unused fee reserve.
    pub change: Vec<Proof>,
}

/// Spend status of a proof as reported by its mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofSpendState {
    Unspent,
    Pending,
    Spent,
}

/// Client for the mint wire protocol.
///
/// Implementations own the blind-signature handshake, deterministic secret
/// derivation from the configured seed, and the token string codec.
#[async_trait]
pub trait MintClient: Send + Sync {
    /// Fetch a mint's identity and keysets.
    async fn load_mint(&self, url: &MintUrl) -> Result<MintSnapshot>;

    /// Swap input proofs for a `send` set of exactly `amount` plus a `keep`
    /// set of change, consuming the inputs at the mint.
    async fn swap_for_send(
        &self,
        url: &MintUrl,
        amount: Amount,
        inputs: Vec<Proof>,
        options: SendOptions,
    ) -> Result<SendOutcome>;

    /// Encode proofs into a transferable token string.
    fn encode_token(&self, url: &MintUrl, proofs: &[Proof], unit: &str, memo: Option<&str>)
        -> Result<String>;

    /// Decode and redeem an incoming token, returning the issuing mint and
    /// freshly swapped proofs now owned by this wallet.
    async fn receive(&self, token: &str) -> Result<(MintUrl, Vec<Proof>)>;

    /// Request a Lightning invoice whose payment funds new proofs.
    async fn create_mint_quote(&self, url: &MintUrl, amount: Amount) -> Result<MintQuote>;

    /// Mint the proofs for a paid mint quote.
    async fn mint_proofs(&self, url: &MintUrl, quote_id: &str) -> Result<Vec<Proof>>;

    /// Quote paying a Lightning invoice with proofs.
    async fn create_melt_quote(&self, url: &MintUrl, invoice: &str) -> Result<MeltQuote>;

    /// Execute a melt quote, spending the inputs.
    async fn melt(&self, url: &MintUrl, quote_id: &str, inputs: Vec<Proof>) -> Result<MeltOutcome>;

    /// Query the state of a melt quote after the fact.
    async fn melt_quote_state(&self, url: &MintUrl, quote_id: &str) -> Result<MeltQuoteState>;

    /// Query spend status for the given proofs, in input order.
    async fn check_proof_states(
        &self,
        url: &MintUrl,
        proofs: &[Proof],
    ) -> Result<Vec<ProofSpendState>>;

    /// Restore proofs whose blind signatures exist at deterministic-secret
    /// indices `[start, start + count)` for a keyset. Presence means a proof
    /// may exist there; spend status must be checked separately.
    async fn restore_batch(
        &self,
        url: &MintUrl,
        keyset_id: &KeysetId,
        start: u64,
        count: u64,
    ) -> Result<Vec<Proof>>;

    /// Verify the mint's data-leakage-equality proof for a received proof.
    fn verify_dleq(&self, proof: &Proof) -> bool;
}

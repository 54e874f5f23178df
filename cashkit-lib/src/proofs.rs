//! Bearer proof data model.
//!
//! A proof is a bearer token: whoever holds its secret can redeem it at the
//! issuing mint. Ownership transfers by surrendering the secret, so the
//! lifecycle state tracked here is the wallet's only defense against
//! double-spending its own funds.

use crate::types::{Amount, KeysetId, MintUrl};
use serde::{Deserialize, Serialize};

/// A bearer ecash token as issued by a mint.
///
/// Immutable once minted. `amount` is always a power-of-two denomination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Keyset that signed this proof
    #[serde(rename = "id")]
    pub keyset_id: KeysetId,
    /// Denomination in sats
    pub amount: Amount,
    /// Secret message; presenting it to the mint spends the proof
    pub secret: String,
    /// Unblinded signature over the secret
    #[serde(rename = "C")]
    pub c: String,
}

/// Lifecycle state of a locally held proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofState {
    /// Spendable: counted in balance, eligible for selection.
    Live,
    /// Reserved by an in-flight spend: excluded from balance and selection
    /// until finalized or reverted.
    PendingSpend,
}

/// A proof under local custody, with its mint of origin and lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProof {
    pub proof: Proof,
    pub mint_url: MintUrl,
    pub state: ProofState,
}

impl StoredProof {
    /// Wrap a freshly received proof in the Live state.
    pub fn live(proof: Proof, mint_url: MintUrl) -> Self {
        Self {
            proof,
            mint_url,
            state: ProofState::Live,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state == ProofState::Live
    }

    pub fn is_pending_spend(&self) -> bool {
        self.state == ProofState::PendingSpend
    }

    pub fn amount(&self) -> Amount {
        self.proof.amount
    }
}

/// Total value of a slice of proofs.
pub fn total_amount(proofs: &[Proof]) -> Amount {
    Amount::sum(proofs.iter().map(|p| p.amount))
}

/// Total value of a slice of stored proofs.
pub fn total_stored_amount(proofs: &[StoredProof]) -> Amount {
    Amount::sum(proofs.iter().map(|p| p.amount()))
}

//! Cashkit payment orchestration.
//!
//! This crate turns decoded HTTP-402-style payment demands into completed
//! (or denied, or failed) transfers, on top of the custody engine in
//! `cashkit-lib`. It owns the per-request state machine, the approval and
//! spending-policy gates, and the guarantee that reserved proofs are never
//! left in limbo: every failure path either reverts the reservation or
//! deliberately leaves it for the ledger's recovery protocol.

use cashkit_lib::{Amount, CustodyError, MintUrl};
use serde::{Deserialize, Serialize};

/// A decoded payment demand as delivered by the transport bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequestEnvelope {
    /// Correlates the reply with the demand.
    pub request_id: String,
    /// Origin of the requesting page.
    pub origin: String,
    /// Mints the requester accepts, in preference order.
    pub accepted_mints: Vec<MintUrl>,
    pub amount: Amount,
    pub unit: String,
    /// Optional locking condition (e.g. P2PK) to apply to the token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locking_condition: Option<String>,
}

/// The reply sent back over the transport bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PaymentReply {
    /// Payment completed; the token satisfies the demand.
    Token { token: String },
    /// A user or policy decision, not an error.
    Denied { reason: String },
    /// The payment could not be completed.
    Failed { error: String },
}

pub mod approval;
pub mod manager;
pub mod policy;

pub use approval::{ApprovalContext, ApprovalDecision, ApprovalPrompt};
pub use manager::{MeltSummary, PaymentManager, PaymentManagerConfig};
pub use policy::{MemoryPolicyStore, OriginLimits, PolicyStore};

/// Result type for payment operations.
pub type Result<T> = std::result::Result<T, PayError>;

#[derive(thiserror::Error, Debug)]
pub enum PayError {
    #[error(transparent)]
    Custody(#[from] CustodyError),
    #[error("approval timed out")]
    ApprovalTimeout,
    #[error("approval surface closed: {0}")]
    ApprovalClosed(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PayError {
    fn from(e: serde_json::Error) -> Self {
        PayError::Serialization(e.to_string())
    }
}

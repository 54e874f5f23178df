//! User approval contract.
//!
//! The host presents an approval surface (popup, dialog) and reports the
//! user's decision. The orchestrator bounds the wait; a timeout or a closed
//! window is a denial, never an error.

use crate::Result;
use cashkit_lib::{Amount, MintUrl};
use serde::{Deserialize, Serialize};

/// What the user is shown when asked to approve a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalContext {
    pub request_id: String,
    pub origin: String,
    pub accepted_mints: Vec<MintUrl>,
    pub amount: Amount,
    pub unit: String,
    /// Spendable balance at the chosen mint, for display.
    pub current_balance: Amount,
}

/// The user's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    /// Allowlist the origin for future payments up to this amount.
    pub remember_origin: bool,
}

/// Host-implemented approval surface.
///
/// Implementations resolve when the user decides; a closed surface should
/// either resolve with `approved: false` or fail with
/// [`PayError::ApprovalClosed`](crate::PayError::ApprovalClosed) — both are
/// treated as denial. The orchestrator wraps the call in a timeout, so
/// implementations need not time out themselves.
#[async_trait::async_trait]
pub trait ApprovalPrompt: Send + Sync {
    async fn request_approval(&self, context: ApprovalContext) -> Result<ApprovalDecision>;
}

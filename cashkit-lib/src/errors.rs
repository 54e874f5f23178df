//! Error types for custody operations.
//!
//! This module provides structured error types for the custody engine,
//! enabling precise error handling and recovery decisions. Policy denials
//! and ambiguous mint outcomes are distinct variants because they demand
//! different handling from plain failures.

use crate::keys::CryptoError;
use crate::types::{Amount, MintUrl};
use std::fmt;

/// Comprehensive error type for custody operations.
#[derive(Debug)]
pub enum CustodyError {
    /// A payment demand or stored record failed structural validation.
    Validation {
        /// Field or parameter name
        field: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Not enough spendable balance to satisfy a request.
    InsufficientFunds {
        /// Amount required (including fees where known)
        required: Amount,
        /// Amount available across the mints considered
        available: Amount,
        /// Mints that were tried, in order
        mints_tried: Vec<MintUrl>,
    },

    /// A spending-policy decision, not an error condition.
    PolicyDenied {
        /// Human-readable reason (per-payment cap, daily cap, user denial)
        reason: String,
    },

    /// A mint could not be reached or rejected the operation.
    MintUnavailable {
        /// The mint in question
        mint: MintUrl,
        /// Underlying error message
        reason: String,
    },

    /// Key material is wrong or absent; the wallet is effectively locked.
    Crypto(CryptoError),

    /// A mint call failed and its true outcome could not be determined.
    /// The associated reservations are deliberately left in place for the
    /// recovery protocol to resolve.
    AmbiguousOutcome {
        /// Operation whose outcome is unknown (e.g. "melt")
        operation: String,
    },

    /// Storage operation failed.
    Storage(String),

    /// Serialization/deserialization error.
    Serialization(String),

    /// Internal/unexpected error.
    Internal(String),
}

impl CustodyError {
    /// Create a validation error.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an insufficient-funds error with the computed shortfall context.
    pub fn insufficient_funds(required: Amount, available: Amount, mints_tried: Vec<MintUrl>) -> Self {
        Self::InsufficientFunds {
            required,
            available,
            mints_tried,
        }
    }

    /// Create a policy-denied outcome.
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::PolicyDenied {
            reason: reason.into(),
        }
    }

    /// Create a mint-unavailable error.
    pub fn mint_unavailable(mint: MintUrl, reason: impl Into<String>) -> Self {
        Self::MintUnavailable {
            mint,
            reason: reason.into(),
        }
    }

    /// Create an ambiguous-outcome error.
    pub fn ambiguous(operation: impl Into<String>) -> Self {
        Self::AmbiguousOutcome {
            operation: operation.into(),
        }
    }

    /// Create a storage error from any error type.
    pub fn storage<E: std::error::Error>(err: E) -> Self {
        Self::Storage(err.to_string())
    }

    /// Returns true if this error means the wallet is locked or the
    /// credential is wrong, as opposed to an I/O or protocol failure.
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Crypto(_))
    }

    /// Returns true if this outcome is a policy decision rather than a failure.
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::PolicyDenied { .. })
    }
}

impl fmt::Display for CustodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { field, reason } => {
                write!(f, "invalid {}: {}", field, reason)
            }
            Self::InsufficientFunds {
                required,
                available,
                mints_tried,
            } => {
                write!(
                    f,
                    "insufficient funds: need {} sats, have {} sats",
                    required, available
                )?;
                if !mints_tried.is_empty() {
                    let tried: Vec<&str> = mints_tried.iter().map(|m| m.as_str()).collect();
                    write!(f, " (mints tried: {})", tried.join(", "))?;
                }
                Ok(())
            }
            Self::PolicyDenied { reason } => write!(f, "payment denied: {}", reason),
            Self::MintUnavailable { mint, reason } => {
                write!(f, "mint {} unavailable: {}", mint, reason)
            }
            Self::Crypto(e) => write!(f, "wallet locked: {}", e),
            Self::AmbiguousOutcome { operation } => {
                write!(
                    f,
                    "{} outcome unknown: reservations left for recovery",
                    operation
                )
            }
            Self::Storage(msg) => write!(f, "storage error: {}", msg),
            Self::Serialization(msg) => write!(f, "serialization error: {}", msg),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for CustodyError {}

impl From<serde_json::Error> for CustodyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<CryptoError> for CustodyError {
    fn from(err: CryptoError) -> Self {
        Self::Crypto(err)
    }
}

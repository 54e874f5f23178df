//! Core value types shared across the custody engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An amount of ecash, in the mint's smallest unit (sats).
///
/// Proof denominations are integral powers of two, so the type wraps a plain
/// `u64` with checked arithmetic. **Never use floating point for amounts.**
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Amount(pub u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Create from sats (smallest unit).
    pub fn from_sats(sats: u64) -> Self {
        Self(sats)
    }

    /// Get the value in sats.
    pub fn as_sats(&self) -> u64 {
        self.0
    }

    /// Checked addition (returns None on overflow).
    pub fn checked_add(&self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Checked subtraction (returns None on underflow).
    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(&self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// Sum an iterator of amounts, saturating at `u64::MAX`.
    pub fn sum<I: IntoIterator<Item = Amount>>(amounts: I) -> Amount {
        amounts
            .into_iter()
            .fold(Amount::ZERO, |acc, a| Amount(acc.0.saturating_add(a.0)))
    }

    /// Number of power-of-two denominations needed to represent this amount.
    ///
    /// Used to size deterministic-secret counter reservations before a swap.
    pub fn denomination_count(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The URL identifying a mint, normalized without a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MintUrl(pub String);

impl MintUrl {
    /// Create a normalized mint URL (trailing slashes stripped).
    pub fn new(url: impl Into<String>) -> Self {
        let url: String = url.into();
        Self(url.trim_end_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MintUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MintUrl {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a versioned mint keyset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeysetId(pub String);

impl KeysetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeysetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for KeysetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

//! Cashkit custody engine.
//!
//! Local custody for bearer ecash proofs redeemable at cryptographic mints.
//! The crate owns the proof lifecycle state machine (at-most-once spend with
//! crash-safe recovery), coin selection, credential-derived encryption of
//! everything at rest, deterministic-secret counter allocation, and seed
//! recovery. The mint wire protocol and the host's storage are consumed
//! through trait-based dependency injection; this crate holds no ambient
//! state.
//!
//! # Example
//!
//! ```ignore
//! use cashkit_lib::{KeyCustodian, MemorySessionCache, MemoryWalletStore, ProofLedger};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryWalletStore::new());
//! let cache = Arc::new(MemorySessionCache::new());
//! let custodian = Arc::new(KeyCustodian::new(store, cache));
//! let ledger = ProofLedger::new(custodian);
//!
//! let balances = ledger.balance_by_mint().await?;
//! ```

pub mod counters;
pub mod errors;
pub mod keys;
pub mod ledger;
pub mod mint;
pub mod monitor;
pub mod pending;
pub mod proofs;
pub mod restore;
pub mod selection;
pub mod store;
pub mod transactions;
mod types;

/// Mock collaborators for testing.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use counters::{CounterAllocator, KeysetCounters};
pub use errors::CustodyError;
pub use keys::{CryptoError, KeyCustodian, MemorySessionCache, SessionKeyCache, WalletSecurity};
pub use ledger::{PendingResolution, ProofLedger};
pub use mint::{
    KeysetInfo, MeltOutcome, MeltQuote, MeltQuoteState, MintClient, MintQuote, MintSnapshot,
    ProofSpendState, SecretMode, SendOptions, SendOutcome,
};
pub use monitor::LedgerMonitor;
pub use pending::{PendingMintQuote, PendingOutgoingToken, PendingStore};
pub use proofs::{Proof, ProofState, StoredProof};
pub use restore::{
    load_seed, store_seed, RecoveryScanner, RestoreSummary, GAP_LIMIT, RESTORE_BATCH_SIZE,
};
pub use selection::{select, Selection};
pub use store::{record_keys, MemoryWalletStore, WalletStore};
pub use transactions::{Transaction, TransactionKind, TransactionLog, TransactionStatus};
pub use types::{Amount, KeysetId, MintUrl};

/// Common result alias for custody operations.
pub type Result<T> = std::result::Result<T, CustodyError>;

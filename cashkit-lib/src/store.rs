//! Persistent wallet storage contract.
//!
//! The engine persists everything through a namespaced key/value store the
//! host application implements (browser extension storage, a file, an
//! embedded database). Records that hold secrets are encrypted by the key
//! custodian before they reach this layer; the store itself never sees
//! plaintext proof material.
//!
//! # Thread Safety
//!
//! The in-memory implementation uses `RwLock`. Lock poisoning is handled
//! gracefully by returning an error rather than panicking.

use crate::errors::CustodyError;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Record keys for the persisted wallet state. Each logical document lives
/// under its own key and is encrypted/decrypted independently.
pub mod record_keys {
    /// Encrypted proof list (the ledger document).
    pub const PROOFS: &str = "cashkit.proofs";
    /// Encrypted recovery seed.
    pub const SEED: &str = "cashkit.seed";
    /// Encrypted recovery phrase (human-readable form of the seed).
    pub const RECOVERY_PHRASE: &str = "cashkit.recovery_phrase";
    /// Keyset counter document. Plaintext: indices are not secret.
    pub const KEYSET_COUNTERS: &str = "cashkit.keyset_counters";
    /// Encrypted transaction log (records can embed bearer tokens).
    pub const TRANSACTIONS: &str = "cashkit.transactions";
    /// Encrypted pending mint-quote records.
    pub const PENDING_QUOTES: &str = "cashkit.pending_quotes";
    /// Encrypted pending outgoing-token records.
    pub const PENDING_TOKENS: &str = "cashkit.pending_tokens";
    /// KDF salt for the credential-derived key. Plaintext by design.
    pub const ENCRYPTION_SALT: &str = "cashkit.encryption_salt";
    /// Pre-credential random key, removed by migration.
    pub const LEGACY_KEY: &str = "cashkit.legacy_key";
    /// Known ciphertext used to verify a derived key before caching it.
    pub const KEY_CHECK: &str = "cashkit.key_check";

    /// Records encrypted with the active key, in migration order.
    pub const ENCRYPTED: &[&str] = &[
        PROOFS,
        SEED,
        RECOVERY_PHRASE,
        TRANSACTIONS,
        PENDING_QUOTES,
        PENDING_TOKENS,
    ];
}

/// Trait for the host-provided wallet store.
///
/// All values are opaque bytes; namespacing is by record key.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Read a record, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a record, replacing any existing value.
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a record. Deleting an absent record is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List all record keys currently present.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory wallet store.
///
/// **Warning**: data is lost when the process exits. Intended for tests and
/// as a reference implementation of the contract.
pub struct MemoryWalletStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

fn lock_error(context: &str) -> CustodyError {
    CustodyError::Storage(format!("MemoryWalletStore: lock poisoned during {}", context))
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored records. Returns 0 if the lock is poisoned.
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().map(|d| d.is_empty()).unwrap_or(true)
    }
}

impl Default for MemoryWalletStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let data = self.data.read().map_err(|_| lock_error("get"))?;
        Ok(data.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut data = self.data.write().map_err(|_| lock_error("put"))?;
        data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut data = self.data.write().map_err(|_| lock_error("delete"))?;
        data.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let data = self.data.read().map_err(|_| lock_error("keys"))?;
        Ok(data.keys().cloned().collect())
    }
}

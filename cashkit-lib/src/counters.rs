//! Per-keyset deterministic-secret counter allocation.
//!
//! Deterministic secrets are derived from the wallet seed and an
//! incrementing per-keyset index. Reusing an index double-encodes a blinded
//! message, which can let a mint (or an observer) link or reject spends, so
//! reservation is serialized: the counters live in one storage document and
//! every mutation runs under a single global lock over its read-modify-write
//! cycle. No network calls happen inside the critical section.
//!
//! Counters only ever move forward. `set_if_higher` and `merge_taking_max`
//! protect against index reuse across restores and imports.

use crate::store::{record_keys, WalletStore};
use crate::types::KeysetId;
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Mapping from keyset to the next unused deterministic-secret index.
pub type KeysetCounters = BTreeMap<KeysetId, u64>;

/// Serialized access to the keyset counter document.
pub struct CounterAllocator {
    store: Arc<dyn WalletStore>,
    /// One logical lock for the whole document: the backing store has no
    /// atomic per-field update, so per-keyset locks would still race on the
    /// document write.
    lock: Mutex<()>,
}

impl CounterAllocator {
    pub fn new(store: Arc<dyn WalletStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<KeysetCounters> {
        match self.store.get(record_keys::KEYSET_COUNTERS).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(KeysetCounters::new()),
        }
    }

    async fn save(&self, counters: &KeysetCounters) -> Result<()> {
        let bytes = serde_json::to_vec(counters)?;
        self.store.put(record_keys::KEYSET_COUNTERS, &bytes).await
    }

    /// Reserve `count` consecutive indices for a keyset and return the first.
    ///
    /// The returned range `[start, start + count)` is exclusively the
    /// caller's; a failed store write aborts without advancing the counter.
    pub async fn reserve(&self, keyset_id: &KeysetId, count: u64) -> Result<u64> {
        let _guard = self.lock.lock().await;

        let mut counters = self.load().await?;
        let start = counters.get(keyset_id).copied().unwrap_or(0);
        counters.insert(keyset_id.clone(), start + count);
        self.save(&counters).await?;

        debug!(keyset = %keyset_id, start, count, "reserved secret indices");
        Ok(start)
    }

    /// Raise a keyset's counter to `value` if the stored value is lower.
    /// Never decreases.
    pub async fn set_if_higher(&self, keyset_id: &KeysetId, value: u64) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut counters = self.load().await?;
        let current = counters.get(keyset_id).copied().unwrap_or(0);
        if value > current {
            counters.insert(keyset_id.clone(), value);
            self.save(&counters).await?;
        }
        Ok(())
    }

    /// Merge a counter snapshot, keeping the maximum per keyset.
    /// Used by recovery so a restore can never move a counter backward.
    pub async fn merge_taking_max(&self, incoming: &KeysetCounters) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut counters = self.load().await?;
        let mut changed = false;
        for (keyset_id, value) in incoming {
            let current = counters.get(keyset_id).copied().unwrap_or(0);
            if *value > current {
                counters.insert(keyset_id.clone(), *value);
                changed = true;
            }
        }
        if changed {
            self.save(&counters).await?;
        }
        Ok(())
    }

    /// Snapshot the current counters.
    pub async fn snapshot(&self) -> Result<KeysetCounters> {
        let _guard = self.lock.lock().await;
        self.load().await
    }
}

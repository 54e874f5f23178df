//! Append-only transaction audit log.
//!
//! Every completed or failed operation appends a record. Records are never
//! deleted; the only permitted mutation is the status transition
//! pending → completed | failed. The log is encrypted at rest because
//! failed-send records can embed live bearer tokens.

use crate::keys::KeyCustodian;
use crate::store::record_keys;
use crate::types::{Amount, MintUrl};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Payment,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// An immutable audit record of one wallet operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub mint_url: MintUrl,
    /// Requesting origin, for payments triggered by a web page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub status: TransactionStatus,
    /// The encoded token, kept so a failed send can be retried or refunded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Unix epoch seconds.
    pub created_at: i64,
}

impl Transaction {
    pub fn new(kind: TransactionKind, amount: Amount, mint_url: MintUrl) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            amount,
            mint_url,
            origin: None,
            status: TransactionStatus::Pending,
            token: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }
}

/// Encrypted, append-only transaction log.
pub struct TransactionLog {
    custodian: Arc<KeyCustodian>,
    lock: Mutex<()>,
}

impl TransactionLog {
    pub fn new(custodian: Arc<KeyCustodian>) -> Self {
        Self {
            custodian,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<Transaction>> {
        match self
            .custodian
            .load_encrypted(record_keys::TRANSACTIONS)
            .await?
        {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, log: &[Transaction]) -> Result<()> {
        let bytes = serde_json::to_vec(log)?;
        self.custodian
            .store_encrypted(record_keys::TRANSACTIONS, &bytes)
            .await
    }

    /// Append a record and return its id.
    pub async fn append(&self, transaction: Transaction) -> Result<String> {
        let _guard = self.lock.lock().await;
        let id = transaction.id.clone();

        let mut log = self.load().await?;
        log.push(transaction);
        self.save(&log).await?;
        Ok(id)
    }

    /// Transition a pending record to completed or failed. Settled records
    /// are left untouched.
    pub async fn set_status(&self, id: &str, status: TransactionStatus) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut log = self.load().await?;
        if let Some(tx) = log.iter_mut().find(|t| t.id == id) {
            if tx.status == TransactionStatus::Pending {
                tx.status = status;
                self.save(&log).await?;
            }
        }
        Ok(())
    }

    /// All records, oldest first.
    pub async fn list(&self) -> Result<Vec<Transaction>> {
        self.load().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::MemorySessionCache;
    use crate::store::MemoryWalletStore;

    fn log() -> TransactionLog {
        let store = Arc::new(MemoryWalletStore::new());
        let cache = Arc::new(MemorySessionCache::new());
        TransactionLog::new(Arc::new(KeyCustodian::new(store, cache)))
    }

    fn tx(amount: u64) -> Transaction {
        Transaction::new(
            TransactionKind::Payment,
            Amount::from_sats(amount),
            MintUrl::new("https://mint.a"),
        )
        .with_origin("https://shop.example")
    }

    #[tokio::test]
    async fn test_append_and_list() {
        let log = log();

        log.append(tx(60)).await.unwrap();
        log.append(tx(10)).await.unwrap();

        let entries = log.list().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].amount, Amount::from_sats(60));
        assert_eq!(entries[0].status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_status_transition_once() {
        let log = log();
        let id = log.append(tx(60)).await.unwrap();

        log.set_status(&id, TransactionStatus::Failed).await.unwrap();
        // A settled record never transitions again.
        log.set_status(&id, TransactionStatus::Completed)
            .await
            .unwrap();

        let entries = log.list().await.unwrap();
        assert_eq!(entries[0].status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_records_are_kept() {
        let log = log();
        let id = log.append(tx(60).with_token("cashuB...")).await.unwrap();
        log.set_status(&id, TransactionStatus::Failed).await.unwrap();

        let entries = log.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].token.as_deref(), Some("cashuB..."));
    }
}

//! Resume records for in-flight operations.
//!
//! If the host process is killed between asking a mint for an invoice and
//! minting the proofs (or between building a token and delivering it), these
//! records carry enough data to resume or refund the operation on the next
//! start. Both documents are encrypted: an outgoing token is spendable by
//! anyone who reads it.

use crate::keys::KeyCustodian;
use crate::store::record_keys;
use crate::types::{Amount, MintUrl};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// An in-flight Lightning receive: quote requested, proofs not yet minted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMintQuote {
    pub quote_id: String,
    pub mint_url: MintUrl,
    pub amount: Amount,
    pub invoice: String,
    pub created_at: i64,
}

/// An outgoing token that was built but may not have reached its recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOutgoingToken {
    pub token: String,
    pub mint_url: MintUrl,
    pub amount: Amount,
    pub created_at: i64,
}

/// Store for resume records.
pub struct PendingStore {
    custodian: Arc<KeyCustodian>,
    lock: Mutex<()>,
}

impl PendingStore {
    pub fn new(custodian: Arc<KeyCustodian>) -> Self {
        Self {
            custodian,
            lock: Mutex::new(()),
        }
    }

    async fn load<T: serde::de::DeserializeOwned>(&self, record_key: &str) -> Result<Vec<T>> {
        match self.custodian.load_encrypted(record_key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save<T: Serialize>(&self, record_key: &str, items: &[T]) -> Result<()> {
        let bytes = serde_json::to_vec(items)?;
        self.custodian.store_encrypted(record_key, &bytes).await
    }

    pub async fn add_quote(&self, quote: PendingMintQuote) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut quotes: Vec<PendingMintQuote> = self.load(record_keys::PENDING_QUOTES).await?;
        quotes.retain(|q| q.quote_id != quote.quote_id);
        quotes.push(quote);
        self.save(record_keys::PENDING_QUOTES, &quotes).await
    }

    pub async fn remove_quote(&self, quote_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut quotes: Vec<PendingMintQuote> = self.load(record_keys::PENDING_QUOTES).await?;
        quotes.retain(|q| q.quote_id != quote_id);
        self.save(record_keys::PENDING_QUOTES, &quotes).await
    }

    pub async fn list_quotes(&self) -> Result<Vec<PendingMintQuote>> {
        self.load(record_keys::PENDING_QUOTES).await
    }

    pub async fn add_token(&self, token: PendingOutgoingToken) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut tokens: Vec<PendingOutgoingToken> = self.load(record_keys::PENDING_TOKENS).await?;
        tokens.retain(|t| t.token != token.token);
        tokens.push(token);
        self.save(record_keys::PENDING_TOKENS, &tokens).await
    }

    pub async fn remove_token(&self, token: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut tokens: Vec<PendingOutgoingToken> = self.load(record_keys::PENDING_TOKENS).await?;
        tokens.retain(|t| t.token != token);
        self.save(record_keys::PENDING_TOKENS, &tokens).await
    }

    pub async fn list_tokens(&self) -> Result<Vec<PendingOutgoingToken>> {
        self.load(record_keys::PENDING_TOKENS).await
    }
}

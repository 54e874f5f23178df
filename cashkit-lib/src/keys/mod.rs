//! Key custody for the encrypted-at-rest wallet.
//!
//! The custodian owns the active encryption key and its lifecycle. A wallet
//! starts with no key material, acquires a random key on first encrypted
//! write, and can later be upgraded to a credential-derived key; the upgrade
//! re-encrypts every stored record and removes the random key. The
//! credential-derived key itself is never persisted, only held in a
//! session-scoped cache.
//!
//! First-use key creation runs behind a single-flight guard: two
//! near-simultaneous first writes must agree on one key, or whichever data
//! was encrypted under the losing key would be orphaned permanently.

pub mod encryption;

pub use encryption::{
    derive_key_from_credential, generate_key, generate_salt, CryptoError, CryptoResult,
    EncryptionContext, SALT_SIZE,
};

use crate::errors::CustodyError;
use crate::store::{record_keys, WalletStore};
use crate::Result;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Plaintext of the key-check record; decrypting it proves a derived key.
const KEY_CHECK_PLAINTEXT: &[u8] = b"cashkit-key-check-v1";

/// Cache for the unlocked key. Implementations must survive process
/// restarts within a browser/user session but be cleared when the session
/// ends; the key must never reach durable disk.
#[async_trait]
pub trait SessionKeyCache: Send + Sync {
    async fn get(&self) -> Option<[u8; 32]>;
    async fn put(&self, key: [u8; 32]);
    async fn clear(&self);
}

/// In-memory session cache. Suitable for tests and hosts whose process
/// lifetime equals the session.
pub struct MemorySessionCache {
    key: RwLock<Option<[u8; 32]>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self {
            key: RwLock::new(None),
        }
    }
}

impl Default for MemorySessionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionKeyCache for MemorySessionCache {
    async fn get(&self) -> Option<[u8; 32]> {
        self.key.read().ok().and_then(|k| *k)
    }

    async fn put(&self, key: [u8; 32]) {
        if let Ok(mut slot) = self.key.write() {
            *slot = Some(key);
        }
    }

    async fn clear(&self) {
        if let Ok(mut slot) = self.key.write() {
            *slot = None;
        }
    }
}

/// Security configuration of the wallet as one explicit state, rather than
/// scattered "seed exists?" / "security enabled?" booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletSecurity {
    /// No key material exists yet.
    Uninitialized,
    /// A random key protects the stores; no credential is configured.
    NoCredential,
    /// A credential is configured but the derived key is not cached.
    CredentialLocked,
    /// A credential is configured and the derived key is cached.
    CredentialUnlocked,
}

/// Owner of the active encryption key and the legacy-key migration.
pub struct KeyCustodian {
    store: Arc<dyn WalletStore>,
    cache: Arc<dyn SessionKeyCache>,
    /// Single-flight guard for first-use key creation and credential setup.
    init_lock: Mutex<()>,
}

impl KeyCustodian {
    pub fn new(store: Arc<dyn WalletStore>, cache: Arc<dyn SessionKeyCache>) -> Self {
        Self {
            store,
            cache,
            init_lock: Mutex::new(()),
        }
    }

    /// Report the wallet's security state.
    pub async fn security_state(&self) -> Result<WalletSecurity> {
        if self.store.get(record_keys::ENCRYPTION_SALT).await?.is_some() {
            if self.cache.get().await.is_some() {
                Ok(WalletSecurity::CredentialUnlocked)
            } else {
                Ok(WalletSecurity::CredentialLocked)
            }
        } else if self.store.get(record_keys::LEGACY_KEY).await?.is_some() {
            Ok(WalletSecurity::NoCredential)
        } else {
            Ok(WalletSecurity::Uninitialized)
        }
    }

    /// Configure a credential for the wallet, migrating any records
    /// encrypted under the pre-credential random key.
    pub async fn set_credential(&self, credential: &str) -> Result<()> {
        let _guard = self.init_lock.lock().await;

        if self.store.get(record_keys::ENCRYPTION_SALT).await?.is_some() {
            return Err(CustodyError::validation(
                "credential",
                "a credential is already configured",
            ));
        }

        let salt = generate_salt();
        let key = derive_key_from_credential(credential, &salt)?;
        let ctx = EncryptionContext::new(key);

        // Key check lands before the salt: until the salt is written the
        // wallet still reads as NoCredential, so a crash here is harmless.
        let check = ctx.encrypt(KEY_CHECK_PLAINTEXT, record_keys::KEY_CHECK.as_bytes())?;
        self.store.put(record_keys::KEY_CHECK, &check).await?;
        self.store.put(record_keys::ENCRYPTION_SALT, &salt).await?;

        self.migrate_legacy_key(&ctx).await?;

        self.cache.put(key).await;
        info!("credential configured, wallet unlocked");
        Ok(())
    }

    /// Unlock the wallet with a credential.
    ///
    /// A wrong credential surfaces as `CryptoError`, never as a generic
    /// storage failure.
    pub async fn unlock(&self, credential: &str) -> Result<()> {
        let salt = self
            .store
            .get(record_keys::ENCRYPTION_SALT)
            .await?
            .ok_or_else(|| CustodyError::validation("credential", "no credential is configured"))?;

        let key = derive_key_from_credential(credential, &salt)?;
        let ctx = EncryptionContext::new(key);

        let check = self
            .store
            .get(record_keys::KEY_CHECK)
            .await?
            .ok_or_else(|| CustodyError::Internal("key check record missing".to_string()))?;
        ctx.decrypt(&check, record_keys::KEY_CHECK.as_bytes())
            .map_err(CustodyError::from)?;

        self.cache.put(key).await;
        debug!("wallet unlocked");
        Ok(())
    }

    /// Drop the cached key, locking the wallet.
    pub async fn lock(&self) {
        self.cache.clear().await;
        debug!("wallet locked");
    }

    /// Resolve the active encryption context.
    ///
    /// With no credential configured this creates (once) and reuses the
    /// random key; with a credential configured it requires an unlocked
    /// session and otherwise fails with the locked condition.
    async fn context(&self) -> Result<EncryptionContext> {
        if let Some(key) = self.cache.get().await {
            return Ok(EncryptionContext::new(key));
        }

        if self.store.get(record_keys::ENCRYPTION_SALT).await?.is_some() {
            return Err(CustodyError::Crypto(CryptoError::NoKey));
        }

        self.ensure_random_key().await
    }

    /// Create or load the pre-credential random key. Single-flight: the
    /// init lock is held across the read-generate-persist sequence, so two
    /// concurrent first uses always converge on one key.
    async fn ensure_random_key(&self) -> Result<EncryptionContext> {
        let _guard = self.init_lock.lock().await;

        if let Some(hex_key) = self.store.get(record_keys::LEGACY_KEY).await? {
            let key = parse_key_record(&hex_key)?;
            self.cache.put(key).await;
            return Ok(EncryptionContext::new(key));
        }

        let key = generate_key();
        self.store
            .put(record_keys::LEGACY_KEY, hex::encode(key).as_bytes())
            .await?;
        self.cache.put(key).await;
        info!("generated wallet encryption key");
        Ok(EncryptionContext::new(key))
    }

    /// Encrypt a record's plaintext for storage under `record_key`.
    pub async fn encrypt_record(&self, record_key: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let ctx = self.context().await?;
        Ok(ctx.encrypt(plaintext, record_key.as_bytes())?)
    }

    /// Decrypt a record's stored bytes.
    pub async fn decrypt_record(&self, record_key: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let ctx = self.context().await?;
        Ok(ctx.decrypt(ciphertext, record_key.as_bytes())?)
    }

    /// Read and decrypt a record, `None` if absent.
    pub async fn load_encrypted(&self, record_key: &str) -> Result<Option<Vec<u8>>> {
        match self.store.get(record_key).await? {
            Some(blob) => Ok(Some(self.decrypt_record(record_key, &blob).await?)),
            None => Ok(None),
        }
    }

    /// Encrypt and write a record.
    pub async fn store_encrypted(&self, record_key: &str, plaintext: &[u8]) -> Result<()> {
        let blob = self.encrypt_record(record_key, plaintext).await?;
        self.store.put(record_key, &blob).await
    }

    /// Re-encrypt every record from the pre-credential random key to
    /// `new_ctx`, then remove the random key.
    ///
    /// Idempotent and safely re-runnable: records that already decrypt
    /// under the new key are skipped, so a partially migrated wallet
    /// finishes on the next run.
    pub async fn migrate_legacy_key(&self, new_ctx: &EncryptionContext) -> Result<()> {
        let legacy_record = match self.store.get(record_keys::LEGACY_KEY).await? {
            Some(r) => r,
            None => return Ok(()), // nothing to migrate
        };
        let legacy_ctx = EncryptionContext::new(parse_key_record(&legacy_record)?);

        for record_key in record_keys::ENCRYPTED {
            let blob = match self.store.get(record_key).await? {
                Some(b) => b,
                None => continue,
            };

            // Already under the new key: a previous run got this far.
            if new_ctx.decrypt(&blob, record_key.as_bytes()).is_ok() {
                continue;
            }

            let plaintext = legacy_ctx
                .decrypt(&blob, record_key.as_bytes())
                .map_err(CustodyError::from)?;
            let reencrypted = new_ctx.encrypt(&plaintext, record_key.as_bytes())?;
            self.store.put(record_key, &reencrypted).await?;
            debug!(record = %record_key, "migrated record to credential key");
        }

        self.store.delete(record_keys::LEGACY_KEY).await?;
        info!("legacy key migration complete");
        Ok(())
    }
}

fn parse_key_record(record: &[u8]) -> Result<[u8; 32]> {
    let hex_str = std::str::from_utf8(record)
        .map_err(|_| CustodyError::Internal("corrupt key record".to_string()))?;
    let bytes = hex::decode(hex_str)
        .map_err(|_| CustodyError::Internal("corrupt key record".to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CustodyError::Internal("key record has wrong length".to_string()))
}

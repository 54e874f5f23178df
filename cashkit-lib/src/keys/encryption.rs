//! Authenticated encryption for wallet records at rest.
//!
//! All secret-bearing records are encrypted with AES-256-GCM under keys
//! derived from a single master key via HKDF, so each record namespace uses
//! its own subkey. The master key is either random (no credential set) or
//! derived from the user credential with Argon2id and a persisted salt.
//!
//! # Wire Format
//!
//! ```text
//! [1 byte version][12 bytes nonce][N bytes ciphertext][16 bytes auth tag]
//! ```
//!
//! Version 1 uses AES-256-GCM with random nonces. Decryption fails closed:
//! a wrong key yields an error, never garbage plaintext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::Argon2;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Current encryption format version.
const ENCRYPTION_VERSION: u8 = 1;

/// Size of the nonce in bytes (96 bits for GCM).
const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
const TAG_SIZE: usize = 16;

/// Size of the credential-KDF salt in bytes.
pub const SALT_SIZE: usize = 32;

/// Crypto error types. A `DecryptFailed` surfaces to callers as the
/// "wallet locked / wrong credential" condition, distinct from I/O errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptFailed(String),
    #[error("wrong key or corrupted data")]
    DecryptFailed,
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("unsupported ciphertext version: {0}")]
    UnsupportedVersion(u8),
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("no key material available")]
    NoKey,
}

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Encryption context holding the active master key.
///
/// Record namespaces get distinct subkeys via HKDF, so two records encrypted
/// under the same master key never share an AES key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionContext {
    master_key: [u8; 32],
}

impl EncryptionContext {
    /// Create a context from a 256-bit master key.
    pub fn new(master_key: [u8; 32]) -> Self {
        Self { master_key }
    }

    /// Derive the subkey for a record namespace using HKDF-SHA256.
    fn derive_subkey(&self, namespace: &[u8]) -> CryptoResult<[u8; 32]> {
        let hk = Hkdf::<Sha256>::new(None, &self.master_key);
        let mut key = [0u8; 32];
        hk.expand(namespace, &mut key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }

    /// Encrypt plaintext for the given record namespace.
    ///
    /// Generates a fresh random 96-bit nonce per call and returns the
    /// versioned wire format `[version][nonce][ciphertext+tag]`.
    pub fn encrypt(&self, plaintext: &[u8], namespace: &[u8]) -> CryptoResult<Vec<u8>> {
        let key = self.derive_subkey(namespace)?;

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CryptoError::EncryptFailed(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptFailed(e.to_string()))?;

        let mut result = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
        result.push(ENCRYPTION_VERSION);
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(result)
    }

    /// Decrypt ciphertext for the given record namespace.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` if the ciphertext is too short or malformed
    /// - `UnsupportedVersion` for an unknown version byte
    /// - `DecryptFailed` if authentication fails (wrong key, tampering,
    ///   or wrong namespace)
    pub fn decrypt(&self, ciphertext: &[u8], namespace: &[u8]) -> CryptoResult<Vec<u8>> {
        let min_len = 1 + NONCE_SIZE + TAG_SIZE;
        if ciphertext.len() < min_len {
            return Err(CryptoError::InvalidFormat);
        }

        let version = ciphertext[0];
        if version != ENCRYPTION_VERSION {
            return Err(CryptoError::UnsupportedVersion(version));
        }

        let nonce_bytes = &ciphertext[1..1 + NONCE_SIZE];
        let encrypted_data = &ciphertext[1 + NONCE_SIZE..];

        let key = self.derive_subkey(namespace)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| CryptoError::DecryptFailed)?;

        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, encrypted_data)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

/// Generate a random 256-bit master key.
pub fn generate_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut key);
    key
}

/// Generate a random KDF salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut salt);
    salt
}

/// Derive a master key from a user credential using Argon2id.
///
/// The derivation is deliberately slow; callers should run it off any
/// latency-sensitive path and cache the result for the session.
pub fn derive_key_from_credential(credential: &str, salt: &[u8]) -> CryptoResult<[u8; 32]> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(credential.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

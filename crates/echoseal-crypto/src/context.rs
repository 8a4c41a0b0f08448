//! Crypto contexts for service-scoped data.
//!
//! All functions are pure - nonce bytes must be provided by the caller.

use std::fmt;

use aes_gcm::{
    Aes128Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{
    error::CryptoError,
    keys::{EncryptionKey, IntegrityKey},
};

type HmacSha256 = Hmac<Sha256>;

/// AES-GCM nonce size (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// HMAC-SHA-256 output size (32 bytes)
pub const SIGNATURE_SIZE: usize = 32;

/// Ciphertext together with the metadata needed to decrypt it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiphertextEnvelope {
    /// Keyset the data was encrypted under
    pub keyset_id: String,
    /// The 12-byte AES-GCM nonce
    pub nonce: [u8; NONCE_SIZE],
    /// The ciphertext including the 16-byte GCM tag
    pub ciphertext: Vec<u8>,
}

/// Encrypts, decrypts, signs and verifies one scoped category of data.
///
/// Implementations are immutable once built and shared across concurrent
/// exchanges, hence `Send + Sync`.
pub trait CryptoContext: Send + Sync + fmt::Debug {
    /// Keyset this context is bound to.
    fn keyset_id(&self) -> &str;

    /// Encrypt `plaintext` under the caller-supplied nonce.
    ///
    /// The caller MUST NOT reuse a nonce with the same context.
    fn encrypt(
        &self,
        plaintext: &[u8],
        nonce: [u8; NONCE_SIZE],
    ) -> Result<CiphertextEnvelope, CryptoError>;

    /// Decrypt an envelope produced by [`CryptoContext::encrypt`].
    fn decrypt(&self, envelope: &CiphertextEnvelope) -> Result<Vec<u8>, CryptoError>;

    /// Compute an integrity signature over `data`.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verify `signature` over `data`.
    ///
    /// # Errors
    ///
    /// - `SignatureMismatch` if the signature does not match
    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), CryptoError>;
}

/// AES-128-GCM / HMAC-SHA-256 crypto context.
///
/// The keyset id is bound into the GCM associated data, so ciphertext
/// relabelled with another keyset id fails authentication even when the keys
/// happen to match.
pub struct SymmetricCryptoContext {
    owner: String,
    keyset_id: String,
    encryption: EncryptionKey,
    integrity: IntegrityKey,
}

impl SymmetricCryptoContext {
    /// Build a context from validated keys.
    pub fn new(
        owner: impl Into<String>,
        keyset_id: impl Into<String>,
        encryption: EncryptionKey,
        integrity: IntegrityKey,
    ) -> Self {
        Self { owner: owner.into(), keyset_id: keyset_id.into(), encryption, integrity }
    }

    /// Build a context from raw configured key bytes.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` if either key has the wrong length
    pub fn from_key_bytes(
        owner: impl Into<String>,
        keyset_id: impl Into<String>,
        encryption: &[u8],
        integrity: &[u8],
    ) -> Result<Self, CryptoError> {
        let encryption = EncryptionKey::from_slice(encryption)?;
        let integrity = IntegrityKey::from_slice(integrity)?;
        Ok(Self::new(owner, keyset_id, encryption, integrity))
    }

    /// Entity that owns this context.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn mac(&self) -> HmacSha256 {
        let Ok(mac) = <HmacSha256 as Mac>::new_from_slice(self.integrity.as_bytes()) else {
            unreachable!("HMAC-SHA256 accepts keys of any length");
        };
        mac
    }
}

impl fmt::Debug for SymmetricCryptoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricCryptoContext")
            .field("owner", &self.owner)
            .field("keyset_id", &self.keyset_id)
            .finish_non_exhaustive()
    }
}

impl CryptoContext for SymmetricCryptoContext {
    fn keyset_id(&self) -> &str {
        &self.keyset_id
    }

    fn encrypt(
        &self,
        plaintext: &[u8],
        nonce: [u8; NONCE_SIZE],
    ) -> Result<CiphertextEnvelope, CryptoError> {
        let cipher = Aes128Gcm::new(self.encryption.as_bytes().into());
        let payload = Payload { msg: plaintext, aad: self.keyset_id.as_bytes() };

        let ciphertext = cipher
            .encrypt(&Nonce::from(nonce), payload)
            .map_err(|_| CryptoError::EncryptFailed { reason: "plaintext too long".to_string() })?;

        Ok(CiphertextEnvelope { keyset_id: self.keyset_id.clone(), nonce, ciphertext })
    }

    fn decrypt(&self, envelope: &CiphertextEnvelope) -> Result<Vec<u8>, CryptoError> {
        if envelope.keyset_id != self.keyset_id {
            return Err(CryptoError::KeysetMismatch {
                expected: self.keyset_id.clone(),
                actual: envelope.keyset_id.clone(),
            });
        }

        let cipher = Aes128Gcm::new(self.encryption.as_bytes().into());
        let payload = Payload { msg: &envelope.ciphertext, aad: self.keyset_id.as_bytes() };

        cipher.decrypt(&Nonce::from(envelope.nonce), payload).map_err(|_| {
            CryptoError::DecryptFailed { reason: "authentication failed".to_string() }
        })
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut mac = self.mac();
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let mut mac = self.mac();
        mac.update(data);
        mac.verify_slice(signature).map_err(|_| CryptoError::SignatureMismatch)
    }
}

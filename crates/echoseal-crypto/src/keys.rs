//! Fixed-length symmetric key material.
//!
//! Keys are validated on construction so a context can never hold material
//! of the wrong size for its algorithm.

use std::fmt;

use zeroize::Zeroize;

use crate::error::CryptoError;

/// AES-128 key length in bytes.
pub const ENCRYPTION_KEY_SIZE: usize = 16;

/// HMAC-SHA-256 key length in bytes.
pub const INTEGRITY_KEY_SIZE: usize = 32;

/// AES-128 encryption key.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; ENCRYPTION_KEY_SIZE]);

impl EncryptionKey {
    /// Wrap an exact-size key.
    pub fn new(bytes: [u8; ENCRYPTION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copy a key out of raw configured bytes.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` if `bytes` is not exactly 16 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key = <[u8; ENCRYPTION_KEY_SIZE]>::try_from(bytes).map_err(|_| {
            CryptoError::InvalidKeyLength {
                key: "encryption",
                expected: ENCRYPTION_KEY_SIZE,
                actual: bytes.len(),
            }
        })?;
        Ok(Self(key))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; ENCRYPTION_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// HMAC-SHA-256 integrity key.
#[derive(Clone, PartialEq, Eq)]
pub struct IntegrityKey([u8; INTEGRITY_KEY_SIZE]);

impl IntegrityKey {
    /// Wrap an exact-size key.
    pub fn new(bytes: [u8; INTEGRITY_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copy a key out of raw configured bytes.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` if `bytes` is not exactly 32 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key = <[u8; INTEGRITY_KEY_SIZE]>::try_from(bytes).map_err(|_| {
            CryptoError::InvalidKeyLength {
                key: "integrity",
                expected: INTEGRITY_KEY_SIZE,
                actual: bytes.len(),
            }
        })?;
        Ok(Self(key))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; INTEGRITY_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for IntegrityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IntegrityKey(..)")
    }
}

impl Drop for IntegrityKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

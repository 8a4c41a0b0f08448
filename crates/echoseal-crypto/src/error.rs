//! Crypto context errors.

use thiserror::Error;

/// Errors produced by crypto contexts and key handling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key material does not match the length required by its algorithm.
    ///
    /// Raised while building contexts from configured bytes. Fatal at
    /// startup; fix the key material and restart.
    #[error("invalid {key} key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Which key was rejected ("encryption" or "integrity")
        key: &'static str,
        /// Required length in bytes
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// Ciphertext was produced under a different keyset.
    #[error("keyset mismatch: context is '{expected}', envelope is '{actual}'")]
    KeysetMismatch {
        /// Keyset id of the decrypting context
        expected: String,
        /// Keyset id recorded in the envelope
        actual: String,
    },

    /// Encryption failed.
    #[error("encryption failed: {reason}")]
    EncryptFailed {
        /// Description of the failure
        reason: String,
    },

    /// Decryption failed (wrong key, tampered ciphertext, bad nonce).
    #[error("decryption failed: {reason}")]
    DecryptFailed {
        /// Description of the failure
        reason: String,
    },

    /// Integrity check over the data failed.
    #[error("signature verification failed")]
    SignatureMismatch,

    /// No crypto context is available for the requested keyset.
    #[error("no crypto context for keyset '{0}'")]
    MissingContext(String),

    /// A keyset id was installed twice while building a table.
    #[error("duplicate keyset '{0}'")]
    DuplicateKeyset(String),

    /// No keys are known for the named entity.
    #[error("no keys for entity '{0}'")]
    UnknownEntity(String),
}

impl CryptoError {
    /// Returns true if the error comes from configured key material rather
    /// than from processing data.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidKeyLength { .. } | Self::DuplicateKeyset(_))
    }
}

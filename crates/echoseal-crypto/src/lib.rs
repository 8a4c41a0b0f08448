//! Echoseal Cryptographic Contexts
//!
//! Crypto contexts protect service-scoped data carried inside exchanged
//! messages. A context pairs an AES-128 encryption key with an HMAC-SHA-256
//! integrity key and is identified by a keyset id.
//!
//! # Key Material
//!
//! ```text
//! 16-byte encryption key ──┐
//!                          ├─> SymmetricCryptoContext (keyset id)
//! 32-byte integrity key ───┘            │
//!                                       ▼
//!                         CryptoContextTable ("" + keyset id)
//! ```
//!
//! Key lengths are validated when the context is built. Nothing here draws
//! randomness: callers supply nonces, which keeps every function
//! deterministic under test.
//!
//! # Lookup
//!
//! The table is built once and only exposes shared lookups afterwards. The
//! entry under the empty keyset id is the default context; [`CryptoContextTable::resolve`]
//! falls back to it when no exact keyset matches.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod context;
mod error;
mod keys;
mod table;

pub use context::{
    CiphertextEnvelope, CryptoContext, NONCE_SIZE, SIGNATURE_SIZE, SymmetricCryptoContext,
};
pub use error::CryptoError;
pub use keys::{ENCRYPTION_KEY_SIZE, EncryptionKey, INTEGRITY_KEY_SIZE, IntegrityKey};
pub use table::{CryptoContextTable, CryptoContextTableBuilder, DEFAULT_KEYSET_ID};

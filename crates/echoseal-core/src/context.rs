//! Entity and message contexts handed to the message control facade.
//!
//! The facade asks a [`MessageContext`] how to treat one message: which
//! crypto contexts may decrypt service data, who the message is addressed
//! to, whether it must be encrypted, and what payload to write.

use std::{collections::HashMap, sync::Arc};

use echoseal_crypto::{CryptoContext, CryptoContextTable, CryptoError, SymmetricCryptoContext};

/// Pre-shared symmetric keys per remote entity identity.
///
/// Each entry is a crypto context whose keyset id is the entity identity.
#[derive(Debug, Clone, Default)]
pub struct PresharedKeyStore {
    entities: HashMap<String, Arc<dyn CryptoContext>>,
}

impl PresharedKeyStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity's keys from raw bytes.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` if either key has the wrong length
    /// - `DuplicateKeyset` if the identity is already present
    pub fn with_entity(
        mut self,
        identity: &str,
        encryption_key: &[u8],
        integrity_key: &[u8],
    ) -> Result<Self, CryptoError> {
        if self.entities.contains_key(identity) {
            return Err(CryptoError::DuplicateKeyset(identity.to_string()));
        }
        let context = SymmetricCryptoContext::from_key_bytes(
            identity,
            identity,
            encryption_key,
            integrity_key,
        )?;
        self.entities.insert(identity.to_string(), Arc::new(context));
        Ok(self)
    }

    /// Keys for `identity`, if known.
    pub fn get(&self, identity: &str) -> Option<&Arc<dyn CryptoContext>> {
        self.entities.get(identity)
    }

    /// Keys for `identity`.
    ///
    /// # Errors
    ///
    /// - `UnknownEntity` if the identity has no keys
    pub fn require(&self, identity: &str) -> Result<&Arc<dyn CryptoContext>, CryptoError> {
        self.get(identity).ok_or_else(|| CryptoError::UnknownEntity(identity.to_string()))
    }

    /// Number of known entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if no entity keys are stored.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Credentials and configuration identifying this server to the engine.
///
/// Shared read-only by every exchange.
#[derive(Debug, Clone)]
pub struct EntityContext {
    identity: String,
    preshared_keys: PresharedKeyStore,
}

impl EntityContext {
    /// Entity context with no preshared entity keys.
    pub fn new(identity: impl Into<String>) -> Self {
        Self { identity: identity.into(), preshared_keys: PresharedKeyStore::new() }
    }

    /// Attach the preshared key store used for entity authentication.
    #[must_use]
    pub fn with_preshared_keys(mut self, store: PresharedKeyStore) -> Self {
        self.preshared_keys = store;
        self
    }

    /// This server's entity identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Preshared keys of known remote entities.
    pub fn preshared_keys(&self) -> &PresharedKeyStore {
        &self.preshared_keys
    }
}

/// How the engine should interpret or build one message.
pub trait MessageContext: Send + Sync {
    /// Crypto contexts for service-scoped data, keyed by keyset id.
    fn crypto_contexts(&self) -> Option<&CryptoContextTable> {
        None
    }

    /// Identity of the entity the message is addressed to.
    fn remote_entity_identity(&self) -> Option<&str> {
        None
    }

    /// Whether the message must be encrypted.
    fn is_encrypted(&self) -> bool;

    /// Whether the message must be integrity protected.
    fn is_integrity_protected(&self) -> bool;

    /// Whether the message must be protected against replay.
    fn is_non_replayable(&self) -> bool {
        false
    }

    /// Whether the message requests new master or user tokens.
    fn is_requesting_tokens(&self) -> bool {
        false
    }

    /// User the message is sent on behalf of.
    fn user_id(&self) -> Option<&str> {
        None
    }

    /// Application payload to write into the message.
    fn payload(&self) -> &[u8] {
        &[]
    }
}

/// Context for receiving a request.
///
/// Borrows the server's crypto context table so the engine can decrypt and
/// verify service tokens embedded in the inbound message.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveMessageContext<'a> {
    crypto_contexts: &'a CryptoContextTable,
}

impl<'a> ReceiveMessageContext<'a> {
    /// Receive context bound to `crypto_contexts`.
    pub fn new(crypto_contexts: &'a CryptoContextTable) -> Self {
        Self { crypto_contexts }
    }
}

impl MessageContext for ReceiveMessageContext<'_> {
    fn crypto_contexts(&self) -> Option<&CryptoContextTable> {
        Some(self.crypto_contexts)
    }

    fn is_encrypted(&self) -> bool {
        false
    }

    fn is_integrity_protected(&self) -> bool {
        false
    }
}

/// Context for responding to a request.
///
/// Addresses the response to `recipient` and writes `payload` unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespondMessageContext {
    recipient: String,
    encrypted: bool,
    payload: String,
}

impl RespondMessageContext {
    /// Respond context for `recipient` carrying `payload`.
    pub fn new(recipient: impl Into<String>, encrypted: bool, payload: impl Into<String>) -> Self {
        Self { recipient: recipient.into(), encrypted, payload: payload.into() }
    }

    /// Entity the response is addressed to.
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// Payload text.
    pub fn payload_text(&self) -> &str {
        &self.payload
    }
}

impl MessageContext for RespondMessageContext {
    fn remote_entity_identity(&self) -> Option<&str> {
        Some(&self.recipient)
    }

    fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    fn is_integrity_protected(&self) -> bool {
        true
    }

    fn payload(&self) -> &[u8] {
        self.payload.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_context_exposes_table() {
        let table = CryptoContextTable::default();
        let ctx = ReceiveMessageContext::new(&table);

        assert!(ctx.crypto_contexts().is_some());
        assert!(ctx.remote_entity_identity().is_none());
        assert!(!ctx.is_encrypted());
        assert!(!ctx.is_integrity_protected());
        assert!(!ctx.is_requesting_tokens());
        assert!(ctx.payload().is_empty());
    }

    #[test]
    fn respond_context_carries_recipient_and_payload() {
        let ctx = RespondMessageContext::new("client-42", true, "hello");

        assert_eq!(ctx.remote_entity_identity(), Some("client-42"));
        assert!(ctx.is_encrypted());
        assert!(ctx.is_integrity_protected());
        assert!(!ctx.is_non_replayable());
        assert_eq!(ctx.payload(), b"hello");
        assert_eq!(ctx.payload_text(), "hello");
        assert!(ctx.crypto_contexts().is_none());
    }

    #[test]
    fn preshared_store_lookup() {
        let store = PresharedKeyStore::new().with_entity("client-1", &[1; 16], &[2; 32]).unwrap();

        assert_eq!(store.require("client-1").unwrap().keyset_id(), "client-1");
        assert_eq!(
            store.require("client-2").unwrap_err(),
            CryptoError::UnknownEntity("client-2".to_string())
        );
    }

    #[test]
    fn preshared_store_rejects_bad_keys_and_duplicates() {
        assert!(PresharedKeyStore::new().with_entity("c", &[1; 8], &[2; 32]).is_err());

        let store = PresharedKeyStore::new().with_entity("c", &[1; 16], &[2; 32]).unwrap();
        assert!(matches!(
            store.with_entity("c", &[1; 16], &[2; 32]),
            Err(CryptoError::DuplicateKeyset(id)) if id == "c"
        ));
    }

    #[test]
    fn entity_context_identity() {
        let ctx = EntityContext::new("server");
        assert_eq!(ctx.identity(), "server");
        assert!(ctx.preshared_keys().is_empty());
    }
}

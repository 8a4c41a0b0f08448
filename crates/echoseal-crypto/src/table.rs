//! Keyset id to crypto context mapping.
//!
//! # Default Resolution
//!
//! The entry stored under [`DEFAULT_KEYSET_ID`] (the empty string) is the
//! catch-all context. [`CryptoContextTable::resolve`] returns the exact match
//! for a keyset id when one exists and the default otherwise, so message
//! contexts can find a context without knowing the configured keyset id.
//!
//! # Invariants
//!
//! - Immutable after [`CryptoContextTableBuilder::build`]: the table exposes
//!   no `&mut self` methods, so concurrent exchanges share it without locks.
//! - A context installed with [`CryptoContextTableBuilder::with_default`] is
//!   the same `Arc` under both its own keyset id and the default id.

use std::{collections::HashMap, sync::Arc};

use crate::{context::CryptoContext, error::CryptoError};

/// Keyset id of the default (catch-all) context.
pub const DEFAULT_KEYSET_ID: &str = "";

/// Read-only mapping from keyset id to crypto context.
#[derive(Debug, Clone, Default)]
pub struct CryptoContextTable {
    contexts: HashMap<String, Arc<dyn CryptoContext>>,
}

impl CryptoContextTable {
    /// Start building a table.
    pub fn builder() -> CryptoContextTableBuilder {
        CryptoContextTableBuilder::default()
    }

    /// Table with a single context installed as the default.
    pub fn with_default(context: Arc<dyn CryptoContext>) -> Self {
        let mut contexts = HashMap::new();
        contexts.insert(context.keyset_id().to_string(), Arc::clone(&context));
        contexts.insert(DEFAULT_KEYSET_ID.to_string(), context);
        Self { contexts }
    }

    /// Context stored under exactly `keyset_id`.
    pub fn get(&self, keyset_id: &str) -> Option<&Arc<dyn CryptoContext>> {
        self.contexts.get(keyset_id)
    }

    /// The default context, if one was installed.
    pub fn default_context(&self) -> Option<&Arc<dyn CryptoContext>> {
        self.contexts.get(DEFAULT_KEYSET_ID)
    }

    /// Exact match for `keyset_id`, falling back to the default context.
    pub fn resolve(&self, keyset_id: &str) -> Option<&Arc<dyn CryptoContext>> {
        self.get(keyset_id).or_else(|| self.default_context())
    }

    /// Like [`resolve`](Self::resolve), but missing contexts are an error.
    pub fn require(&self, keyset_id: &str) -> Result<&Arc<dyn CryptoContext>, CryptoError> {
        self.resolve(keyset_id).ok_or_else(|| CryptoError::MissingContext(keyset_id.to_string()))
    }

    /// Installed keyset ids, including the default id if present.
    pub fn keyset_ids(&self) -> impl Iterator<Item = &str> {
        self.contexts.keys().map(String::as_str)
    }

    /// Number of installed entries (the default counts separately).
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// True if no contexts are installed.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Builder for [`CryptoContextTable`].
///
/// Construction is the only phase in which entries can be added.
#[derive(Debug, Default)]
pub struct CryptoContextTableBuilder {
    contexts: HashMap<String, Arc<dyn CryptoContext>>,
}

impl CryptoContextTableBuilder {
    /// Install `context` under its own keyset id.
    ///
    /// # Errors
    ///
    /// - `DuplicateKeyset` if the keyset id is already installed
    pub fn insert(mut self, context: Arc<dyn CryptoContext>) -> Result<Self, CryptoError> {
        let keyset_id = context.keyset_id().to_string();
        self.put(keyset_id, context)?;
        Ok(self)
    }

    /// Install `context` under its own keyset id and as the default.
    ///
    /// # Errors
    ///
    /// - `DuplicateKeyset` if either id is already installed
    pub fn with_default(mut self, context: Arc<dyn CryptoContext>) -> Result<Self, CryptoError> {
        let keyset_id = context.keyset_id().to_string();
        if keyset_id != DEFAULT_KEYSET_ID {
            self.put(keyset_id, Arc::clone(&context))?;
        }
        self.put(DEFAULT_KEYSET_ID.to_string(), context)?;
        Ok(self)
    }

    /// Freeze the table.
    pub fn build(self) -> CryptoContextTable {
        CryptoContextTable { contexts: self.contexts }
    }

    fn put(
        &mut self,
        keyset_id: String,
        context: Arc<dyn CryptoContext>,
    ) -> Result<(), CryptoError> {
        if self.contexts.contains_key(&keyset_id) {
            return Err(CryptoError::DuplicateKeyset(keyset_id));
        }
        self.contexts.insert(keyset_id, context);
        Ok(())
    }
}

//! Server configuration.
//!
//! Exchange settings are process-wide: one timeout bounds every receive and
//! respond wait, and one service token key pair is installed at startup.

use std::{fmt, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use echoseal_core::EntityContext;
use echoseal_crypto::{CryptoContextTable, SymmetricCryptoContext};

use crate::error::ServerError;

/// Timeout applied to both the receive and the respond wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Keyset id of the service token crypto context.
pub const SERVICE_TOKEN_KEYSET_ID: &str = "serviceTokenKeySetId";

/// Service token AES-128 key (hex).
pub const SERVICE_TOKEN_ENCRYPTION_KEY: &str = "000102030405060708090A0B0C0D0E0F";

/// Service token HMAC-SHA-256 key (hex).
pub const SERVICE_TOKEN_HMAC_KEY: &str =
    "000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F";

/// Default entity identity of this server.
pub const DEFAULT_SERVER_IDENTITY: &str = "echoseal-server";

/// Service token key material, hex encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceTokenKeys {
    /// Keyset id the context is bound to
    pub keyset_id: String,
    /// AES-128 key, 32 hex digits
    pub encryption_key: String,
    /// HMAC-SHA-256 key, 64 hex digits
    pub hmac_key: String,
}

impl Default for ServiceTokenKeys {
    fn default() -> Self {
        Self {
            keyset_id: SERVICE_TOKEN_KEYSET_ID.to_string(),
            encryption_key: SERVICE_TOKEN_ENCRYPTION_KEY.to_string(),
            hmac_key: SERVICE_TOKEN_HMAC_KEY.to_string(),
        }
    }
}

impl fmt::Debug for ServiceTokenKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceTokenKeys")
            .field("keyset_id", &self.keyset_id)
            .finish_non_exhaustive()
    }
}

/// Settings for one exchange cycle.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Bound on each receive and respond wait
    pub timeout: Duration,
    /// Service token crypto context keys
    pub service_tokens: ServiceTokenKeys,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT, service_tokens: ServiceTokenKeys::default() }
    }
}

impl ExchangeConfig {
    /// Reject settings that would make every exchange fail.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.timeout.is_zero() {
            return Err(ServerError::Configuration("exchange timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Certificate the QUIC endpoint presents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsIdentity {
    /// Certificate chain and private key read from PEM files.
    Pem {
        /// Certificate chain (PEM)
        cert_path: PathBuf,
        /// Private key (PEM, PKCS#8, PKCS#1 or SEC1)
        key_path: PathBuf,
    },
    /// Certificate generated at startup. Only suitable for local testing.
    SelfSigned {
        /// Names the certificate is valid for
        subject_alt_names: Vec<String>,
    },
}

impl Default for TlsIdentity {
    fn default() -> Self {
        Self::SelfSigned { subject_alt_names: vec!["localhost".to_string()] }
    }
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// UDP address the QUIC endpoint binds to
    pub bind_address: SocketAddr,
    /// Certificate presented to clients
    pub tls: TlsIdentity,
    /// Exchange settings (timeout, service token keys)
    pub exchange: ExchangeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 4433)),
            tls: TlsIdentity::default(),
            exchange: ExchangeConfig::default(),
        }
    }
}

/// Build the service token crypto context table.
///
/// One context is created from `keys`, owned by `entity`, and installed
/// under its keyset id and as the default.
///
/// # Errors
///
/// - `Configuration` if a key is not valid hex or has the wrong length
pub fn build_crypto_contexts(
    entity: &EntityContext,
    keys: &ServiceTokenKeys,
) -> Result<CryptoContextTable, ServerError> {
    let encryption = hex::decode(&keys.encryption_key).map_err(|e| {
        ServerError::Configuration(format!("service token encryption key is not hex: {e}"))
    })?;
    let hmac = hex::decode(&keys.hmac_key).map_err(|e| {
        ServerError::Configuration(format!("service token HMAC key is not hex: {e}"))
    })?;

    let context = SymmetricCryptoContext::from_key_bytes(
        entity.identity(),
        keys.keyset_id.as_str(),
        &encryption,
        &hmac,
    )
    .map_err(|e| ServerError::Configuration(format!("service token keys: {e}")))?;

    tracing::debug!(
        keyset_id = %keys.keyset_id,
        owner = %entity.identity(),
        "Installed service token crypto context"
    );

    Ok(CryptoContextTable::with_default(Arc::new(context)))
}

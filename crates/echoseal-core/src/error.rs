//! Errors surfaced by the message control facade.
//!
//! This is the facade's own failure channel. The orchestrator never inspects
//! the variants to decide on retries; it wraps them into its exchange error
//! and hands them to the caller.

use std::{io, time::Duration};

use echoseal_crypto::CryptoError;
use thiserror::Error;

/// Errors that a [`crate::MessageControl`] implementation can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// Reading from or writing to the byte channel failed.
    #[error("channel I/O error: {0}")]
    Io(String),

    /// The facade gave up waiting for the peer.
    #[error("timed out after {elapsed:?}")]
    Timeout {
        /// How long the facade waited
        elapsed: Duration,
    },

    /// Message could not be parsed or encoded.
    #[error("message encoding error: {0}")]
    Encoding(String),

    /// A crypto operation inside the engine failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The peer entity could not be authenticated.
    #[error("entity authentication failed for '{identity}': {reason}")]
    EntityAuth {
        /// Claimed identity of the peer
        identity: String,
        /// Why authentication failed
        reason: String,
    },

    /// The engine hit an unexpected state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Returns true if the failure may succeed on a fresh exchange.
    ///
    /// Timeouts and channel I/O are transient; malformed messages and
    /// authentication failures indicate a broken or hostile peer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout { .. })
    }
}

impl From<io::Error> for ControlError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            return Self::Timeout { elapsed: Duration::ZERO };
        }
        Self::Io(err.to_string())
    }
}

/// Convert `ControlError` to `io::Error` at async I/O boundaries.
impl From<ControlError> for io::Error {
    fn from(err: ControlError) -> Self {
        let kind = match &err {
            ControlError::Io(_) | ControlError::Internal(_) => io::ErrorKind::Other,
            ControlError::Timeout { .. } => io::ErrorKind::TimedOut,
            ControlError::Encoding(_) | ControlError::Crypto(_) => io::ErrorKind::InvalidData,
            ControlError::EntityAuth { .. } => io::ErrorKind::PermissionDenied,
        };
        Self::new(kind, err.to_string())
    }
}

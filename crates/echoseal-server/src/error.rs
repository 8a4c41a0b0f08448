//! Server error types.
//!
//! Every failure of an exchange cycle is reported through [`ServerError`].
//! Benign aborts (no inbound message, interrupted waits) are not errors; see
//! [`crate::ExchangeOutcome`].

use std::{fmt, io, time::Duration};

use echoseal_core::ControlError;
use echoseal_crypto::CryptoError;
use thiserror::Error;

/// Wait inside an exchange cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStage {
    /// Waiting for the inbound message (including its payload)
    Receive,
    /// Waiting for the response to be sent
    Respond,
}

impl fmt::Display for ExchangeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Receive => f.write_str("receive"),
            Self::Respond => f.write_str("respond"),
        }
    }
}

/// Why a receive or respond wait failed.
#[derive(Error, Debug)]
pub enum ExchangeFailure {
    /// The message control facade reported a failure.
    #[error("message control failed: {0}")]
    Control(#[from] ControlError),

    /// No result arrived within the exchange timeout.
    #[error("no result within {timeout:?}")]
    Timeout {
        /// Configured exchange timeout
        timeout: Duration,
    },

    /// The inbound payload stream could not be read.
    #[error("payload read failed: {0}")]
    Payload(#[from] io::Error),
}

/// Errors that can occur in the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error (malformed key material, invalid bind address,
    /// unreadable TLS files).
    ///
    /// Fatal: prevents server construction. Fix configuration and restart.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The inbound message carried an error header.
    ///
    /// Should never happen with a well-behaved peer. The cycle is aborted and
    /// no response is sent.
    #[error("unexpectedly received error message: [{code}][{internal_code}][{message}]")]
    Protocol {
        /// Response code from the error header
        code: u32,
        /// Internal code from the error header
        internal_code: i32,
        /// Error text from the error header
        message: String,
    },

    /// The sender's identity could not be recovered from the message.
    #[error("error extracting identity from request: {0}")]
    IdentityExtraction(#[source] CryptoError),

    /// A receive or respond wait failed.
    ///
    /// Wraps the original cause. Never retried by the server; the caller
    /// decides whether to open a new exchange.
    #[error("exchange failed during {stage}: {source}")]
    Exchange {
        /// Which wait failed
        stage: ExchangeStage,
        /// Underlying cause
        #[source]
        source: ExchangeFailure,
    },

    /// Transport/network error (endpoint failure, stream I/O).
    #[error("transport error: {0}")]
    Transport(String),
}

impl ServerError {
    /// Returns true if a fresh exchange may succeed where this one failed.
    ///
    /// Timeouts and channel I/O are transient. Configuration, protocol and
    /// identity failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Exchange { source: ExchangeFailure::Control(err), .. } => err.is_transient(),
            Self::Exchange { source: ExchangeFailure::Timeout { .. }, .. }
            | Self::Exchange { source: ExchangeFailure::Payload(_), .. }
            | Self::Transport(_) => true,
            Self::Configuration(_) | Self::Protocol { .. } | Self::IdentityExtraction(_) => false,
        }
    }

    /// Returns true if the error is a timed-out wait.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Exchange {
                source: ExchangeFailure::Timeout { .. }
                    | ExchangeFailure::Control(ControlError::Timeout { .. }),
                ..
            }
        )
    }

    pub(crate) fn exchange(stage: ExchangeStage, source: impl Into<ExchangeFailure>) -> Self {
        Self::Exchange { stage, source: source.into() }
    }
}

impl From<io::Error> for ServerError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

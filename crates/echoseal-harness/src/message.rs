//! In-memory inbound message.

use std::{
    io::Cursor,
    pin::Pin,
    task::{Context, Poll},
};

use echoseal_core::{ErrorHeader, InboundMessage, ServiceToken, User};
use echoseal_crypto::CryptoError;
use tokio::io::{AsyncRead, ReadBuf};

/// Inbound message whose payload and metadata are fixed up front.
///
/// Used by both test facades. The sender identity is stored as a result so
/// tests can model messages whose identity cannot be established.
#[derive(Debug, Clone)]
pub struct SimMessage {
    identity: Result<String, CryptoError>,
    user: Option<User>,
    error_header: Option<ErrorHeader>,
    service_tokens: Vec<ServiceToken>,
    payload: Cursor<Vec<u8>>,
    stalled: bool,
}

impl SimMessage {
    /// Application message from `sender` carrying `payload`.
    pub fn new(sender: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            identity: Ok(sender.into()),
            user: None,
            error_header: None,
            service_tokens: Vec::new(),
            payload: Cursor::new(payload.into()),
            stalled: false,
        }
    }

    /// Error message from `sender`.
    pub fn error(sender: impl Into<String>, header: ErrorHeader) -> Self {
        let mut message = Self::new(sender, Vec::new());
        message.error_header = Some(header);
        message
    }

    /// Replace the sender identity with a lookup failure.
    #[must_use]
    pub fn with_identity_error(mut self, error: CryptoError) -> Self {
        self.identity = Err(error);
        self
    }

    /// Attach an authenticated user.
    #[must_use]
    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    /// Attach decrypted service tokens.
    #[must_use]
    pub fn with_service_tokens(mut self, tokens: Vec<ServiceToken>) -> Self {
        self.service_tokens = tokens;
        self
    }

    /// Make payload reads pend forever, as if the peer stopped sending.
    #[must_use]
    pub fn with_stalled_payload(mut self) -> Self {
        self.stalled = true;
        self
    }

    /// Full application payload, independent of how much has been read.
    pub fn payload(&self) -> &[u8] {
        self.payload.get_ref()
    }
}

impl AsyncRead for SimMessage {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.stalled {
            return Poll::Pending;
        }
        Pin::new(&mut self.payload).poll_read(cx, buf)
    }
}

impl InboundMessage for SimMessage {
    fn error_header(&self) -> Option<&ErrorHeader> {
        self.error_header.as_ref()
    }

    fn identity(&self) -> Result<String, CryptoError> {
        self.identity.clone()
    }

    fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    fn service_tokens(&self) -> &[ServiceToken] {
        &self.service_tokens
    }
}

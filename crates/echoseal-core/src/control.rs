//! Message control facade.
//!
//! The secure-messaging engine is an external collaborator. The orchestrator
//! drives it only through [`MessageControl::receive`] and
//! [`MessageControl::respond`]; entity authentication, key exchange, token
//! lifecycle and message encryption all happen behind this trait.
//!
//! # Timeouts
//!
//! Both operations receive the caller's timeout so the engine can bound its
//! own reads and writes. Callers still bound the returned future themselves;
//! an engine that ignores the timeout must not be able to hang an exchange.

use std::{future::Future, time::Duration};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    context::{EntityContext, MessageContext},
    error::ControlError,
    message::InboundMessage,
};

/// Channel left open after a response was sent.
///
/// One-shot exchanges ignore it; it is returned so callers that want a
/// persistent channel know who is on the other end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Entity the response was sent to
    pub remote_identity: String,
    /// Whether the response was encrypted
    pub encrypted: bool,
}

/// Entry points of the secure-messaging engine.
///
/// Implementations must be safe to call from many exchanges at once; each
/// call owns its byte channels exclusively.
pub trait MessageControl: Send + Sync + 'static {
    /// Message type produced by [`receive`](Self::receive).
    type Message: InboundMessage;

    /// Receive one message from `input`.
    ///
    /// The engine may write to `output` on its own (e.g. an error response
    /// during a failed handshake). Returns `Ok(None)` when there is no
    /// message to process.
    fn receive<R, W>(
        &self,
        entity: &EntityContext,
        msg_ctx: &dyn MessageContext,
        input: &mut R,
        output: &mut W,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<Self::Message>, ControlError>> + Send
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send;

    /// Send a response to `request` on `output`.
    ///
    /// `request` is the message returned by the matching receive; the engine
    /// needs it to continue the exchange (tokens, message ids).
    fn respond<R, W>(
        &self,
        entity: &EntityContext,
        msg_ctx: &dyn MessageContext,
        input: &mut R,
        output: &mut W,
        request: &Self::Message,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<Channel>, ControlError>> + Send
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send;
}

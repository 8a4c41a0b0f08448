//! Scripted message control facade.
//!
//! Each call to `receive` or `respond` pops the next scripted outcome. When a
//! script runs dry, `receive` yields no message and `respond` succeeds. Every
//! call is recorded so tests can assert on what the server asked for.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use echoseal_core::{
    Channel, ControlError, EntityContext, InboundMessage, MessageContext, MessageControl,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::message::SimMessage;

/// Scripted outcome of one `receive` call.
#[derive(Debug, Clone)]
pub enum ReceiveScript {
    /// Deliver this message
    Message(SimMessage),
    /// Deliver this message after a delay
    Delayed(Duration, SimMessage),
    /// Report that nothing was received
    Nothing,
    /// Fail with this error
    Fail(ControlError),
    /// Never complete
    Hang,
}

/// Scripted outcome of one `respond` call.
#[derive(Debug, Clone)]
pub enum RespondScript {
    /// Write the payload to the output channel and succeed
    Ok,
    /// Fail with this error
    Fail(ControlError),
    /// Never complete
    Hang,
}

/// What the server passed to one `receive` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedReceive {
    /// Keyset ids in the supplied crypto context table, sorted
    pub keyset_ids: Vec<String>,
    /// Whether the context requested encryption
    pub encrypted: bool,
    /// Whether the context requested integrity protection
    pub integrity_protected: bool,
    /// Timeout the server passed along
    pub timeout: Duration,
}

/// What the server passed to one `respond` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedResponse {
    /// Remote entity the response targets
    pub recipient: Option<String>,
    /// Whether the context requested encryption
    pub encrypted: bool,
    /// Whether the context requested integrity protection
    pub integrity_protected: bool,
    /// Payload bytes supplied by the context
    pub payload: Vec<u8>,
    /// Sender identity of the request being answered
    pub request_identity: Option<String>,
    /// Timeout the server passed along
    pub timeout: Duration,
}

#[derive(Debug, Default)]
struct Script {
    receive: VecDeque<ReceiveScript>,
    respond: VecDeque<RespondScript>,
    receives: Vec<RecordedReceive>,
    responses: Vec<RecordedResponse>,
}

/// Message control facade driven by a script.
///
/// Clones share the same script and recordings.
#[derive(Debug, Clone, Default)]
pub struct ScriptedControl {
    script: Arc<Mutex<Script>>,
}

impl ScriptedControl {
    /// Facade with empty scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next unscripted `receive` call.
    #[must_use]
    pub fn on_receive(self, outcome: ReceiveScript) -> Self {
        self.lock().receive.push_back(outcome);
        self
    }

    /// Queue the outcome of the next unscripted `respond` call.
    #[must_use]
    pub fn on_respond(self, outcome: RespondScript) -> Self {
        self.lock().respond.push_back(outcome);
        self
    }

    /// Shorthand for queueing delivery of `message`.
    #[must_use]
    pub fn deliver(self, message: SimMessage) -> Self {
        self.on_receive(ReceiveScript::Message(message))
    }

    /// Recorded `receive` calls, oldest first.
    pub fn receives(&self) -> Vec<RecordedReceive> {
        self.lock().receives.clone()
    }

    /// Recorded `respond` calls, oldest first.
    pub fn responses(&self) -> Vec<RecordedResponse> {
        self.lock().responses.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessageControl for ScriptedControl {
    type Message = SimMessage;

    async fn receive<R, W>(
        &self,
        _entity: &EntityContext,
        msg_ctx: &dyn MessageContext,
        _input: &mut R,
        _output: &mut W,
        timeout: Duration,
    ) -> Result<Option<SimMessage>, ControlError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut keyset_ids: Vec<String> = msg_ctx
            .crypto_contexts()
            .map(|table| table.keyset_ids().map(str::to_owned).collect())
            .unwrap_or_default();
        keyset_ids.sort();

        let outcome = {
            let mut script = self.lock();
            script.receives.push(RecordedReceive {
                keyset_ids,
                encrypted: msg_ctx.is_encrypted(),
                integrity_protected: msg_ctx.is_integrity_protected(),
                timeout,
            });
            script.receive.pop_front().unwrap_or(ReceiveScript::Nothing)
        };

        match outcome {
            ReceiveScript::Message(message) => Ok(Some(message)),
            ReceiveScript::Delayed(delay, message) => {
                tokio::time::sleep(delay).await;
                Ok(Some(message))
            },
            ReceiveScript::Nothing => Ok(None),
            ReceiveScript::Fail(error) => Err(error),
            ReceiveScript::Hang => std::future::pending().await,
        }
    }

    async fn respond<R, W>(
        &self,
        _entity: &EntityContext,
        msg_ctx: &dyn MessageContext,
        _input: &mut R,
        output: &mut W,
        request: &SimMessage,
        timeout: Duration,
    ) -> Result<Option<Channel>, ControlError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let recipient = msg_ctx.remote_entity_identity().map(str::to_owned);
        let outcome = {
            let mut script = self.lock();
            script.responses.push(RecordedResponse {
                recipient: recipient.clone(),
                encrypted: msg_ctx.is_encrypted(),
                integrity_protected: msg_ctx.is_integrity_protected(),
                payload: msg_ctx.payload().to_vec(),
                request_identity: request.identity().ok(),
                timeout,
            });
            script.respond.pop_front().unwrap_or(RespondScript::Ok)
        };

        match outcome {
            RespondScript::Ok => {
                output.write_all(msg_ctx.payload()).await?;
                output.flush().await?;
                Ok(recipient.map(|remote_identity| Channel {
                    remote_identity,
                    encrypted: msg_ctx.is_encrypted(),
                }))
            },
            RespondScript::Fail(error) => Err(error),
            RespondScript::Hang => std::future::pending().await,
        }
    }
}

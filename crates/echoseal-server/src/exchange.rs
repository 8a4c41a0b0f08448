//! Exchange orchestrator.
//!
//! Drives one receive-then-respond cycle over a channel pair:
//!
//! ```text
//! in ──> receive (bounded) ──> error header? ──> identity, user, payload
//!                                                        │
//! out <── respond (bounded) <── RespondMessageContext (echo, encrypted)
//! ```
//!
//! # Waits
//!
//! Receive and respond are the only suspension points of a cycle. Reading
//! the already-received payload counts as part of receive and shares its
//! deadline, so the whole receive stage is bounded by one timeout. Each wait
//! races the facade future against the exchange timeout and a cancellation
//! token:
//!
//! - facade result: continue (or fail with the facade's error)
//! - timeout: fail with [`ExchangeFailure::Timeout`]
//! - cancellation: stop and return [`ExchangeOutcome::Cancelled`]
//!
//! # Concurrency
//!
//! `process_request` takes `&self`. The crypto context table and entity
//! context are read-only after construction, so any number of cycles can run
//! at once on independent channel pairs.

use std::{borrow::Cow, future::Future, time::Duration};

use echoseal_core::{
    EntityContext, Environment, InboundMessage, MessageControl, ReceiveMessageContext,
    RespondMessageContext,
};
use echoseal_crypto::CryptoContextTable;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ExchangeConfig, build_crypto_contexts},
    error::{ExchangeFailure, ExchangeStage, ServerError},
};

/// Successful end of an exchange cycle.
///
/// Benign aborts are success-shaped: the caller gets `Ok` and nothing is
/// retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The request was received and its payload echoed back.
    Responded,
    /// The facade produced no message to process.
    NoMessage,
    /// A wait was interrupted before it completed.
    ///
    /// After an interrupted respond the peer is left without an answer and
    /// must retry at a higher layer.
    Cancelled {
        /// Wait that was interrupted
        stage: ExchangeStage,
    },
}

/// Result of one bounded wait.
enum Wait<T> {
    Done(T),
    Cancelled,
}

/// Echo exchange server.
///
/// Owns the message control facade, this server's entity context and the
/// service token crypto context table.
pub struct EchoServer<M, E>
where
    M: MessageControl,
    E: Environment,
{
    control: M,
    entity: EntityContext,
    crypto_contexts: CryptoContextTable,
    timeout: Duration,
    env: E,
    shutdown: CancellationToken,
}

impl<M, E> EchoServer<M, E>
where
    M: MessageControl,
    E: Environment,
{
    /// Create a server, building the crypto context table from `config`.
    ///
    /// # Errors
    ///
    /// - `Configuration` if the service token keys are malformed or the
    ///   timeout is zero
    pub fn new(
        control: M,
        entity: EntityContext,
        env: E,
        config: &ExchangeConfig,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let crypto_contexts = build_crypto_contexts(&entity, &config.service_tokens)?;
        Ok(Self::with_crypto_contexts(control, entity, crypto_contexts, env, config.timeout))
    }

    /// Create a server around an already-built crypto context table.
    pub fn with_crypto_contexts(
        control: M,
        entity: EntityContext,
        crypto_contexts: CryptoContextTable,
        env: E,
        timeout: Duration,
    ) -> Self {
        Self { control, entity, crypto_contexts, timeout, env, shutdown: CancellationToken::new() }
    }

    /// Service token crypto contexts.
    pub fn crypto_contexts(&self) -> &CryptoContextTable {
        &self.crypto_contexts
    }

    /// This server's entity context.
    pub fn entity(&self) -> &EntityContext {
        &self.entity
    }

    /// Bound applied to each receive and respond wait.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The message control facade.
    pub fn control(&self) -> &M {
        &self.control
    }

    /// Token that interrupts every in-flight exchange when cancelled.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Run one exchange cycle on `input`/`output`.
    ///
    /// Interrupted by the server's shutdown token.
    pub async fn process_request<R, W>(
        &self,
        input: &mut R,
        output: &mut W,
    ) -> Result<ExchangeOutcome, ServerError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let cancel = self.shutdown.child_token();
        self.process_request_with_cancel(input, output, &cancel).await
    }

    /// Run one exchange cycle, interruptible through `cancel`.
    ///
    /// # Errors
    ///
    /// - `Protocol` if the inbound message carries an error header
    /// - `IdentityExtraction` if the sender identity cannot be recovered
    /// - `Exchange` if a wait fails or exceeds the timeout
    pub async fn process_request_with_cancel<R, W>(
        &self,
        input: &mut R,
        output: &mut W,
        cancel: &CancellationToken,
    ) -> Result<ExchangeOutcome, ServerError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let receive_ctx = ReceiveMessageContext::new(&self.crypto_contexts);
        let receive_started = self.env.now();

        let received = self.control.receive(
            &self.entity,
            &receive_ctx,
            &mut *input,
            &mut *output,
            self.timeout,
        );
        let waited = self.bounded(ExchangeStage::Receive, received, self.timeout, cancel).await?;
        let mut request = match waited {
            Wait::Done(Some(request)) => request,
            Wait::Done(None) => {
                tracing::warn!("Receive produced no message");
                return Ok(ExchangeOutcome::NoMessage);
            },
            Wait::Cancelled => {
                tracing::info!("Receive interrupted");
                return Ok(ExchangeOutcome::Cancelled { stage: ExchangeStage::Receive });
            },
        };

        if let Some(error) = request.error_header() {
            tracing::error!("Unexpectedly received error message: {}", error);
            return Err(ServerError::Protocol {
                code: error.code,
                internal_code: error.internal_code,
                message: error.message.clone(),
            });
        }

        let sender = request.identity().map_err(ServerError::IdentityExtraction)?;
        let user = request.user().map(|user| user.id.clone());
        tracing::debug!(
            %sender,
            user = user.as_deref().unwrap_or("-"),
            service_tokens = request.service_tokens().len(),
            "Received request"
        );

        let mut payload = Vec::new();
        let remaining = self.timeout.saturating_sub(self.env.now() - receive_started);
        let read = request.read_to_end(&mut payload);
        if let Wait::Cancelled =
            self.bounded(ExchangeStage::Receive, read, remaining, cancel).await?
        {
            tracing::info!(%sender, "Payload read interrupted");
            return Ok(ExchangeOutcome::Cancelled { stage: ExchangeStage::Receive });
        }

        let respond_ctx =
            RespondMessageContext::new(sender.as_str(), true, decode_payload(&payload));

        let responded = self.control.respond(
            &self.entity,
            &respond_ctx,
            &mut *input,
            &mut *output,
            &request,
            self.timeout,
        );
        match self.bounded(ExchangeStage::Respond, responded, self.timeout, cancel).await? {
            Wait::Done(_channel) => {
                tracing::debug!(%sender, bytes = payload.len(), "Echoed request");
                Ok(ExchangeOutcome::Responded)
            },
            Wait::Cancelled => {
                tracing::warn!(%sender, "Respond interrupted, request left unanswered");
                Ok(ExchangeOutcome::Cancelled { stage: ExchangeStage::Respond })
            },
        }
    }

    /// Await `fut` for at most `limit`, or until `cancel` fires.
    ///
    /// Expiry is reported against the configured exchange timeout.
    async fn bounded<T, X, F>(
        &self,
        stage: ExchangeStage,
        fut: F,
        limit: Duration,
        cancel: &CancellationToken,
    ) -> Result<Wait<T>, ServerError>
    where
        F: Future<Output = Result<T, X>> + Send,
        X: Into<ExchangeFailure>,
    {
        tokio::select! {
            biased;

            () = cancel.cancelled() => Ok(Wait::Cancelled),
            result = fut => match result {
                Ok(value) => Ok(Wait::Done(value)),
                Err(err) => {
                    let err = ServerError::exchange(stage, err);
                    tracing::warn!("{}", err);
                    Err(err)
                },
            },
            () = self.env.sleep(limit) => {
                tracing::warn!("{} timed out after {:?}", stage, self.timeout);
                let failure = ExchangeFailure::Timeout { timeout: self.timeout };
                Err(ServerError::exchange(stage, failure))
            },
        }
    }
}

/// Decode payload bytes as [`echoseal_core::DEFAULT_CHARSET`] text.
///
/// Malformed sequences are replaced with U+FFFD rather than rejected.
pub fn decode_payload(payload: &[u8]) -> String {
    match String::from_utf8_lossy(payload) {
        Cow::Borrowed(text) => text.to_string(),
        Cow::Owned(text) => {
            tracing::warn!("Payload is not valid UTF-8, replaced malformed sequences");
            text
        },
    }
}

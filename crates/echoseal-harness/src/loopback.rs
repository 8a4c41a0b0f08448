//! Reference message control facade over the loopback wire format.
//!
//! [`LoopbackControl`] is the server side: it reads a [`RequestEnvelope`],
//! authenticates the sender against the entity's preshared keys and writes a
//! [`ResponseEnvelope`] sealed for the recipient. [`LoopbackClient`] is the
//! matching peer used by tests.

use std::{sync::Arc, time::Duration};

use echoseal_core::{
    Channel, ControlError, EntityContext, Environment, ErrorHeader, MessageContext,
    MessageControl, ServiceToken, User,
};
use echoseal_crypto::{
    CryptoContext, CryptoContextTable, CryptoError, NONCE_SIZE, SymmetricCryptoContext,
};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    message::SimMessage,
    wire::{
        self, RequestEnvelope, ResponseEnvelope, WireErrorHeader, WireServiceToken,
        open_payload, seal_payload,
    },
};

/// Server-side facade speaking the loopback wire format.
///
/// Nonces for encrypted responses are drawn from the environment.
#[derive(Debug, Clone)]
pub struct LoopbackControl<E: Environment> {
    env: E,
}

impl<E: Environment> LoopbackControl<E> {
    /// Facade drawing randomness from `env`.
    pub fn new(env: E) -> Self {
        Self { env }
    }
}

/// Decrypt attached service tokens with the receive context's table.
fn open_service_tokens(
    tokens: &[WireServiceToken],
    table: Option<&CryptoContextTable>,
) -> Result<Vec<ServiceToken>, ControlError> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    let table = table.ok_or_else(|| {
        ControlError::Internal("service tokens attached but no crypto contexts".to_string())
    })?;

    tokens
        .iter()
        .map(|token| -> Result<ServiceToken, ControlError> {
            let context = table
                .resolve(&token.envelope.keyset_id)
                .ok_or_else(|| CryptoError::MissingContext(token.envelope.keyset_id.clone()))?;
            let data = context.decrypt(&token.envelope)?;
            Ok(ServiceToken { name: token.name.clone(), data })
        })
        .collect()
}

/// Turn a decoded request into an inbound message.
///
/// Sender authentication failures do not fail the receive: they surface when
/// the caller asks for the message identity.
fn admit(
    entity: &EntityContext,
    request: RequestEnvelope,
    tokens: Vec<ServiceToken>,
) -> SimMessage {
    let sender = request.sender;

    let message = match request.error {
        Some(header) => SimMessage::error(sender, ErrorHeader::from(header)),
        None => {
            let opened = entity.preshared_keys().require(&sender).and_then(|context| {
                match &request.payload {
                    Some(sealed) => open_payload(&**context, &sender, sealed),
                    None => Ok(Vec::new()),
                }
            });
            match opened {
                Ok(payload) => SimMessage::new(sender, payload),
                Err(error) => {
                    tracing::debug!(%sender, %error, "request failed sender authentication");
                    SimMessage::new(sender, Vec::new()).with_identity_error(error)
                },
            }
        },
    };

    let message = message.with_service_tokens(tokens);
    match request.user {
        Some(user) => message.with_user(User::new(user)),
        None => message,
    }
}

impl<E: Environment> MessageControl for LoopbackControl<E> {
    type Message = SimMessage;

    async fn receive<R, W>(
        &self,
        entity: &EntityContext,
        msg_ctx: &dyn MessageContext,
        input: &mut R,
        _output: &mut W,
        _timeout: Duration,
    ) -> Result<Option<SimMessage>, ControlError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let Some(request) = wire::read_frame::<_, RequestEnvelope>(input).await? else {
            return Ok(None);
        };
        tracing::trace!(?request, "Loopback request frame");

        let tokens = open_service_tokens(&request.service_tokens, msg_ctx.crypto_contexts())?;
        Ok(Some(admit(entity, request, tokens)))
    }

    async fn respond<R, W>(
        &self,
        entity: &EntityContext,
        msg_ctx: &dyn MessageContext,
        _input: &mut R,
        output: &mut W,
        _request: &SimMessage,
        _timeout: Duration,
    ) -> Result<Option<Channel>, ControlError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let recipient = msg_ctx
            .remote_entity_identity()
            .ok_or_else(|| ControlError::Internal("response has no recipient".to_string()))?
            .to_owned();
        let context = entity.preshared_keys().require(&recipient)?;

        let encrypted = msg_ctx.is_encrypted();
        let nonce = encrypted.then(|| self.env.nonce::<NONCE_SIZE>());
        let payload = seal_payload(&**context, entity.identity(), msg_ctx.payload(), nonce)?;

        let response = ResponseEnvelope {
            sender: entity.identity().to_owned(),
            recipient: recipient.clone(),
            payload,
        };
        tracing::trace!(?response, "Loopback response frame");
        wire::write_frame(output, &response).await?;

        Ok(Some(Channel { remote_identity: recipient, encrypted }))
    }
}

/// Client peer for [`LoopbackControl`].
#[derive(Debug, Clone)]
pub struct LoopbackClient<E: Environment> {
    identity: String,
    context: Arc<dyn CryptoContext>,
    env: E,
}

impl<E: Environment> LoopbackClient<E> {
    /// Client holding the same preshared keys the server registered for
    /// `identity`.
    ///
    /// # Errors
    ///
    /// - `CryptoError::InvalidKeyLength` if either key has the wrong length
    pub fn new(
        identity: impl Into<String>,
        encryption_key: &[u8],
        integrity_key: &[u8],
        env: E,
    ) -> Result<Self, CryptoError> {
        let identity = identity.into();
        let context = SymmetricCryptoContext::from_key_bytes(
            &identity,
            &identity,
            encryption_key,
            integrity_key,
        )?;
        Ok(Self { identity, context: Arc::new(context), env })
    }

    /// Client identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Application request carrying `payload`, encrypted when `encrypt`.
    pub fn request(&self, payload: &[u8], encrypt: bool) -> Result<RequestEnvelope, CryptoError> {
        let nonce = encrypt.then(|| self.env.nonce::<NONCE_SIZE>());
        let sealed = seal_payload(&*self.context, &self.identity, payload, nonce)?;
        Ok(RequestEnvelope {
            sender: self.identity.clone(),
            user: None,
            error: None,
            service_tokens: Vec::new(),
            payload: Some(sealed),
        })
    }

    /// Error message carrying `header`.
    pub fn error_request(&self, header: &ErrorHeader) -> RequestEnvelope {
        RequestEnvelope {
            sender: self.identity.clone(),
            user: None,
            error: Some(WireErrorHeader::from(header)),
            service_tokens: Vec::new(),
            payload: None,
        }
    }

    /// Service token encrypted under a service-scoped `context`.
    pub fn service_token(
        &self,
        context: &dyn CryptoContext,
        name: impl Into<String>,
        data: &[u8],
    ) -> Result<WireServiceToken, CryptoError> {
        let envelope = context.encrypt(data, self.env.nonce::<NONCE_SIZE>())?;
        Ok(WireServiceToken { name: name.into(), envelope })
    }

    /// Write `request` as one frame.
    pub async fn send<W>(
        &self,
        output: &mut W,
        request: &RequestEnvelope,
    ) -> Result<(), ControlError>
    where
        W: AsyncWrite + Unpin,
    {
        wire::write_frame(output, request).await
    }

    /// Read and open the server's response.
    ///
    /// Returns `None` when the server closed the channel without responding.
    ///
    /// # Errors
    ///
    /// - `ControlError::EntityAuth` if the response is addressed elsewhere
    /// - `ControlError::Crypto` if the payload fails verification
    pub async fn read_response<R>(&self, input: &mut R) -> Result<Option<Vec<u8>>, ControlError>
    where
        R: AsyncRead + Unpin,
    {
        let Some(response) = wire::read_frame::<_, ResponseEnvelope>(input).await? else {
            return Ok(None);
        };
        if response.recipient != self.identity {
            return Err(ControlError::EntityAuth {
                identity: response.recipient,
                reason: format!("response not addressed to {}", self.identity),
            });
        }

        let payload = open_payload(&*self.context, &response.sender, &response.payload)?;
        Ok(Some(payload))
    }
}

//! Echoseal exchange server.
//!
//! Receives one entity-authenticated message per exchange, checks it carries
//! no error header, resolves the sender (and optional user), and sends back an
//! encrypted response echoing the payload.
//!
//! # Architecture
//!
//! The secure-messaging engine is an external collaborator reached through
//! [`echoseal_core::MessageControl`]. This crate provides:
//!
//! - [`EchoServer`]: the exchange orchestrator. Pure orchestration over any
//!   byte channel pair, generic over the engine and the [`Environment`].
//! - [`Server`]: production runtime that accepts QUIC connections and runs
//!   one exchange cycle per bidirectional stream.
//! - [`SystemEnv`]: production environment (real time, OS RNG).
//!
//! # Error Handling
//!
//! Every failed cycle surfaces as one [`ServerError`] to the caller; nothing
//! is retried inside the orchestrator. A missing inbound message or an
//! interrupted wait is not an error and yields an [`ExchangeOutcome`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod exchange;
mod system_env;
mod transport;

use std::{net::SocketAddr, sync::Arc};

pub use config::{
    DEFAULT_SERVER_IDENTITY, DEFAULT_TIMEOUT, ExchangeConfig, SERVICE_TOKEN_ENCRYPTION_KEY,
    SERVICE_TOKEN_HMAC_KEY, SERVICE_TOKEN_KEYSET_ID, ServerConfig, ServiceTokenKeys, TlsIdentity,
    build_crypto_contexts,
};
use echoseal_core::{EntityContext, Environment, MessageControl};
pub use error::{ExchangeFailure, ExchangeStage, ServerError};
pub use exchange::{EchoServer, ExchangeOutcome, decode_payload};
pub use system_env::SystemEnv;
use tokio_util::sync::CancellationToken;
pub use transport::{ALPN_PROTOCOL, QuinnConnection, QuinnTransport};

/// Production echoseal server.
///
/// Wraps [`EchoServer`] with a QUIC endpoint and the system environment.
pub struct Server<M: MessageControl> {
    exchange: Arc<EchoServer<M, SystemEnv>>,
    transport: QuinnTransport,
}

impl<M: MessageControl> Server<M> {
    /// Build the orchestrator and bind the endpoint.
    ///
    /// # Errors
    ///
    /// - `Configuration` for malformed keys, a zero timeout or unusable TLS
    ///   material
    /// - `Transport` if the endpoint cannot be bound
    pub fn bind(
        config: &ServerConfig,
        control: M,
        entity: EntityContext,
    ) -> Result<Self, ServerError> {
        let exchange = EchoServer::new(control, entity, SystemEnv::new(), &config.exchange)?;
        let transport = QuinnTransport::bind(config.bind_address, &config.tls)?;

        Ok(Self { exchange: Arc::new(exchange), transport })
    }

    /// The exchange orchestrator shared by all connections.
    pub fn exchange(&self) -> &Arc<EchoServer<M, SystemEnv>> {
        &self.exchange
    }

    /// Token that stops the accept loop and interrupts in-flight exchanges.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.exchange.shutdown_token().clone()
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Accept connections until the shutdown token is cancelled.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(address = %self.transport.local_addr()?, "Server starting");

        let shutdown = self.shutdown_token();
        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.transport.accept() => accepted,
            };

            match accepted {
                Some(Ok(conn)) => {
                    let exchange = Arc::clone(&self.exchange);
                    tokio::spawn(serve_connection(conn, exchange));
                },
                Some(Err(e)) => tracing::warn!("{}", e),
                None => break,
            }
        }

        tracing::info!("Server shutting down");
        self.transport.close(b"shutdown");
        Ok(())
    }
}

/// Run exchanges for every stream the client opens on `conn`.
async fn serve_connection<M: MessageControl>(
    conn: QuinnConnection,
    exchange: Arc<EchoServer<M, SystemEnv>>,
) {
    let connection = conn.id();
    tracing::debug!(connection, remote = %conn.remote_addr(), "Connection established");

    while let Some(next) = conn.next_exchange().await {
        match next {
            Ok((send, recv)) => {
                let exchange = Arc::clone(&exchange);
                tokio::spawn(async move { serve_stream(connection, send, recv, &exchange).await });
            },
            Err(e) => {
                tracing::debug!(connection, "{}", e);
                return;
            },
        }
    }
    tracing::debug!(connection, "Connection closed by client");
}

/// Run one exchange cycle on a bidirectional stream, then close it.
///
/// The stream is finished after a completed cycle and reset after a failed
/// one, so the client never waits on a response that will not come.
async fn serve_stream<M: MessageControl, E: Environment>(
    connection: usize,
    mut send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    exchange: &EchoServer<M, E>,
) {
    match exchange.process_request(&mut recv, &mut send).await {
        Ok(outcome) => {
            tracing::debug!(connection, ?outcome, "Exchange ended");
            if let Err(e) = send.finish() {
                tracing::debug!(connection, "Finish failed: {}", e);
            }
        },
        Err(e) => {
            tracing::warn!(connection, "Exchange failed: {}", e);
            if let Err(e) = send.reset(0u32.into()) {
                tracing::debug!(connection, "Reset failed: {}", e);
            }
        },
    }
}

//! Simulation server wrapper for testing with turmoil.
//!
//! `SimEchoServer` runs the exchange orchestrator over turmoil's
//! deterministic TCP: each accepted connection carries exactly one exchange
//! cycle, its read half as the input channel and its write half as the
//! output channel.
//!
//! Tests drive the server explicitly, one accepted connection at a time.

use std::io;

use echoseal_core::MessageControl;
use echoseal_server::{EchoServer, ExchangeOutcome, ServerError};
use tokio::io::AsyncWriteExt;
use turmoil::net::TcpListener;

use crate::SimEnv;

/// Echo server bound to a turmoil listener.
pub struct SimEchoServer<M: MessageControl> {
    exchange: EchoServer<M, SimEnv>,
    listener: TcpListener,
}

impl<M: MessageControl> SimEchoServer<M> {
    /// Bind `exchange` to a simulated address such as `0.0.0.0:443`.
    pub async fn bind(address: &str, exchange: EchoServer<M, SimEnv>) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { exchange, listener })
    }

    /// The wrapped orchestrator.
    pub fn exchange(&self) -> &EchoServer<M, SimEnv> {
        &self.exchange
    }

    /// Accept one connection and run one exchange cycle over it.
    ///
    /// The write half is shut down afterwards so the client sees EOF.
    pub async fn serve_one(&self) -> Result<ExchangeOutcome, ServerError> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::debug!(%peer, "simulated connection accepted");

        let (mut reader, mut writer) = tokio::io::split(stream);
        let outcome = self.exchange.process_request(&mut reader, &mut writer).await;

        if let Err(e) = writer.shutdown().await {
            tracing::debug!(%peer, error = %e, "shutdown after exchange failed");
        }
        outcome
    }
}

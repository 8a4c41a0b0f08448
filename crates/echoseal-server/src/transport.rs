//! QUIC transport.
//!
//! The endpoint speaks ALPN "echoseal" over TLS 1.3 (rustls). A client opens
//! one bidirectional stream per exchange: the stream's receive half is the
//! inbound byte channel and its send half the outbound one.

use std::{net::SocketAddr, path::Path, sync::Arc};

use quinn::{
    ConnectionError, Endpoint, RecvStream, SendStream, crypto::rustls::QuicServerConfig,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::{config::TlsIdentity, error::ServerError};

/// ALPN protocol identifier.
pub const ALPN_PROTOCOL: &[u8] = b"echoseal";

type CertifiedChain = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

/// QUIC endpoint accepting exchange connections.
pub struct QuinnTransport {
    endpoint: Endpoint,
}

impl QuinnTransport {
    /// Bind an endpoint at `address` presenting `tls`.
    ///
    /// # Errors
    ///
    /// - `Configuration` if the certificate or key cannot be loaded
    /// - `Transport` if the UDP socket cannot be bound
    pub fn bind(address: SocketAddr, tls: &TlsIdentity) -> Result<Self, ServerError> {
        let crypto = server_crypto(tls)?;
        let config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
        let endpoint = Endpoint::server(config, address)?;

        tracing::info!(%address, "QUIC endpoint bound");
        Ok(Self { endpoint })
    }

    /// Wait for the next connection to complete its handshake.
    ///
    /// Returns `None` once the endpoint is closed.
    pub async fn accept(&self) -> Option<Result<QuinnConnection, ServerError>> {
        let incoming = self.endpoint.accept().await?;
        let remote = incoming.remote_address();

        Some(incoming.await.map(|inner| QuinnConnection { inner }).map_err(|e| {
            ServerError::Transport(format!("handshake with {remote} failed: {e}"))
        }))
    }

    /// Local address the endpoint is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Close every connection and stop accepting new ones.
    pub fn close(&self, reason: &[u8]) {
        self.endpoint.close(0u32.into(), reason);
    }
}

/// An established client connection.
#[derive(Clone)]
pub struct QuinnConnection {
    inner: quinn::Connection,
}

impl QuinnConnection {
    /// Wait for the client to open the stream of its next exchange.
    ///
    /// Returns `None` when the client closed the connection cleanly.
    pub async fn next_exchange(&self) -> Option<Result<(SendStream, RecvStream), ServerError>> {
        match self.inner.accept_bi().await {
            Ok(streams) => Some(Ok(streams)),
            Err(ConnectionError::ApplicationClosed(_) | ConnectionError::LocallyClosed) => None,
            Err(e) => Some(Err(ServerError::Transport(format!("stream accept failed: {e}")))),
        }
    }

    /// Identifier that is unique among this endpoint's live connections.
    pub fn id(&self) -> usize {
        self.inner.stable_id()
    }

    /// Remote peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_address()
    }
}

fn server_crypto(tls: &TlsIdentity) -> Result<QuicServerConfig, ServerError> {
    let (chain, key) = match tls {
        TlsIdentity::Pem { cert_path, key_path } => read_pem(cert_path, key_path)?,
        TlsIdentity::SelfSigned { subject_alt_names } => self_signed(subject_alt_names)?,
    };

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| ServerError::Configuration(format!("certificate rejected: {e}")))?;
    config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    QuicServerConfig::try_from(config)
        .map_err(|e| ServerError::Configuration(format!("TLS config unusable for QUIC: {e}")))
}

fn read_pem(cert_path: &Path, key_path: &Path) -> Result<CertifiedChain, ServerError> {
    let unreadable = |path: &Path, e: std::io::Error| {
        ServerError::Configuration(format!("cannot read {}: {e}", path.display()))
    };

    let cert_pem = std::fs::read(cert_path).map_err(|e| unreadable(cert_path, e))?;
    let chain = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| unreadable(cert_path, e))?;
    if chain.is_empty() {
        return Err(ServerError::Configuration(format!(
            "no certificate in {}",
            cert_path.display()
        )));
    }

    let key_pem = std::fs::read(key_path).map_err(|e| unreadable(key_path, e))?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| unreadable(key_path, e))?
        .ok_or_else(|| {
            ServerError::Configuration(format!("no private key in {}", key_path.display()))
        })?;

    Ok((chain, key))
}

fn self_signed(subject_alt_names: &[String]) -> Result<CertifiedChain, ServerError> {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(subject_alt_names.to_vec()).map_err(|e| {
            ServerError::Configuration(format!("self-signed certificate generation failed: {e}"))
        })?;

    tracing::warn!(?subject_alt_names, "Serving a self-signed certificate");

    let key = PrivatePkcs8KeyDer::from(key_pair.serialize_der());
    Ok((vec![cert.der().clone()], key.into()))
}

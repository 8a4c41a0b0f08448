//! End-to-end exchange cycles over in-memory duplex channels.
//!
//! The server side runs the real orchestrator with [`LoopbackControl`]; the
//! client side encodes requests and opens responses with [`LoopbackClient`].

use std::sync::Arc;

use echoseal_core::{ControlError, EntityContext, ErrorHeader, PresharedKeyStore};
use echoseal_crypto::CryptoError;
use echoseal_harness::{
    LoopbackClient, LoopbackControl, SimEnv,
    wire::{self, PayloadBody, ResponseEnvelope},
};
use echoseal_server::{
    EchoServer, ExchangeConfig, ExchangeFailure, ExchangeOutcome, ExchangeStage,
    SERVICE_TOKEN_KEYSET_ID, ServerError,
};
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

type LoopbackServer = EchoServer<LoopbackControl<SimEnv>, SimEnv>;

const ENCRYPTION_KEY: [u8; 16] = [0x11; 16];
const INTEGRITY_KEY: [u8; 32] = [0x22; 32];

fn server_for(identities: &[String]) -> LoopbackServer {
    let mut keys = PresharedKeyStore::new();
    for identity in identities {
        keys = keys.with_entity(identity, &ENCRYPTION_KEY, &INTEGRITY_KEY).unwrap();
    }
    let entity = EntityContext::new("echoseal-server").with_preshared_keys(keys);
    let control = LoopbackControl::new(SimEnv::with_seed(1));

    EchoServer::new(control, entity, SimEnv::new(), &ExchangeConfig::default()).unwrap()
}

fn server() -> LoopbackServer {
    server_for(&["client-1".to_string()])
}

fn client(identity: &str) -> LoopbackClient<SimEnv> {
    LoopbackClient::new(identity, &ENCRYPTION_KEY, &INTEGRITY_KEY, SimEnv::with_seed(2)).unwrap()
}

struct Channels {
    client_read: ReadHalf<DuplexStream>,
    client_write: WriteHalf<DuplexStream>,
    server_read: ReadHalf<DuplexStream>,
    server_write: WriteHalf<DuplexStream>,
}

fn channels() -> Channels {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_io);
    let (server_read, server_write) = tokio::io::split(server_io);
    Channels { client_read, client_write, server_read, server_write }
}

#[tokio::test]
async fn encrypted_request_is_echoed() {
    let server = server();
    let client = client("client-1");
    let mut io = channels();

    client.send(&mut io.client_write, &client.request(b"hello", true).unwrap()).await.unwrap();
    let outcome = server.process_request(&mut io.server_read, &mut io.server_write).await;

    assert_eq!(outcome.unwrap(), ExchangeOutcome::Responded);
    let response = client.read_response(&mut io.client_read).await.unwrap();
    assert_eq!(response.as_deref(), Some(&b"hello"[..]));
}

#[tokio::test]
async fn plaintext_request_gets_encrypted_response() {
    let server = server();
    let client = client("client-1");
    let mut io = channels();

    client.send(&mut io.client_write, &client.request(b"hello", false).unwrap()).await.unwrap();
    server.process_request(&mut io.server_read, &mut io.server_write).await.unwrap();

    let response: ResponseEnvelope =
        wire::read_frame(&mut io.client_read).await.unwrap().unwrap();
    assert_eq!(response.sender, "echoseal-server");
    assert_eq!(response.recipient, "client-1");
    assert!(matches!(response.payload.body, PayloadBody::Encrypted(_)));
}

#[tokio::test]
async fn unknown_sender_gets_no_response() {
    let server = server();
    let stranger = client("client-9");
    let mut io = channels();

    stranger.send(&mut io.client_write, &stranger.request(b"hi", true).unwrap()).await.unwrap();
    let err = server.process_request(&mut io.server_read, &mut io.server_write).await.unwrap_err();

    assert!(matches!(
        err,
        ServerError::IdentityExtraction(CryptoError::UnknownEntity(ref id)) if id == "client-9"
    ));
    io.server_write.shutdown().await.unwrap();
    assert_eq!(stranger.read_response(&mut io.client_read).await.unwrap(), None);
}

#[tokio::test]
async fn forged_signature_fails_identity() {
    let server = server();
    let client = client("client-1");
    let mut io = channels();

    let mut request = client.request(b"hi", false).unwrap();
    if let Some(sealed) = request.payload.as_mut() {
        sealed.signature[0] ^= 0x01;
    }
    client.send(&mut io.client_write, &request).await.unwrap();
    let err = server.process_request(&mut io.server_read, &mut io.server_write).await.unwrap_err();

    assert!(matches!(err, ServerError::IdentityExtraction(CryptoError::SignatureMismatch)));
}

#[tokio::test]
async fn error_message_aborts_cycle() {
    let server = server();
    let client = client("client-1");
    let mut io = channels();

    let request = client.error_request(&ErrorHeader::new(5, -2, "keyx required"));
    client.send(&mut io.client_write, &request).await.unwrap();
    let err = server.process_request(&mut io.server_read, &mut io.server_write).await.unwrap_err();

    assert!(matches!(err, ServerError::Protocol { code: 5, internal_code: -2, .. }));
    assert!(err.to_string().contains("keyx required"));
}

#[tokio::test]
async fn closed_channel_yields_no_message() {
    let server = server();
    let mut io = channels();

    io.client_write.shutdown().await.unwrap();
    let outcome = server.process_request(&mut io.server_read, &mut io.server_write).await;

    assert_eq!(outcome.unwrap(), ExchangeOutcome::NoMessage);
}

#[tokio::test]
async fn truncated_frame_fails_receive() {
    let server = server();
    let mut io = channels();

    io.client_write.write_all(&[0, 0, 0, 64, 0xa0]).await.unwrap();
    io.client_write.shutdown().await.unwrap();
    let err = server.process_request(&mut io.server_read, &mut io.server_write).await.unwrap_err();

    assert!(matches!(
        err,
        ServerError::Exchange {
            stage: ExchangeStage::Receive,
            source: ExchangeFailure::Control(ControlError::Io(_)),
        }
    ));
}

#[tokio::test]
async fn service_tokens_open_with_server_contexts() {
    let server = server();
    let client = client("client-1");
    let mut io = channels();

    let service = server.crypto_contexts().require(SERVICE_TOKEN_KEYSET_ID).unwrap();
    let mut request = client.request(b"with token", true).unwrap();
    request.user = Some("alice".to_string());
    request.service_tokens.push(client.service_token(&**service, "session", b"42").unwrap());
    client.send(&mut io.client_write, &request).await.unwrap();

    let outcome = server.process_request(&mut io.server_read, &mut io.server_write).await;

    assert_eq!(outcome.unwrap(), ExchangeOutcome::Responded);
    let response = client.read_response(&mut io.client_read).await.unwrap();
    assert_eq!(response.as_deref(), Some(&b"with token"[..]));
}

#[tokio::test]
async fn unknown_token_keyset_falls_back_to_default_and_fails() {
    let server = server();
    let client = client("client-1");
    let mut io = channels();

    let foreign = echoseal_crypto::SymmetricCryptoContext::from_key_bytes(
        "elsewhere",
        "otherKeySetId",
        &[0x33; 16],
        &[0x44; 32],
    )
    .unwrap();
    let mut request = client.request(b"hi", true).unwrap();
    request.service_tokens.push(client.service_token(&foreign, "session", b"42").unwrap());
    client.send(&mut io.client_write, &request).await.unwrap();

    let err = server.process_request(&mut io.server_read, &mut io.server_write).await.unwrap_err();

    assert!(matches!(
        err,
        ServerError::Exchange {
            stage: ExchangeStage::Receive,
            source: ExchangeFailure::Control(ControlError::Crypto(
                CryptoError::KeysetMismatch { .. }
            )),
        }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_channels_are_independent() {
    let identities: Vec<String> = (0..16).map(|i| format!("client-{i}")).collect();
    let server = Arc::new(server_for(&identities));

    let mut tasks = tokio::task::JoinSet::new();
    for identity in identities {
        let server = Arc::clone(&server);
        tasks.spawn(async move {
            let client = client(&identity);
            let mut io = channels();
            let payload = format!("payload from {identity}");

            client
                .send(&mut io.client_write, &client.request(payload.as_bytes(), true).unwrap())
                .await
                .unwrap();
            let outcome =
                server.process_request(&mut io.server_read, &mut io.server_write).await.unwrap();
            let response = client.read_response(&mut io.client_read).await.unwrap();

            (outcome, payload.into_bytes(), response)
        });
    }

    while let Some(result) = tasks.join_next().await {
        let (outcome, sent, received) = result.unwrap();
        assert_eq!(outcome, ExchangeOutcome::Responded);
        assert_eq!(received, Some(sent));
    }
}

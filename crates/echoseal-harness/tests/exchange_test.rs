//! Exchange cycle tests against the scripted facade.
//!
//! Time-dependent tests run on a paused runtime, so the 120 second default
//! timeout elapses instantly.

use std::{sync::Arc, time::Duration};

use echoseal_core::{ControlError, EntityContext, ErrorHeader, ServiceToken, User};
use echoseal_crypto::CryptoError;
use echoseal_harness::{ReceiveScript, RespondScript, ScriptedControl, SimEnv, SimMessage};
use echoseal_server::{
    DEFAULT_TIMEOUT, EchoServer, ExchangeConfig, ExchangeFailure, ExchangeOutcome, ExchangeStage,
    SERVICE_TOKEN_KEYSET_ID, ServerError,
};
use tokio_util::sync::CancellationToken;

fn server(control: ScriptedControl) -> EchoServer<ScriptedControl, SimEnv> {
    server_with(control, &ExchangeConfig::default())
}

fn server_with(
    control: ScriptedControl,
    config: &ExchangeConfig,
) -> EchoServer<ScriptedControl, SimEnv> {
    EchoServer::new(control, EntityContext::new("echoseal-server"), SimEnv::new(), config)
        .unwrap()
}

async fn run(
    server: &EchoServer<ScriptedControl, SimEnv>,
) -> Result<ExchangeOutcome, ServerError> {
    let mut input: &[u8] = &[];
    let mut output = Vec::new();
    server.process_request(&mut input, &mut output).await
}

#[tokio::test]
async fn echoes_payload_to_sender() {
    let server = server(ScriptedControl::new().deliver(SimMessage::new("client-42", "hello")));

    let mut input: &[u8] = &[];
    let mut output = Vec::new();
    let outcome = server.process_request(&mut input, &mut output).await.unwrap();

    assert_eq!(outcome, ExchangeOutcome::Responded);
    assert_eq!(output, b"hello");

    let responses = server.control().responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].recipient.as_deref(), Some("client-42"));
    assert_eq!(responses[0].request_identity.as_deref(), Some("client-42"));
    assert_eq!(responses[0].payload, b"hello");
    assert!(responses[0].encrypted);
    assert!(responses[0].integrity_protected);
    assert_eq!(responses[0].timeout, DEFAULT_TIMEOUT);
}

#[tokio::test]
async fn receive_context_carries_service_token_contexts() {
    let server = server(ScriptedControl::new());

    run(&server).await.unwrap();

    let receives = server.control().receives();
    assert_eq!(receives.len(), 1);
    assert_eq!(receives[0].keyset_ids, vec!["".to_string(), SERVICE_TOKEN_KEYSET_ID.to_string()]);
    assert!(!receives[0].encrypted);
    assert!(!receives[0].integrity_protected);
    assert_eq!(receives[0].timeout, DEFAULT_TIMEOUT);
}

#[tokio::test]
async fn no_message_ends_cycle_without_response() {
    let server = server(ScriptedControl::new().on_receive(ReceiveScript::Nothing));

    let outcome = run(&server).await.unwrap();

    assert_eq!(outcome, ExchangeOutcome::NoMessage);
    assert!(server.control().responses().is_empty());
}

#[tokio::test]
async fn error_message_is_protocol_error() {
    let message = SimMessage::error("client-42", ErrorHeader::new(7, 3, "bad"));
    let server = server(ScriptedControl::new().deliver(message));

    let err = run(&server).await.unwrap_err();

    assert!(matches!(
        &err,
        ServerError::Protocol { code: 7, internal_code: 3, message } if message == "bad"
    ));
    let text = err.to_string();
    assert!(text.contains("[7][3][bad]"), "{text}");
    assert!(!err.is_transient());
    assert!(server.control().responses().is_empty());
}

#[tokio::test]
async fn identity_failure_aborts_cycle() {
    let message = SimMessage::new("client-42", "hello")
        .with_identity_error(CryptoError::UnknownEntity("client-42".to_string()));
    let server = server(ScriptedControl::new().deliver(message));

    let err = run(&server).await.unwrap_err();

    assert!(matches!(
        err,
        ServerError::IdentityExtraction(CryptoError::UnknownEntity(ref id)) if id == "client-42"
    ));
    assert!(server.control().responses().is_empty());
}

#[tokio::test]
async fn receive_failure_is_wrapped() {
    let failure = ControlError::Io("connection reset".to_string());
    let server = server(ScriptedControl::new().on_receive(ReceiveScript::Fail(failure.clone())));

    let err = run(&server).await.unwrap_err();

    assert!(err.is_transient());
    assert!(matches!(
        err,
        ServerError::Exchange {
            stage: ExchangeStage::Receive,
            source: ExchangeFailure::Control(ref source),
        } if *source == failure
    ));
}

#[tokio::test]
async fn respond_failure_is_wrapped() {
    let failure = ControlError::EntityAuth {
        identity: "client-42".to_string(),
        reason: "no preshared keys".to_string(),
    };
    let control = ScriptedControl::new()
        .deliver(SimMessage::new("client-42", "hello"))
        .on_respond(RespondScript::Fail(failure.clone()));
    let server = server(control);

    let err = run(&server).await.unwrap_err();

    assert!(!err.is_transient());
    assert!(matches!(
        err,
        ServerError::Exchange {
            stage: ExchangeStage::Respond,
            source: ExchangeFailure::Control(ref source),
        } if *source == failure
    ));
    assert_eq!(server.control().responses().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_receive_times_out() {
    let server = server(ScriptedControl::new().on_receive(ReceiveScript::Hang));
    let start = tokio::time::Instant::now();

    let err = run(&server).await.unwrap_err();

    assert!(err.is_timeout());
    assert!(matches!(
        err,
        ServerError::Exchange {
            stage: ExchangeStage::Receive,
            source: ExchangeFailure::Timeout { timeout: DEFAULT_TIMEOUT },
        }
    ));
    assert!(start.elapsed() >= DEFAULT_TIMEOUT);
    assert!(server.control().responses().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hung_respond_times_out() {
    let control = ScriptedControl::new()
        .deliver(SimMessage::new("client-42", "hello"))
        .on_respond(RespondScript::Hang);
    let server = server(control);

    let err = run(&server).await.unwrap_err();

    assert!(err.is_timeout());
    assert!(matches!(
        err,
        ServerError::Exchange {
            stage: ExchangeStage::Respond,
            source: ExchangeFailure::Timeout { .. },
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn configured_timeout_bounds_each_wait() {
    let config = ExchangeConfig { timeout: Duration::from_secs(5), ..ExchangeConfig::default() };
    let server = server_with(ScriptedControl::new().on_receive(ReceiveScript::Hang), &config);
    let start = tokio::time::Instant::now();

    let err = run(&server).await.unwrap_err();

    assert!(err.is_timeout());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < DEFAULT_TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn payload_read_shares_receive_deadline() {
    let config = ExchangeConfig { timeout: Duration::from_secs(5), ..ExchangeConfig::default() };
    let message = SimMessage::new("client-42", "hello").with_stalled_payload();
    let control =
        ScriptedControl::new().on_receive(ReceiveScript::Delayed(Duration::from_secs(3), message));
    let server = server_with(control, &config);
    let start = tokio::time::Instant::now();

    let err = run(&server).await.unwrap_err();

    assert!(matches!(
        err,
        ServerError::Exchange {
            stage: ExchangeStage::Receive,
            source: ExchangeFailure::Timeout { .. },
        }
    ));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(6));
    assert!(server.control().responses().is_empty());
}

#[test]
fn zero_timeout_rejected_at_construction() {
    let config = ExchangeConfig { timeout: Duration::ZERO, ..ExchangeConfig::default() };

    let result =
        EchoServer::new(ScriptedControl::new(), EntityContext::new("s"), SimEnv::new(), &config);

    assert!(matches!(result, Err(ServerError::Configuration(_))));
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_receive() {
    let server = server(ScriptedControl::new().on_receive(ReceiveScript::Hang));
    let cancel = CancellationToken::new();
    let mut input: &[u8] = &[];
    let mut output = Vec::new();

    let (outcome, ()) = tokio::join!(
        server.process_request_with_cancel(&mut input, &mut output, &cancel),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    );

    assert_eq!(outcome.unwrap(), ExchangeOutcome::Cancelled { stage: ExchangeStage::Receive });
    assert!(server.control().responses().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_respond() {
    let control = ScriptedControl::new()
        .deliver(SimMessage::new("client-42", "hello"))
        .on_respond(RespondScript::Hang);
    let server = server(control);
    let cancel = CancellationToken::new();
    let mut input: &[u8] = &[];
    let mut output = Vec::new();

    let (outcome, ()) = tokio::join!(
        server.process_request_with_cancel(&mut input, &mut output, &cancel),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    );

    assert_eq!(outcome.unwrap(), ExchangeOutcome::Cancelled { stage: ExchangeStage::Respond });
    assert_eq!(server.control().responses().len(), 1);
    assert!(output.is_empty());
}

#[tokio::test]
async fn shutdown_interrupts_new_cycles() {
    let server = server(ScriptedControl::new().deliver(SimMessage::new("client-42", "hello")));
    server.shutdown_token().cancel();

    let outcome = run(&server).await.unwrap();

    assert_eq!(outcome, ExchangeOutcome::Cancelled { stage: ExchangeStage::Receive });
    assert!(server.control().responses().is_empty());
}

#[tokio::test]
async fn malformed_utf8_is_replaced() {
    let message = SimMessage::new("client-42", vec![b'h', 0xff, b'i']);
    let server = server(ScriptedControl::new().deliver(message));

    run(&server).await.unwrap();

    assert_eq!(server.control().responses()[0].payload, "h\u{FFFD}i".as_bytes());
}

#[tokio::test]
async fn empty_payload_is_echoed() {
    let server = server(ScriptedControl::new().deliver(SimMessage::new("client-42", Vec::new())));

    let outcome = run(&server).await.unwrap();

    assert_eq!(outcome, ExchangeOutcome::Responded);
    assert!(server.control().responses()[0].payload.is_empty());
}

#[tokio::test]
async fn user_and_service_tokens_do_not_change_echo() {
    let message = SimMessage::new("client-42", "hello")
        .with_user(User::new("alice"))
        .with_service_tokens(vec![ServiceToken { name: "session".to_string(), data: vec![1, 2] }]);
    let server = server(ScriptedControl::new().deliver(message));

    run(&server).await.unwrap();

    let responses = server.control().responses();
    assert_eq!(responses[0].recipient.as_deref(), Some("client-42"));
    assert_eq!(responses[0].payload, b"hello");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cycles_answer_their_own_sender() {
    let mut control = ScriptedControl::new();
    for i in 0..16 {
        control = control.deliver(SimMessage::new(format!("client-{i}"), format!("payload-{i}")));
    }
    let server = Arc::new(server(control));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let server = Arc::clone(&server);
        tasks.spawn(async move { run(&server).await });
    }
    while let Some(result) = tasks.join_next().await {
        assert_eq!(result.unwrap().unwrap(), ExchangeOutcome::Responded);
    }

    let responses = server.control().responses();
    assert_eq!(responses.len(), 16);
    for response in responses {
        let recipient = response.recipient.unwrap();
        assert_eq!(response.request_identity.as_deref(), Some(recipient.as_str()));
        let suffix = recipient.trim_start_matches("client-");
        assert_eq!(response.payload, format!("payload-{suffix}").into_bytes());
    }
}

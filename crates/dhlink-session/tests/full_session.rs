#![allow(clippy::unwrap_used, clippy::panic)] // Integration tests use unwrap for brevity

//! End-to-end sessions between a real responder and a real initiator over an
//! in-memory duplex stream.

use dhlink_crypto::{CipherSuite, DhGroup};
use dhlink_session::wire::{ACK_VERIFIED, CONFIG_LINE_PREFIX, ENTRY_PORT_PROMPT};
use dhlink_session::{
    AckStatus, InitiatorRequest, ProtocolOptions, SessionError, SessionOutcome, StreamTransport,
    run_initiator_session, run_responder_session,
};

type Duplex = StreamTransport<tokio::io::DuplexStream>;

fn duplex_pair(responder_max: usize) -> (Duplex, Duplex) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (
        StreamTransport::from_stream(a, responder_max),
        StreamTransport::from_stream(b, 64 * 1024),
    )
}

fn request(message: &str) -> InitiatorRequest {
    InitiatorRequest {
        entry_port: 7070,
        message: message.to_string(),
    }
}

#[tokio::test]
async fn hello_session_is_verified() {
    let options = ProtocolOptions::default();
    let (mut responder_io, mut initiator_io) = duplex_pair(64 * 1024);
    let req = request("hello");

    let (responder, initiator) = tokio::join!(
        run_responder_session(&mut responder_io, &options),
        run_initiator_session(&mut initiator_io, &options, &req),
    );
    let responder = responder.unwrap();
    let initiator = initiator.unwrap();

    assert_eq!(responder.outcome, SessionOutcome::Verified);
    assert_eq!(responder.message, b"hello");
    assert_eq!(responder.entry_port, 7070);

    assert_eq!(initiator.prompt, ENTRY_PORT_PROMPT);
    assert_eq!(initiator.config_line, format!("{CONFIG_LINE_PREFIX}7070"));
    assert_eq!(initiator.ack, ACK_VERIFIED);
    assert_eq!(initiator.ack_status, AckStatus::Verified);
}

#[tokio::test]
async fn aead_suite_carries_unicode_payload() {
    let options = ProtocolOptions::new(DhGroup::Modp1024, CipherSuite::ChaCha20Poly1305);
    let (mut responder_io, mut initiator_io) = duplex_pair(64 * 1024);
    let req = request("grüße, 世界");

    let (responder, initiator) = tokio::join!(
        run_responder_session(&mut responder_io, &options),
        run_initiator_session(&mut initiator_io, &options, &req),
    );
    let responder = responder.unwrap();
    assert_eq!(responder.outcome, SessionOutcome::Verified);
    assert_eq!(responder.message_lossy(), "grüße, 世界");
    assert_eq!(initiator.unwrap().ack_status, AckStatus::Verified);
}

#[tokio::test]
async fn larger_group_session_is_verified() {
    let options = ProtocolOptions::new(DhGroup::Modp2048, CipherSuite::DesEcb);
    let (mut responder_io, mut initiator_io) = duplex_pair(64 * 1024);
    let req = request("");

    let (responder, initiator) = tokio::join!(
        run_responder_session(&mut responder_io, &options),
        run_initiator_session(&mut initiator_io, &options, &req),
    );
    let responder = responder.unwrap();
    assert_eq!(responder.outcome, SessionOutcome::Verified);
    assert!(responder.message.is_empty());
    assert_eq!(initiator.unwrap().ack_status, AckStatus::Verified);
}

#[tokio::test]
async fn cipher_disagreement_fails_decryption_without_ack() {
    let responder_options = ProtocolOptions::new(DhGroup::Modp1024, CipherSuite::ChaCha20Poly1305);
    let initiator_options = ProtocolOptions::new(DhGroup::Modp1024, CipherSuite::DesEcb);
    let (responder_io, mut initiator_io) = duplex_pair(64 * 1024);
    let req = request("hello");

    let responder = async move {
        let mut io = responder_io;
        // Dropping the transport lets the initiator observe EOF.
        run_responder_session(&mut io, &responder_options).await
    };
    let (responder, initiator) = tokio::join!(
        responder,
        run_initiator_session(&mut initiator_io, &initiator_options, &req),
    );

    let err = responder.unwrap_err();
    assert!(err.is_decryption_failure(), "{err}");
    assert!(matches!(initiator, Err(SessionError::Protocol(_))));
}

#[tokio::test]
async fn group_disagreement_fails_agreement() {
    let responder_options = ProtocolOptions::new(DhGroup::Modp2048, CipherSuite::DesEcb);
    let initiator_options = ProtocolOptions::new(DhGroup::Modp1024, CipherSuite::DesEcb);
    let (responder_io, mut initiator_io) = duplex_pair(64 * 1024);
    let req = request("hello");

    let responder = async move {
        let mut io = responder_io;
        run_responder_session(&mut io, &responder_options).await
    };
    let (responder, initiator) = tokio::join!(
        responder,
        run_initiator_session(&mut initiator_io, &initiator_options, &req),
    );

    // Both sides exchange keys, then refuse to combine foreign parameters.
    assert!(matches!(initiator, Err(SessionError::Crypto(_))));
    assert!(responder.is_err());
}

#[tokio::test]
async fn oversize_public_key_frame_is_rejected() {
    let options = ProtocolOptions::default();
    let (responder_io, mut initiator_io) = duplex_pair(32);
    let req = request("hello");

    let responder = async move {
        let mut io = responder_io;
        run_responder_session(&mut io, &options).await
    };
    let (responder, initiator) = tokio::join!(
        responder,
        run_initiator_session(&mut initiator_io, &options, &req),
    );

    match responder {
        Err(SessionError::Protocol(msg)) => assert!(msg.contains("exceeds"), "{msg}"),
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert!(initiator.is_err());
}

//! Responder (listener) side of a session.
//!
//! ```text
//! AwaitPeerHello [-> PreambleDone] -> KeySent -> PeerKeyReceived
//!     -> SecretDerived -> MessageReceived -> Verified | Mismatch -> Closed
//! ```
//!
//! The entry-port preamble is optional and runs at most once. Each step
//! checks the current state, so the public keys are always fully exchanged
//! before derivation and the message is always decrypted before the
//! verification re-derivation.

use std::borrow::Cow;

use dhlink_crypto::{
    Ciphertext, CryptoError, EphemeralKeyPair, PeerPublicKey, SharedSecret, SymmetricKey,
};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::options::ProtocolOptions;
use crate::transport::FrameTransport;
use crate::wire;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    AwaitPeerHello,
    PreambleDone,
    KeySent,
    PeerKeyReceived,
    SecretDerived,
    MessageReceived,
    Verified,
    Mismatch,
    Closed,
}

/// Result of the verification re-derivation. Informational, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Verified,
    Mismatch,
}

impl SessionOutcome {
    /// Outcome line sent back to the initiator.
    pub const fn ack_line(self) -> &'static str {
        match self {
            Self::Verified => wire::ACK_VERIFIED,
            Self::Mismatch => wire::ACK_MISMATCH,
        }
    }
}

/// What the responder reports to its caller once a session completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderReport {
    pub entry_port: u16,
    pub outcome: SessionOutcome,
    /// Decrypted application message. Kept even on `Mismatch`.
    pub message: Vec<u8>,
}

impl ResponderReport {
    pub fn message_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }
}

/// One responder session, driven step by step.
pub struct ResponderSession {
    options: ProtocolOptions,
    state: ResponderState,
    key_pair: EphemeralKeyPair,
    peer: Option<PeerPublicKey>,
    secret: Option<SharedSecret>,
    key: Option<SymmetricKey>,
}

impl std::fmt::Debug for ResponderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponderSession")
            .field("state", &self.state)
            .field("group", &self.key_pair.group())
            .field("suite", &self.options.cipher.suite())
            .finish_non_exhaustive()
    }
}

impl ResponderSession {
    /// Start a session by generating the local ephemeral keypair.
    pub fn new(options: ProtocolOptions) -> Result<Self, SessionError> {
        let key_pair = options.engine.generate()?;
        Ok(Self {
            options,
            state: ResponderState::AwaitPeerHello,
            key_pair,
            peer: None,
            secret: None,
            key: None,
        })
    }

    pub const fn state(&self) -> ResponderState {
        self.state
    }

    fn expect_state(&self, expected: ResponderState, step: &str) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::Protocol(format!(
                "cannot {step} in state {:?} (expected {expected:?})",
                self.state
            )))
        }
    }

    /// Prompt for the entry port, read it, and confirm it in a configuration line.
    pub async fn exchange_preamble<T>(&mut self, transport: &mut T) -> Result<u16, SessionError>
    where
        T: FrameTransport + ?Sized,
    {
        self.expect_state(ResponderState::AwaitPeerHello, "exchange preamble")?;
        transport.write_frame(wire::ENTRY_PORT_PROMPT).await?;
        let frame = transport.read_frame().await?;
        let entry_port = wire::parse_entry_port(&frame)?;
        debug!(entry_port, "Entry port received");
        let config = wire::config_line(entry_port);
        transport.write_frame(&config).await?;
        self.state = ResponderState::PreambleDone;
        Ok(entry_port)
    }

    pub async fn send_public_key<T>(&mut self, transport: &mut T) -> Result<(), SessionError>
    where
        T: FrameTransport + ?Sized,
    {
        if !matches!(
            self.state,
            ResponderState::AwaitPeerHello | ResponderState::PreambleDone
        ) {
            return Err(SessionError::Protocol(format!(
                "cannot send public key in state {:?}",
                self.state
            )));
        }
        let material = self.options.engine.export_public(&self.key_pair)?;
        transport
            .write_frame(&wire::encode_public_key(&material))
            .await?;
        debug!(fingerprint = %material.fingerprint(), "Public key sent");
        self.state = ResponderState::KeySent;
        Ok(())
    }

    pub async fn receive_peer_key<T>(&mut self, transport: &mut T) -> Result<(), SessionError>
    where
        T: FrameTransport + ?Sized,
    {
        self.expect_state(ResponderState::KeySent, "receive peer key")?;
        let frame = transport.read_frame().await?;
        let der = wire::decode_public_key(&frame)?;
        let peer = self.options.engine.import_public(&der)?;
        debug!(
            fingerprint = %dhlink_crypto::fingerprint_of(&der),
            "Peer public key received"
        );
        self.peer = Some(peer);
        self.state = ResponderState::PeerKeyReceived;
        Ok(())
    }

    fn agree(&self) -> Result<SharedSecret, SessionError> {
        let peer = self
            .peer
            .as_ref()
            .ok_or_else(|| SessionError::Protocol("no peer public key".to_string()))?;
        Ok(self.options.engine.derive_shared_secret(&self.key_pair, peer)?)
    }

    pub fn derive_keys(&mut self) -> Result<(), SessionError> {
        self.expect_state(ResponderState::PeerKeyReceived, "derive keys")?;
        let secret = self.agree()?;
        let key = self.options.cipher.derive_key(&secret)?;
        self.secret = Some(secret);
        self.key = Some(key);
        self.state = ResponderState::SecretDerived;
        debug!("Shared secret derived");
        Ok(())
    }

    /// Read and decrypt the application message.
    pub async fn receive_message<T>(&mut self, transport: &mut T) -> Result<Vec<u8>, SessionError>
    where
        T: FrameTransport + ?Sized,
    {
        self.expect_state(ResponderState::SecretDerived, "receive message")?;
        let frame = transport.read_frame().await?;
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| SessionError::Protocol("no session key".to_string()))?;
        let message = self.options.cipher.decrypt(&Ciphertext::from(frame), key)?;
        debug!(bytes = message.len(), "Message decrypted");
        self.state = ResponderState::MessageReceived;
        Ok(message)
    }

    /// Re-run the agreement from the stored inputs and compare with the
    /// secret derived earlier.
    ///
    /// A stored peer key that no longer agrees with the local keypair at all
    /// (for instance one from another group) is a mismatch, not an abort.
    pub fn verify(&mut self) -> Result<SessionOutcome, SessionError> {
        self.expect_state(ResponderState::MessageReceived, "verify")?;
        let original = self
            .secret
            .as_ref()
            .ok_or_else(|| SessionError::Protocol("no shared secret".to_string()))?;
        let outcome = match self.agree() {
            Ok(again) if original.matches(&again) => SessionOutcome::Verified,
            Ok(_) => SessionOutcome::Mismatch,
            Err(SessionError::Crypto(CryptoError::AgreementFailed(reason))) => {
                debug!(%reason, "Re-derivation failed");
                SessionOutcome::Mismatch
            }
            Err(e) => return Err(e),
        };
        self.state = match outcome {
            SessionOutcome::Verified => ResponderState::Verified,
            SessionOutcome::Mismatch => ResponderState::Mismatch,
        };
        Ok(outcome)
    }

    pub async fn send_outcome<T>(
        &mut self,
        transport: &mut T,
        outcome: SessionOutcome,
    ) -> Result<(), SessionError>
    where
        T: FrameTransport + ?Sized,
    {
        if !matches!(self.state, ResponderState::Verified | ResponderState::Mismatch) {
            return Err(SessionError::Protocol(format!(
                "cannot send outcome in state {:?}",
                self.state
            )));
        }
        transport.write_frame(outcome.ack_line()).await?;
        Ok(())
    }

    /// Close the transport and drop all key material.
    pub async fn close<T>(mut self, transport: &mut T)
    where
        T: FrameTransport + ?Sized,
    {
        if let Err(e) = transport.close().await {
            warn!(error = %e, "Failed to close transport cleanly");
        }
        self.state = ResponderState::Closed;
        debug!(state = ?self.state, "Responder session closed");
    }

    /// Replace the stored peer key, as an attacker or a corrupted buffer would.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn substitute_peer_key(&mut self, peer: PeerPublicKey) {
        self.peer = Some(peer);
    }
}

/// Run a complete responder session over `transport`.
///
/// Returns the outcome and the decrypted message. Decryption failure aborts
/// the session before any outcome line is written.
pub async fn run_responder_session<T>(
    transport: &mut T,
    options: &ProtocolOptions,
) -> Result<ResponderReport, SessionError>
where
    T: FrameTransport + ?Sized,
{
    let mut session = ResponderSession::new(*options)?;
    let entry_port = session.exchange_preamble(transport).await?;
    session.send_public_key(transport).await?;
    session.receive_peer_key(transport).await?;
    session.derive_keys()?;
    let message = session.receive_message(transport).await?;
    let outcome = session.verify()?;
    session.send_outcome(transport, outcome).await?;
    session.close(transport).await;

    match outcome {
        SessionOutcome::Verified => info!(entry_port, "Session verified"),
        SessionOutcome::Mismatch => warn!(entry_port, "Shared secret mismatch"),
    }
    Ok(ResponderReport {
        entry_port,
        outcome,
        message,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::initiator::{InitiatorRequest, run_initiator_session};
    use crate::transport::StreamTransport;
    use crate::wire::AckStatus;
    use dhlink_crypto::{DhGroup, KeyExchangeEngine};

    const MAX: usize = 64 * 1024;

    fn duplex_pair() -> (
        StreamTransport<tokio::io::DuplexStream>,
        StreamTransport<tokio::io::DuplexStream>,
    ) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (
            StreamTransport::from_stream(a, MAX),
            StreamTransport::from_stream(b, MAX),
        )
    }

    #[tokio::test]
    async fn substituted_peer_key_yields_mismatch_but_keeps_message() {
        let options = ProtocolOptions::default();
        let (mut responder_io, mut initiator_io) = duplex_pair();
        let request = InitiatorRequest {
            entry_port: 6000,
            message: "hello".to_string(),
        };

        let responder = async {
            let mut session = ResponderSession::new(options).unwrap();
            session.exchange_preamble(&mut responder_io).await.unwrap();
            session.send_public_key(&mut responder_io).await.unwrap();
            session.receive_peer_key(&mut responder_io).await.unwrap();
            session.derive_keys().unwrap();
            let message = session.receive_message(&mut responder_io).await.unwrap();

            let intruder = options.engine.generate().unwrap();
            let forged = options
                .engine
                .import_public(options.engine.export_public(&intruder).unwrap().as_bytes())
                .unwrap();
            session.substitute_peer_key(forged);

            let outcome = session.verify().unwrap();
            assert_eq!(session.state(), ResponderState::Mismatch);
            session.send_outcome(&mut responder_io, outcome).await.unwrap();
            session.close(&mut responder_io).await;
            (outcome, message)
        };
        let initiator = run_initiator_session(&mut initiator_io, &options, &request);

        let ((outcome, message), report) = tokio::join!(responder, initiator);
        assert_eq!(outcome, SessionOutcome::Mismatch);
        assert_eq!(message, b"hello");
        let report = report.unwrap();
        assert_eq!(report.ack, wire::ACK_MISMATCH);
        assert_eq!(report.ack_status, AckStatus::Mismatch);
    }

    #[tokio::test]
    async fn foreign_group_peer_key_yields_mismatch_but_keeps_message() {
        let options = ProtocolOptions::default();
        let (mut responder_io, mut initiator_io) = duplex_pair();
        let request = InitiatorRequest {
            entry_port: 6000,
            message: "hello".to_string(),
        };

        let responder = async {
            let mut session = ResponderSession::new(options).unwrap();
            session.exchange_preamble(&mut responder_io).await.unwrap();
            session.send_public_key(&mut responder_io).await.unwrap();
            session.receive_peer_key(&mut responder_io).await.unwrap();
            session.derive_keys().unwrap();
            let message = session.receive_message(&mut responder_io).await.unwrap();

            let wide = KeyExchangeEngine::new(DhGroup::Modp2048);
            let intruder = wide.generate().unwrap();
            let forged = wide
                .import_public(wide.export_public(&intruder).unwrap().as_bytes())
                .unwrap();
            session.substitute_peer_key(forged);

            let outcome = session.verify().unwrap();
            assert_eq!(session.state(), ResponderState::Mismatch);
            session.send_outcome(&mut responder_io, outcome).await.unwrap();
            session.close(&mut responder_io).await;
            (outcome, message)
        };
        let initiator = run_initiator_session(&mut initiator_io, &options, &request);

        let ((outcome, message), report) = tokio::join!(responder, initiator);
        assert_eq!(outcome, SessionOutcome::Mismatch);
        assert_eq!(message, b"hello");
        assert_eq!(report.unwrap().ack_status, AckStatus::Mismatch);
    }

    #[tokio::test]
    async fn preamble_runs_at_most_once() {
        let (mut responder_io, mut peer) = duplex_pair();
        let mut session = ResponderSession::new(ProtocolOptions::default()).unwrap();

        let script = async {
            peer.read_frame().await.unwrap();
            peer.write_frame("7000").await.unwrap();
            peer.read_frame().await.unwrap();
        };
        let (entry_port, ()) = tokio::join!(session.exchange_preamble(&mut responder_io), script);
        assert_eq!(entry_port.unwrap(), 7000);
        assert_eq!(session.state(), ResponderState::PreambleDone);

        assert!(matches!(
            session.exchange_preamble(&mut responder_io).await,
            Err(SessionError::Protocol(_))
        ));
        assert_eq!(session.state(), ResponderState::PreambleDone);

        session.send_public_key(&mut responder_io).await.unwrap();
        assert_eq!(session.state(), ResponderState::KeySent);
    }

    #[tokio::test]
    async fn public_key_may_skip_the_preamble() {
        let (mut responder_io, _peer) = duplex_pair();
        let mut session = ResponderSession::new(ProtocolOptions::default()).unwrap();
        session.send_public_key(&mut responder_io).await.unwrap();
        assert_eq!(session.state(), ResponderState::KeySent);
        assert!(matches!(
            session.exchange_preamble(&mut responder_io).await,
            Err(SessionError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn steps_out_of_order_are_protocol_errors() {
        let (mut io, _peer) = duplex_pair();
        let mut session = ResponderSession::new(ProtocolOptions::default()).unwrap();

        assert!(matches!(session.derive_keys(), Err(SessionError::Protocol(_))));
        assert!(matches!(session.verify(), Err(SessionError::Protocol(_))));
        assert!(matches!(
            session.receive_message(&mut io).await,
            Err(SessionError::Protocol(_))
        ));
        assert!(matches!(
            session.send_outcome(&mut io, SessionOutcome::Verified).await,
            Err(SessionError::Protocol(_))
        ));
        assert_eq!(session.state(), ResponderState::AwaitPeerHello);
    }

    #[tokio::test]
    async fn non_base64_peer_key_aborts_with_protocol_error() {
        let (mut responder_io, mut peer) = duplex_pair();
        let options = ProtocolOptions::default();

        let responder = run_responder_session(&mut responder_io, &options);
        let script = async {
            assert_eq!(peer.read_frame().await.unwrap(), wire::ENTRY_PORT_PROMPT);
            peer.write_frame("7000").await.unwrap();
            assert_eq!(peer.read_frame().await.unwrap(), "Communication port: 7000");
            let _responder_key = peer.read_frame().await.unwrap();
            peer.write_frame("PUBKEY_I is not base64!").await.unwrap();
        };

        let (result, ()) = tokio::join!(responder, script);
        assert!(matches!(result, Err(SessionError::Protocol(msg)) if msg.contains("Base64")));
    }

    #[tokio::test]
    async fn base64_garbage_peer_key_aborts_with_agreement_error() {
        let (mut responder_io, mut peer) = duplex_pair();
        let options = ProtocolOptions::default();

        let responder = run_responder_session(&mut responder_io, &options);
        let script = async {
            peer.read_frame().await.unwrap();
            peer.write_frame("7000").await.unwrap();
            peer.read_frame().await.unwrap();
            peer.read_frame().await.unwrap();
            peer.write_frame("UFVCS0VZX0k=").await.unwrap();
        };

        let (result, ()) = tokio::join!(responder, script);
        assert!(matches!(
            result,
            Err(SessionError::Crypto(dhlink_crypto::CryptoError::AgreementFailed(_)))
        ));
    }

    #[tokio::test]
    async fn invalid_entry_port_aborts() {
        let (mut responder_io, mut peer) = duplex_pair();
        let options = ProtocolOptions::default();

        let responder = run_responder_session(&mut responder_io, &options);
        let script = async {
            peer.read_frame().await.unwrap();
            peer.write_frame("port eighty").await.unwrap();
        };

        let (result, ()) = tokio::join!(responder, script);
        assert!(matches!(result, Err(SessionError::Protocol(msg)) if msg.contains("entry port")));
    }

    #[tokio::test]
    async fn eof_before_peer_key_is_a_protocol_error() {
        let (mut responder_io, mut peer) = duplex_pair();
        let options = ProtocolOptions::default();

        let responder = run_responder_session(&mut responder_io, &options);
        let script = async {
            peer.read_frame().await.unwrap();
            peer.write_frame("7000").await.unwrap();
            peer.close().await.unwrap();
        };

        let (result, ()) = tokio::join!(responder, script);
        assert!(matches!(result, Err(SessionError::Protocol(_))));
    }

    #[test]
    fn ack_lines_match_outcomes() {
        assert_eq!(SessionOutcome::Verified.ack_line(), wire::ACK_VERIFIED);
        assert_eq!(SessionOutcome::Mismatch.ack_line(), wire::ACK_MISMATCH);
    }
}

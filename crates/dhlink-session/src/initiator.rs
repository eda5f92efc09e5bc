//! Initiator (caller) side of a session.
//!
//! ```text
//! KeyGenerated -> PeerKeyReceived -> LocalKeySent -> SecretDerived
//!     -> MessageSent -> AwaitAck -> Closed
//! ```
//!
//! The responder sends its public key first. The initiator does not verify
//! anything itself; the outcome line it receives is advisory.

use dhlink_crypto::{Ciphertext, EphemeralKeyPair, PeerPublicKey, SymmetricKey};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::options::ProtocolOptions;
use crate::transport::FrameTransport;
use crate::wire::{self, AckStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorState {
    KeyGenerated,
    PeerKeyReceived,
    LocalKeySent,
    SecretDerived,
    MessageSent,
    AwaitAck,
    Closed,
}

/// What the caller wants delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatorRequest {
    /// Entry port announced in the preamble.
    pub entry_port: u16,
    /// The single application message of this session.
    pub message: String,
}

/// Everything the initiator observed during a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatorReport {
    pub prompt: String,
    pub config_line: String,
    pub ciphertext: Ciphertext,
    /// Outcome line exactly as received.
    pub ack: String,
    pub ack_status: AckStatus,
}

/// One initiator session, driven step by step.
pub struct InitiatorSession {
    options: ProtocolOptions,
    state: InitiatorState,
    key_pair: EphemeralKeyPair,
    peer: Option<PeerPublicKey>,
    key: Option<SymmetricKey>,
}

impl std::fmt::Debug for InitiatorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitiatorSession")
            .field("state", &self.state)
            .field("group", &self.key_pair.group())
            .field("suite", &self.options.cipher.suite())
            .finish_non_exhaustive()
    }
}

impl InitiatorSession {
    pub fn new(options: ProtocolOptions) -> Result<Self, SessionError> {
        let key_pair = options.engine.generate()?;
        Ok(Self {
            options,
            state: InitiatorState::KeyGenerated,
            key_pair,
            peer: None,
            key: None,
        })
    }

    pub const fn state(&self) -> InitiatorState {
        self.state
    }

    fn expect_state(&self, expected: InitiatorState, step: &str) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::Protocol(format!(
                "cannot {step} in state {:?} (expected {expected:?})",
                self.state
            )))
        }
    }

    /// Answer the entry-port prompt. Returns `(prompt, config_line)`.
    pub async fn exchange_preamble<T>(
        &mut self,
        transport: &mut T,
        entry_port: u16,
    ) -> Result<(String, String), SessionError>
    where
        T: FrameTransport + ?Sized,
    {
        self.expect_state(InitiatorState::KeyGenerated, "exchange preamble")?;
        let prompt = transport.read_frame().await?;
        transport.write_frame(&entry_port.to_string()).await?;
        let config_line = transport.read_frame().await?;
        debug!(%config_line, "Configuration line received");
        Ok((prompt, config_line))
    }

    pub async fn receive_peer_key<T>(&mut self, transport: &mut T) -> Result<(), SessionError>
    where
        T: FrameTransport + ?Sized,
    {
        self.expect_state(InitiatorState::KeyGenerated, "receive peer key")?;
        let frame = transport.read_frame().await?;
        let der = wire::decode_public_key(&frame)?;
        let peer = self.options.engine.import_public(&der)?;
        debug!(
            fingerprint = %dhlink_crypto::fingerprint_of(&der),
            "Responder public key received"
        );
        self.peer = Some(peer);
        self.state = InitiatorState::PeerKeyReceived;
        Ok(())
    }

    pub async fn send_public_key<T>(&mut self, transport: &mut T) -> Result<(), SessionError>
    where
        T: FrameTransport + ?Sized,
    {
        self.expect_state(InitiatorState::PeerKeyReceived, "send public key")?;
        let material = self.options.engine.export_public(&self.key_pair)?;
        transport
            .write_frame(&wire::encode_public_key(&material))
            .await?;
        debug!(fingerprint = %material.fingerprint(), "Public key sent");
        self.state = InitiatorState::LocalKeySent;
        Ok(())
    }

    pub fn derive_keys(&mut self) -> Result<(), SessionError> {
        self.expect_state(InitiatorState::LocalKeySent, "derive keys")?;
        let peer = self
            .peer
            .as_ref()
            .ok_or_else(|| SessionError::Protocol("no peer public key".to_string()))?;
        let secret = self.options.engine.derive_shared_secret(&self.key_pair, peer)?;
        self.key = Some(self.options.cipher.derive_key(&secret)?);
        self.state = InitiatorState::SecretDerived;
        debug!("Shared secret derived");
        Ok(())
    }

    /// Encrypt and send the application message.
    pub async fn send_message<T>(
        &mut self,
        transport: &mut T,
        message: &str,
    ) -> Result<Ciphertext, SessionError>
    where
        T: FrameTransport + ?Sized,
    {
        self.expect_state(InitiatorState::SecretDerived, "send message")?;
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| SessionError::Protocol("no session key".to_string()))?;
        let ciphertext = self.options.cipher.encrypt(message.as_bytes(), key)?;
        transport.write_frame(ciphertext.as_str()).await?;
        self.state = InitiatorState::MessageSent;
        debug!(bytes = message.len(), "Encrypted message sent");
        Ok(ciphertext)
    }

    /// Wait for the responder's outcome line.
    pub async fn await_ack<T>(&mut self, transport: &mut T) -> Result<String, SessionError>
    where
        T: FrameTransport + ?Sized,
    {
        self.expect_state(InitiatorState::MessageSent, "await acknowledgment")?;
        self.state = InitiatorState::AwaitAck;
        Ok(transport.read_frame().await?)
    }

    pub async fn close<T>(mut self, transport: &mut T)
    where
        T: FrameTransport + ?Sized,
    {
        if let Err(e) = transport.close().await {
            warn!(error = %e, "Failed to close transport cleanly");
        }
        self.state = InitiatorState::Closed;
        debug!(state = ?self.state, "Initiator session closed");
    }
}

/// Run a complete initiator session over `transport`.
pub async fn run_initiator_session<T>(
    transport: &mut T,
    options: &ProtocolOptions,
    request: &InitiatorRequest,
) -> Result<InitiatorReport, SessionError>
where
    T: FrameTransport + ?Sized,
{
    let mut session = InitiatorSession::new(*options)?;
    let (prompt, config_line) = session
        .exchange_preamble(transport, request.entry_port)
        .await?;
    session.receive_peer_key(transport).await?;
    session.send_public_key(transport).await?;
    session.derive_keys()?;
    let ciphertext = session.send_message(transport, &request.message).await?;
    let ack = session.await_ack(transport).await?;
    session.close(transport).await;

    let ack_status = wire::classify_ack(&ack);
    info!(?ack_status, %ack, "Responder acknowledged");
    Ok(InitiatorReport {
        prompt,
        config_line,
        ciphertext,
        ack,
        ack_status,
    })
}

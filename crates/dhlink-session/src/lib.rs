//! dhlink Handshake Protocol
//!
//! Drives one session over a line-framed transport:
//! - Preamble: entry-port prompt, entry port, configuration line
//! - Public key exchange (responder first), Base64 DER on one line each
//! - Shared secret and symmetric key derivation on both sides
//! - One encrypted application message from initiator to responder
//! - Responder re-derives the secret and acknowledges with an outcome line
//!
//! Each session owns its keypair, secret and key exclusively; nothing is
//! shared between sessions and nothing is retried.

pub mod error;
pub mod initiator;
pub mod options;
pub mod responder;
pub mod transport;
pub mod wire;

pub use error::SessionError;
pub use initiator::{InitiatorReport, InitiatorRequest, InitiatorSession, InitiatorState, run_initiator_session};
pub use options::ProtocolOptions;
pub use responder::{ResponderReport, ResponderSession, ResponderState, SessionOutcome, run_responder_session};
pub use transport::{FrameTransport, LineTransport, StreamTransport, TransportError};
pub use wire::AckStatus;

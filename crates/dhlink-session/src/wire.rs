//! Frame contents of the line protocol.
//!
//! ```text
//! R -> I  entry-port prompt            (free text)
//! I -> R  entry port                   (decimal)
//! R -> I  configuration line           (free text)
//! R -> I  responder public key         (Base64 DER)
//! I -> R  initiator public key         (Base64 DER)
//! I -> R  ciphertext                   (Base64)
//! R -> I  outcome                      (ACK_VERIFIED | ACK_MISMATCH)
//! ```

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use dhlink_crypto::PublicKeyMaterial;

use crate::error::SessionError;

pub const ENTRY_PORT_PROMPT: &str = "Enter entry port: ";

pub const CONFIG_LINE_PREFIX: &str = "Communication port: ";

pub const ACK_VERIFIED: &str = "Message received successfully!";

pub const ACK_MISMATCH: &str = "Different key. Message not delivered.";

/// Initiator's reading of the responder's outcome line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Verified,
    Mismatch,
    /// Free text from a responder speaking a different dialect.
    Unrecognised,
}

pub fn classify_ack(line: &str) -> AckStatus {
    match line.trim() {
        ACK_VERIFIED => AckStatus::Verified,
        ACK_MISMATCH => AckStatus::Mismatch,
        _ => AckStatus::Unrecognised,
    }
}

pub fn config_line(entry_port: u16) -> String {
    format!("{CONFIG_LINE_PREFIX}{entry_port}")
}

pub fn parse_entry_port(frame: &str) -> Result<u16, SessionError> {
    frame
        .trim()
        .parse()
        .map_err(|_| SessionError::Protocol(format!("invalid entry port {frame:?}")))
}

pub fn encode_public_key(material: &PublicKeyMaterial) -> String {
    STANDARD.encode(material.as_bytes())
}

/// Base64-decode a public key frame. DER validation happens in the engine.
pub fn decode_public_key(frame: &str) -> Result<Vec<u8>, SessionError> {
    let trimmed = frame.trim();
    if trimmed.is_empty() {
        return Err(SessionError::Protocol("empty public key frame".to_string()));
    }
    STANDARD
        .decode(trimmed)
        .map_err(|e| SessionError::Protocol(format!("public key frame is not Base64: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn entry_port_parsing() {
        assert_eq!(parse_entry_port("8080").unwrap(), 8080);
        assert_eq!(parse_entry_port(" 22 ").unwrap(), 22);
        for bad in ["", "abc", "-1", "70000", "80 80"] {
            assert!(matches!(parse_entry_port(bad), Err(SessionError::Protocol(_))), "{bad:?}");
        }
    }

    #[test]
    fn config_line_carries_port() {
        assert_eq!(config_line(4242), "Communication port: 4242");
    }

    #[test]
    fn acks_are_classified() {
        assert_eq!(classify_ack(ACK_VERIFIED), AckStatus::Verified);
        assert_eq!(classify_ack(ACK_MISMATCH), AckStatus::Mismatch);
        assert_eq!(classify_ack("ok"), AckStatus::Unrecognised);
    }

    #[test]
    fn public_key_frames() {
        let material = PublicKeyMaterial::from_der(vec![0x30, 0x03, 0x02, 0x01, 0x05]);
        let frame = encode_public_key(&material);
        assert_eq!(decode_public_key(&frame).unwrap(), material.as_bytes());

        assert!(matches!(decode_public_key(""), Err(SessionError::Protocol(_))));
        assert!(matches!(
            decode_public_key("PUBKEY_R!"),
            Err(SessionError::Protocol(msg)) if msg.contains("Base64")
        ));
    }
}

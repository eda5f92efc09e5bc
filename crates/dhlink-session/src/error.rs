//! Session error types.

use dhlink_crypto::CryptoError;

use crate::transport::TransportError;

/// Errors that abort a session. All are local to one connection.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Unexpected EOF, malformed frame, missing field, or a step run out of order.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Key generation, agreement, or cipher failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Transport-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Io(e) => Self::Io(e),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl SessionError {
    /// True when the application message could not be decrypted.
    pub const fn is_decryption_failure(&self) -> bool {
        matches!(self, Self::Crypto(CryptoError::DecryptionFailed(_)))
    }
}

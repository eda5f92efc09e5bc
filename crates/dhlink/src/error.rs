//! Errors surfaced by the listener and the connector.

use dhlink_crypto::CryptoError;
use dhlink_session::SessionError;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Invalid algorithm selection in configuration.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("session did not complete within {secs}s")]
    Timeout { secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

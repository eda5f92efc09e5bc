//! Per-session algorithm selection shared by both roles.

use dhlink_crypto::{CipherSuite, CryptoError, DhGroup, KeyExchangeEngine, SessionCipher};

/// Agreement group and cipher suite. Both peers must use the same values;
/// they are not negotiated on the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolOptions {
    pub engine: KeyExchangeEngine,
    pub cipher: SessionCipher,
}

impl ProtocolOptions {
    pub const fn new(group: DhGroup, suite: CipherSuite) -> Self {
        Self {
            engine: KeyExchangeEngine::new(group),
            cipher: SessionCipher::new(suite),
        }
    }

    /// Build from configuration values (`crypto.modulus_bits`, `crypto.cipher`).
    pub fn from_config(modulus_bits: u32, cipher: &str) -> Result<Self, CryptoError> {
        Ok(Self::new(
            DhGroup::from_modulus_bits(modulus_bits)?,
            cipher.parse()?,
        ))
    }
}

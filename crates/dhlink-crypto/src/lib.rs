//! dhlink key agreement and session cipher.
//!
//! Pure computation, no I/O. The handshake crate drives these types over a
//! transport.
//!
//! ## Crypto primitives
//!
//! - **Agreement**: ephemeral finite-field Diffie-Hellman in a named MODP group
//!   (1024-bit Oakley group 2 by default, 2048-bit group 14 optional)
//! - **Public key encoding**: X.509 `SubjectPublicKeyInfo` DER, dhKeyAgreement OID
//! - **Key derivation**: SHA-1 of the shared secret truncated to 8 bytes
//! - **Encryption**: DES/ECB/PKCS#5 with Base64 text output, or
//!   ChaCha20-Poly1305 keyed through HKDF-SHA256

pub mod cipher;
pub mod error;
pub mod exchange;
pub mod group;
pub mod spki;

pub use cipher::{Ciphertext, CipherSuite, SessionCipher, SymmetricKey, DES_KEY_LEN};
pub use error::CryptoError;
#[cfg(any(test, feature = "test-utils"))]
pub use exchange::perform_key_exchange;
pub use exchange::{
    EphemeralKeyPair, KeyExchangeEngine, PeerPublicKey, PublicKeyMaterial, SharedSecret,
    fingerprint_of,
};
pub use group::DhGroup;

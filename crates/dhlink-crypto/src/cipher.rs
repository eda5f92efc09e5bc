//! Session cipher.
//!
//! Turns a raw shared secret into a symmetric key and protects a single
//! message with it. Ciphertext travels as standard padded Base64 text.
//!
//! The default suite is DES in ECB mode with PKCS#5 padding, keyed with the
//! first 8 bytes of SHA-1 over the shared secret. ECB leaks repeated
//! plaintext blocks and DES keys are brute-forceable; the suite exists for
//! interoperability with peers speaking the same line protocol.
//! `chacha20-poly1305` keeps the handshake unchanged and swaps in an AEAD.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ecb::cipher::block_padding::Pkcs7;
use ecb::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::exchange::SharedSecret;

type DesEcbEnc = ecb::Encryptor<des::Des>;
type DesEcbDec = ecb::Decryptor<des::Des>;

/// DES key length in bytes.
pub const DES_KEY_LEN: usize = 8;

/// DES block length in bytes.
const DES_BLOCK_LEN: usize = 8;

/// ChaCha20-Poly1305 key length.
const AEAD_KEY_LEN: usize = 32;

/// Nonce size for ChaCha20-Poly1305.
const AEAD_NONCE_LEN: usize = 12;

/// Poly1305 tag size.
const AEAD_TAG_LEN: usize = 16;

/// HKDF info string for the AEAD suite.
const HKDF_INFO: &[u8] = b"dhlink-session-v1";

/// HKDF salt for domain separation.
const HKDF_SALT: &[u8] = b"dhlink-hkdf-salt-v1";

/// Symmetric algorithm used for the application message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CipherSuite {
    /// DES/ECB/PKCS#5, SHA-1 truncated key.
    #[default]
    DesEcb,
    /// ChaCha20-Poly1305, HKDF-SHA256 key, random nonce prefixed to the ciphertext.
    ChaCha20Poly1305,
}

impl CipherSuite {
    pub const fn name(self) -> &'static str {
        match self {
            Self::DesEcb => "des-ecb",
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }

    /// Exact key length the suite requires.
    pub const fn key_len(self) -> usize {
        match self {
            Self::DesEcb => DES_KEY_LEN,
            Self::ChaCha20Poly1305 => AEAD_KEY_LEN,
        }
    }
}

impl std::fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for CipherSuite {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "des-ecb" | "des" => Ok(Self::DesEcb),
            "chacha20-poly1305" | "chacha20poly1305" => Ok(Self::ChaCha20Poly1305),
            other => Err(CryptoError::UnsupportedAlgorithm(format!(
                "unknown cipher suite {other:?} (supported: des-ecb, chacha20-poly1305)"
            ))),
        }
    }
}

/// Key material for one session. Zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    #[zeroize(skip)]
    suite: CipherSuite,
    bytes: Vec<u8>,
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("suite", &self.suite)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl SymmetricKey {
    /// Wrap raw key bytes, checking the length against the suite.
    pub fn from_bytes(suite: CipherSuite, bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != suite.key_len() {
            return Err(CryptoError::InvalidKeyLength {
                expected: suite.key_len(),
                actual: bytes.len(),
            });
        }
        Ok(Self {
            suite,
            bytes: bytes.to_vec(),
        })
    }

    pub const fn suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Base64 text of an encrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext(String);

impl Ciphertext {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for Ciphertext {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for Ciphertext {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl std::fmt::Display for Ciphertext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives keys and encrypts/decrypts under one cipher suite.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionCipher {
    suite: CipherSuite,
}

impl SessionCipher {
    pub const fn new(suite: CipherSuite) -> Self {
        Self { suite }
    }

    pub const fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Derive the symmetric key from a shared secret. Pure function of its input.
    pub fn derive_key(&self, secret: &SharedSecret) -> Result<SymmetricKey, CryptoError> {
        match self.suite {
            CipherSuite::DesEcb => {
                let mut digest = Sha1::digest(secret.as_bytes());
                let key = SymmetricKey::from_bytes(self.suite, &digest[..DES_KEY_LEN]);
                digest.as_mut_slice().zeroize();
                key
            }
            CipherSuite::ChaCha20Poly1305 => {
                let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret.as_bytes());
                let mut okm = [0u8; AEAD_KEY_LEN];
                hk.expand(HKDF_INFO, &mut okm)
                    .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
                let key = SymmetricKey::from_bytes(self.suite, &okm);
                okm.zeroize();
                key
            }
        }
    }

    /// Encrypt `plaintext` and return its Base64 text.
    pub fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> Result<Ciphertext, CryptoError> {
        self.check_key(key).map_err(CryptoError::EncryptionFailed)?;
        let raw = match self.suite {
            CipherSuite::DesEcb => DesEcbEnc::new_from_slice(key.as_bytes())
                .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            CipherSuite::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
                let mut nonce_bytes = [0u8; AEAD_NONCE_LEN];
                OsRng.fill_bytes(&mut nonce_bytes);
                let sealed = cipher
                    .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
                    .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
                let mut out = Vec::with_capacity(AEAD_NONCE_LEN + sealed.len());
                out.extend_from_slice(&nonce_bytes);
                out.extend_from_slice(&sealed);
                out
            }
        };
        Ok(Ciphertext(STANDARD.encode(raw)))
    }

    /// Decrypt Base64 ciphertext. Never returns partially decrypted data.
    pub fn decrypt(&self, ciphertext: &Ciphertext, key: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
        self.check_key(key).map_err(CryptoError::DecryptionFailed)?;
        let raw = STANDARD
            .decode(ciphertext.as_str().trim())
            .map_err(|e| CryptoError::DecryptionFailed(format!("invalid Base64: {e}")))?;

        match self.suite {
            CipherSuite::DesEcb => {
                if raw.is_empty() || raw.len() % DES_BLOCK_LEN != 0 {
                    return Err(CryptoError::DecryptionFailed(format!(
                        "ciphertext length {} is not a positive multiple of {DES_BLOCK_LEN}",
                        raw.len()
                    )));
                }
                DesEcbDec::new_from_slice(key.as_bytes())
                    .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?
                    .decrypt_padded_vec_mut::<Pkcs7>(&raw)
                    .map_err(|_| CryptoError::DecryptionFailed("bad padding".to_string()))
            }
            CipherSuite::ChaCha20Poly1305 => {
                if raw.len() < AEAD_NONCE_LEN + AEAD_TAG_LEN {
                    return Err(CryptoError::DecryptionFailed(format!(
                        "ciphertext too short: {} bytes",
                        raw.len()
                    )));
                }
                let (nonce, sealed) = raw.split_at(AEAD_NONCE_LEN);
                ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
                    .decrypt(Nonce::from_slice(nonce), sealed)
                    .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
            }
        }
    }

    fn check_key(&self, key: &SymmetricKey) -> Result<(), String> {
        if key.suite != self.suite {
            return Err(format!(
                "key derived for {} used with {}",
                key.suite, self.suite
            ));
        }
        if key.len() != self.suite.key_len() {
            return Err(format!(
                "key length {} does not match {} bytes",
                key.len(),
                self.suite.key_len()
            ));
        }
        Ok(())
    }
}

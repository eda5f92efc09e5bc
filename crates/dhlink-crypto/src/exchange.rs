//! Key exchange engine.
//!
//! Each session generates an ephemeral finite-field DH keypair, exports the
//! public half as DER `SubjectPublicKeyInfo`, and combines the peer's public
//! value with its own private exponent into a fixed-length shared secret.

use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::group::DhGroup;
use crate::spki;

/// An ephemeral keypair owned by exactly one session.
pub struct EphemeralKeyPair {
    group: DhGroup,
    /// Private exponent, big-endian.
    secret: Zeroizing<Vec<u8>>,
    public: BigUint,
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("group", &self.group)
            .field("public", &hex::encode(self.public.to_bytes_be()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl EphemeralKeyPair {
    pub const fn group(&self) -> DhGroup {
        self.group
    }

    /// Public value `y = g^x mod p`.
    pub const fn public_value(&self) -> &BigUint {
        &self.public
    }
}

/// Encoded public key exchanged with the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyMaterial(Vec<u8>);

impl PublicKeyMaterial {
    pub const fn from_der(der: Vec<u8>) -> Self {
        Self(der)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// SHA-256 fingerprint, suitable for logs and out-of-band comparison.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.0)
    }
}

/// A decoded and range-checked peer public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPublicKey {
    group: DhGroup,
    value: BigUint,
}

impl PeerPublicKey {
    pub const fn group(&self) -> DhGroup {
        self.group
    }

    pub const fn value(&self) -> &BigUint {
        &self.value
    }
}

/// Raw agreement output. Never transmitted; zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(Vec<u8>);

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedSecret")
            .field(&format_args!("[REDACTED; {} bytes]", self.0.len()))
            .finish()
    }
}

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Constant-time equality.
    pub fn matches(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Generates keypairs and performs agreement within one DH group.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyExchangeEngine {
    group: DhGroup,
}

impl KeyExchangeEngine {
    pub const fn new(group: DhGroup) -> Self {
        Self { group }
    }

    /// Engine for a configured modulus strength.
    pub fn from_modulus_bits(bits: u32) -> Result<Self, CryptoError> {
        DhGroup::from_modulus_bits(bits).map(Self::new)
    }

    pub const fn group(&self) -> DhGroup {
        self.group
    }

    /// Generate a fresh ephemeral keypair with a private exponent in `[2, p-2]`.
    pub fn generate(&self) -> Result<EphemeralKeyPair, CryptoError> {
        let params = self.group.params()?;
        let upper = &params.p - BigUint::one();
        let x = OsRng.gen_biguint_range(&BigUint::from(2u32), &upper);
        let public = params.g.modpow(&x, &params.p);
        let secret = Zeroizing::new(x.to_bytes_be());

        tracing::debug!(group = %self.group, "Generated ephemeral keypair");
        Ok(EphemeralKeyPair {
            group: self.group,
            secret,
            public,
        })
    }

    /// Export the public half of `key_pair`.
    pub fn export_public(&self, key_pair: &EphemeralKeyPair) -> Result<PublicKeyMaterial, CryptoError> {
        let params = key_pair.group.params()?;
        Ok(PublicKeyMaterial(spki::encode(
            &params.p,
            &params.g,
            &key_pair.public,
        )?))
    }

    /// Decode a peer's public key and check it lies strictly inside `(1, p-1)`.
    pub fn import_public(&self, material: &[u8]) -> Result<PeerPublicKey, CryptoError> {
        let components = spki::decode(material)?;
        let group = DhGroup::from_params(&components.p, &components.g).ok_or_else(|| {
            CryptoError::AgreementFailed(format!(
                "unsupported domain parameters ({}-bit modulus)",
                components.p.bits()
            ))
        })?;
        let one = BigUint::one();
        let upper = &components.p - &one;
        if components.y <= one || components.y >= upper {
            return Err(CryptoError::AgreementFailed(
                "peer public value out of range".to_string(),
            ));
        }
        Ok(PeerPublicKey {
            group,
            value: components.y,
        })
    }

    /// Combine our private exponent with the peer's public value.
    ///
    /// Output is `peer^x mod p`, left-padded to the modulus length, so repeated
    /// calls with the same inputs return identical bytes.
    pub fn derive_shared_secret(
        &self,
        local: &EphemeralKeyPair,
        peer: &PeerPublicKey,
    ) -> Result<SharedSecret, CryptoError> {
        if local.group != peer.group {
            return Err(CryptoError::AgreementFailed(format!(
                "incompatible domain parameters: local {}, peer {}",
                local.group, peer.group
            )));
        }
        let params = local.group.params()?;
        let x = BigUint::from_bytes_be(&local.secret);
        let shared = peer.value.modpow(&x, &params.p);

        let len = local.group.modulus_len();
        let raw = Zeroizing::new(shared.to_bytes_be());
        if raw.len() > len {
            return Err(CryptoError::AgreementFailed(
                "shared value exceeds modulus length".to_string(),
            ));
        }
        let mut out = vec![0u8; len];
        out[len - raw.len()..].copy_from_slice(&raw);
        Ok(SharedSecret(out))
    }
}

/// Compute a colon-separated hex SHA-256 fingerprint of encoded key bytes.
pub fn fingerprint_of(key_bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(key_bytes);
    hash.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Run both sides of an agreement in-process and return each side's secret.
///
/// Mainly useful for testing. In production each side owns one keypair and
/// only ever sees the peer's exported public key.
#[cfg(any(test, feature = "test-utils"))]
pub fn perform_key_exchange(group: DhGroup) -> Result<(SharedSecret, SharedSecret), CryptoError> {
    let engine = KeyExchangeEngine::new(group);
    let alice = engine.generate()?;
    let bob = engine.generate()?;

    let alice_pub = engine.import_public(engine.export_public(&alice)?.as_bytes())?;
    let bob_pub = engine.import_public(engine.export_public(&bob)?.as_bytes())?;

    Ok((
        engine.derive_shared_secret(&alice, &bob_pub)?,
        engine.derive_shared_secret(&bob, &alice_pub)?,
    ))
}

//! X.509 `SubjectPublicKeyInfo` encoding for Diffie-Hellman public keys.
//!
//! ```text
//! SubjectPublicKeyInfo ::= SEQUENCE {
//!     algorithm SEQUENCE {
//!         algorithm   OBJECT IDENTIFIER,   -- 1.2.840.113549.1.3.1
//!         parameters  SEQUENCE { p INTEGER, g INTEGER, l INTEGER OPTIONAL }
//!     }
//!     subjectPublicKey BIT STRING          -- wraps INTEGER y
//! }
//! ```
//!
//! This is the PKCS#3 layout emitted by common JCA providers, so keys
//! exported here can be imported by such peers and vice versa.

use der::asn1::{BitStringRef, ObjectIdentifier, UintRef};
use der::{Decode, Encode, Sequence};
use num_bigint::BigUint;

use crate::error::CryptoError;

/// dhKeyAgreement (PKCS#3).
pub const DH_KEY_AGREEMENT_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.3.1");

/// `DHParameter` from PKCS#3. `l` is advisory and ignored on import.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct DhParameter<'a> {
    prime: UintRef<'a>,
    base: UintRef<'a>,
    private_value_length: Option<UintRef<'a>>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct DhAlgorithm<'a> {
    algorithm: ObjectIdentifier,
    parameters: DhParameter<'a>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct SubjectPublicKeyInfo<'a> {
    algorithm: DhAlgorithm<'a>,
    subject_public_key: BitStringRef<'a>,
}

/// Components recovered from an encoded public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhPublicComponents {
    pub p: BigUint,
    pub g: BigUint,
    pub y: BigUint,
}

/// Encode `(p, g, y)` as a DER `SubjectPublicKeyInfo`.
pub fn encode(p: &BigUint, g: &BigUint, y: &BigUint) -> Result<Vec<u8>, CryptoError> {
    encode_with_length(p, g, y, None)
}

fn encode_with_length(
    p: &BigUint,
    g: &BigUint,
    y: &BigUint,
    private_value_length: Option<u32>,
) -> Result<Vec<u8>, CryptoError> {
    let (p, g, y) = (p.to_bytes_be(), g.to_bytes_be(), y.to_bytes_be());
    let l = private_value_length.map(u32::to_be_bytes);

    let key = UintRef::new(&y).and_then(|y| y.to_der()).map_err(encoding)?;
    let spki = SubjectPublicKeyInfo {
        algorithm: DhAlgorithm {
            algorithm: DH_KEY_AGREEMENT_OID,
            parameters: DhParameter {
                prime: UintRef::new(&p).map_err(encoding)?,
                base: UintRef::new(&g).map_err(encoding)?,
                private_value_length: l
                    .as_ref()
                    .map(|l| UintRef::new(l.as_slice()))
                    .transpose()
                    .map_err(encoding)?,
            },
        },
        subject_public_key: BitStringRef::from_bytes(&key).map_err(encoding)?,
    };
    spki.to_der().map_err(encoding)
}

/// Decode a DER `SubjectPublicKeyInfo` carrying a DH public key.
///
/// Anything other than exactly that structure is an agreement failure.
pub fn decode(der: &[u8]) -> Result<DhPublicComponents, CryptoError> {
    let spki = SubjectPublicKeyInfo::from_der(der).map_err(malformed)?;
    if spki.algorithm.algorithm != DH_KEY_AGREEMENT_OID {
        return Err(CryptoError::AgreementFailed(format!(
            "malformed public key encoding: algorithm {} is not dhKeyAgreement",
            spki.algorithm.algorithm
        )));
    }
    let key = spki.subject_public_key.as_bytes().ok_or_else(|| {
        CryptoError::AgreementFailed(
            "malformed public key encoding: subjectPublicKey has unused bits".to_string(),
        )
    })?;
    let y = UintRef::from_der(key).map_err(malformed)?;

    let params = &spki.algorithm.parameters;
    Ok(DhPublicComponents {
        p: BigUint::from_bytes_be(params.prime.as_bytes()),
        g: BigUint::from_bytes_be(params.base.as_bytes()),
        y: BigUint::from_bytes_be(y.as_bytes()),
    })
}

fn malformed(err: der::Error) -> CryptoError {
    CryptoError::AgreementFailed(format!("malformed public key encoding: {err}"))
}

fn encoding(err: der::Error) -> CryptoError {
    CryptoError::KeyGenerationFailed(format!("public key encoding failed: {err}"))
}

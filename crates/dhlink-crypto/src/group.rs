//! Named Diffie-Hellman domain parameters.
//!
//! Only well-known safe-prime MODP groups are supported, so peers never
//! generate or trust ad-hoc parameters. Both use generator 2.

use num_bigint::BigUint;

use crate::error::CryptoError;

/// RFC 2409 section 6.2, Oakley group 2.
const MODP_1024_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381",
    "FFFFFFFFFFFFFFFF",
);

/// RFC 3526 section 3, group 14.
const MODP_2048_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

const GENERATOR: u32 = 2;

/// A supported agreement group, identified by modulus size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DhGroup {
    /// 1024-bit modulus, the reference strength.
    #[default]
    Modp1024,
    /// 2048-bit modulus.
    Modp2048,
}

/// Prime modulus and generator of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainParams {
    pub p: BigUint,
    pub g: BigUint,
}

impl DhGroup {
    /// Look up the group for a configured modulus strength.
    pub fn from_modulus_bits(bits: u32) -> Result<Self, CryptoError> {
        match bits {
            1024 => Ok(Self::Modp1024),
            2048 => Ok(Self::Modp2048),
            other => Err(CryptoError::UnsupportedAlgorithm(format!(
                "unsupported modulus size {other} bits (supported: 1024, 2048)"
            ))),
        }
    }

    pub const fn modulus_bits(self) -> u32 {
        match self {
            Self::Modp1024 => 1024,
            Self::Modp2048 => 2048,
        }
    }

    /// Byte length of the modulus, which is also the shared secret length.
    pub const fn modulus_len(self) -> usize {
        self.modulus_bits() as usize / 8
    }

    const fn prime_hex(self) -> &'static str {
        match self {
            Self::Modp1024 => MODP_1024_HEX,
            Self::Modp2048 => MODP_2048_HEX,
        }
    }

    /// Materialise the domain parameters.
    pub fn params(self) -> Result<DomainParams, CryptoError> {
        let p = BigUint::parse_bytes(self.prime_hex().as_bytes(), 16).ok_or_else(|| {
            CryptoError::KeyGenerationFailed(format!(
                "built-in {}-bit modulus is not valid hex",
                self.modulus_bits()
            ))
        })?;
        Ok(DomainParams {
            p,
            g: BigUint::from(GENERATOR),
        })
    }

    /// Identify a group from decoded parameters, if it is one we support.
    pub fn from_params(p: &BigUint, g: &BigUint) -> Option<Self> {
        [Self::Modp1024, Self::Modp2048]
            .into_iter()
            .find(|group| group.params().is_ok_and(|params| &params.p == p && &params.g == g))
    }
}

impl std::fmt::Display for DhGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "modp{}", self.modulus_bits())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn moduli_have_declared_bit_length() {
        for group in [DhGroup::Modp1024, DhGroup::Modp2048] {
            let params = group.params().unwrap();
            assert_eq!(params.p.bits(), u64::from(group.modulus_bits()));
            assert_eq!(params.g, BigUint::from(2u32));
        }
    }

    #[test]
    fn moduli_are_odd() {
        for group in [DhGroup::Modp1024, DhGroup::Modp2048] {
            let p = group.params().unwrap().p;
            assert!(p.bit(0));
        }
    }

    #[test]
    fn from_modulus_bits_rejects_unknown_sizes() {
        assert_eq!(DhGroup::from_modulus_bits(1024).unwrap(), DhGroup::Modp1024);
        assert_eq!(DhGroup::from_modulus_bits(2048).unwrap(), DhGroup::Modp2048);
        assert!(matches!(
            DhGroup::from_modulus_bits(512),
            Err(CryptoError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn from_params_round_trips() {
        let params = DhGroup::Modp2048.params().unwrap();
        assert_eq!(DhGroup::from_params(&params.p, &params.g), Some(DhGroup::Modp2048));
        assert_eq!(DhGroup::from_params(&params.p, &BigUint::from(5u32)), None);
    }
}

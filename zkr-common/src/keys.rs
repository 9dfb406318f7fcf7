//! Private keys, public keys and ECDH.
//!
//! A private key is a uniformly sampled field element. It is never used as a
//! curve exponent directly: [`derive_signing_scalar`] hashes it, prunes the
//! cofactor bits and shifts, and that value drives every point multiplication.

use std::fmt;

use halo2curves_axiom::bn256::Fr;
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::babyjub::Point;
use crate::field::{fr_from_biguint, fr_to_bytes, fr_to_hex, serde_fr, MODULUS};
use crate::mimc::{hash, multi_hash};
use crate::CryptoError;

/// Largest multiple of `p` below `2^256`; 32-byte samples at or above it are rejected.
static SAMPLE_LIMIT: Lazy<BigUint> = Lazy::new(|| {
    let space = BigUint::from(1u8) << 256usize;
    (&space / &*MODULUS) * &*MODULUS
});

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivateKey(#[serde(with = "serde_fr")] Fr);

impl PrivateKey {
    pub fn from_scalar(scalar: Fr) -> Self {
        Self(scalar)
    }

    pub fn scalar(&self) -> &Fr {
        &self.0
    }

    /// Samples a key from the operating system's entropy source.
    pub fn random() -> Result<Self, CryptoError> {
        Self::random_with(&mut OsRng)
    }

    /// Rejection-samples 256-bit values so the reduction mod `p` is unbiased.
    pub fn random_with<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, CryptoError> {
        loop {
            let mut buf = [0u8; 32];
            rng.try_fill_bytes(&mut buf)
                .map_err(|err| CryptoError::Entropy(err.to_string()))?;
            let candidate = BigUint::from_bytes_be(&buf);
            if candidate < *SAMPLE_LIMIT {
                return Ok(Self(fr_from_biguint(&candidate)));
            }
        }
    }

    pub fn signing_scalar(&self) -> BigUint {
        derive_signing_scalar(&self.0)
    }

    pub fn public_key(&self) -> Point {
        derive_public_key(&self.0)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

#[derive(Clone, Debug)]
pub struct KeyPair {
    pub private_key: PrivateKey,
    pub public_key: Point,
}

impl KeyPair {
    pub fn generate() -> Result<Self, CryptoError> {
        PrivateKey::random().map(Self::from_private_key)
    }

    pub fn from_private_key(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }
}

/// Hash, prune per the cofactor, and divide by 8.
///
/// The digest `H(sk)` is pruned over its canonical 32-byte little-endian
/// encoding. Keys derived by tools that prune the hex text of the digest
/// instead produce different public keys from the same scalar.
pub fn derive_signing_scalar(sk: &Fr) -> BigUint {
    let mut buf = fr_to_bytes(&hash(*sk));
    buf[0] &= 0xf8;
    buf[31] &= 0x7f;
    buf[31] |= 0x40;
    BigUint::from_bytes_le(&buf) >> 3usize
}

pub fn derive_public_key(sk: &Fr) -> Point {
    Point::base8().mul_scalar(&derive_signing_scalar(sk))
}

/// Shared secret: x-coordinate of `pk · signing_scalar(sk)`.
pub fn ecdh(sk: &PrivateKey, pk: &Point) -> Fr {
    pk.mul_scalar(&sk.signing_scalar()).x
}

/// Account address: `H([pk.x, pk.y])`.
pub fn address(pk: &Point) -> Fr {
    multi_hash(&[pk.x, pk.y])
}

pub fn address_hex(pk: &Point) -> String {
    fr_to_hex(&address(pk))
}

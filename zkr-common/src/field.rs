//! BN254 scalar field helpers.
//!
//! `Fr` keeps its limbs reduced, so every value produced here is canonical.
//! The helpers cover the conversions the rest of the workspace needs: byte
//! encodings, big integers, `u128` amounts and the decimal strings used in
//! circuit inputs and JSON.

use halo2curves_axiom::bn256::Fr;
use halo2curves_axiom::ff::{Field, PrimeField};
use num_bigint::BigUint;
use once_cell::sync::Lazy;

use crate::CryptoError;

/// Order of the BN254 scalar field.
pub const MODULUS_DECIMAL: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

pub static MODULUS: Lazy<BigUint> = Lazy::new(|| {
    BigUint::parse_bytes(MODULUS_DECIMAL.as_bytes(), 10).expect("valid field modulus")
});

/// Little-endian canonical encoding.
pub fn fr_to_bytes(fr: &Fr) -> [u8; 32] {
    let repr = fr.to_repr();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(repr.as_ref());
    bytes
}

/// Inverse of [`fr_to_bytes`]; rejects encodings of values `>= p`.
pub fn fr_from_bytes(bytes: &[u8; 32]) -> Result<Fr, CryptoError> {
    let mut repr = <Fr as PrimeField>::Repr::default();
    repr.as_mut().copy_from_slice(bytes);
    Option::<Fr>::from(Fr::from_repr(repr))
        .ok_or_else(|| CryptoError::NonCanonical(format!("0x{}", hex::encode(bytes))))
}

/// Interprets 32 big-endian bytes as an integer and reduces it mod `p`.
pub fn reduce_be_bytes_to_fr(bytes: &[u8; 32]) -> Fr {
    let base = Fr::from(256);
    bytes
        .iter()
        .fold(Fr::ZERO, |acc, byte| acc * base + Fr::from(*byte as u64))
}

pub fn fr_to_biguint(fr: &Fr) -> BigUint {
    BigUint::from_bytes_le(&fr_to_bytes(fr))
}

/// Reduces an arbitrary integer into the field.
pub fn fr_from_biguint(value: &BigUint) -> Fr {
    let reduced = value % &*MODULUS;
    let mut bytes = reduced.to_bytes_le();
    bytes.resize(32, 0);
    let mut repr = <Fr as PrimeField>::Repr::default();
    repr.as_mut().copy_from_slice(&bytes);
    // `reduced < p`, so the encoding is always canonical.
    Option::<Fr>::from(Fr::from_repr(repr)).unwrap_or(Fr::ZERO)
}

pub fn fr_from_u128(value: u128) -> Fr {
    let hi = Fr::from((value >> 64) as u64);
    let lo = Fr::from(value as u64);
    hi * Fr::from(u64::MAX) + hi + lo
}

/// Returns `None` when the scalar does not fit in 128 bits.
pub fn fr_to_u128(fr: &Fr) -> Option<u128> {
    let bytes = fr_to_bytes(fr);
    if bytes[16..].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&bytes[..16]);
    Some(u128::from_le_bytes(low))
}

pub fn fr_to_decimal(fr: &Fr) -> String {
    fr_to_biguint(fr).to_str_radix(10)
}

/// Parses a decimal string, or a `0x`-prefixed hex string, into a canonical scalar.
pub fn fr_from_decimal(value: &str) -> Result<Fr, CryptoError> {
    let trimmed = value.trim();
    let parsed = match trimmed.strip_prefix("0x") {
        Some(hex_digits) => BigUint::parse_bytes(hex_digits.as_bytes(), 16),
        None => BigUint::parse_bytes(trimmed.as_bytes(), 10),
    }
    .ok_or_else(|| CryptoError::NonCanonical(value.to_string()))?;

    if parsed >= *MODULUS {
        return Err(CryptoError::NonCanonical(value.to_string()));
    }
    Ok(fr_from_biguint(&parsed))
}

/// `0x`-prefixed lowercase hex without leading zeros.
pub fn fr_to_hex(fr: &Fr) -> String {
    format!("0x{}", fr_to_biguint(fr).to_str_radix(16))
}

pub fn inverse(value: &Fr) -> Result<Fr, CryptoError> {
    Option::<Fr>::from(value.invert()).ok_or(CryptoError::DivisionByZero)
}

pub fn div(numerator: &Fr, denominator: &Fr) -> Result<Fr, CryptoError> {
    Ok(*numerator * inverse(denominator)?)
}

/// Serde adapters rendering scalars as decimal strings.
pub mod serde_fr {
    use super::{fr_from_decimal, fr_to_decimal};
    use halo2curves_axiom::bn256::Fr;
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(fr: &Fr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&fr_to_decimal(fr))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        fr_from_decimal(&raw).map_err(de::Error::custom)
    }

    struct Decimal<'a>(&'a Fr);

    impl Serialize for Decimal<'_> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            super::serde_fr::serialize(self.0, serializer)
        }
    }

    struct Parsed(Fr);

    impl<'de> Deserialize<'de> for Parsed {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            super::serde_fr::deserialize(deserializer).map(Parsed)
        }
    }

    /// `Vec<Fr>` as an array of decimal strings.
    pub mod seq {
        use super::*;

        pub fn serialize<S>(values: &[Fr], serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_seq(values.iter().map(Decimal))
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Fr>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let parsed = Vec::<Parsed>::deserialize(deserializer)?;
            Ok(parsed.into_iter().map(|p| p.0).collect())
        }
    }

    /// `Vec<Vec<Fr>>` as nested arrays, used for per-transaction path elements.
    pub mod nested {
        use super::*;

        struct Row<'a>(&'a [Fr]);

        impl Serialize for Row<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_seq(self.0.iter().map(Decimal))
            }
        }

        pub fn serialize<S>(rows: &[Vec<Fr>], serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_seq(rows.iter().map(|row| Row(row)))
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Vec<Fr>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let parsed = Vec::<Vec<Parsed>>::deserialize(deserializer)?;
            Ok(parsed
                .into_iter()
                .map(|row| row.into_iter().map(|p| p.0).collect())
                .collect())
        }
    }

    /// `Vec<BTreeMap<u64, Fr>>`, one sparse map per tree level.
    pub mod levels {
        use super::*;
        use std::collections::BTreeMap;

        struct Level<'a>(&'a BTreeMap<u64, Fr>);

        impl Serialize for Level<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_map(self.0.iter().map(|(index, fr)| (index, Decimal(fr))))
            }
        }

        pub fn serialize<S>(levels: &[BTreeMap<u64, Fr>], serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_seq(levels.iter().map(Level))
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<BTreeMap<u64, Fr>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let parsed = Vec::<BTreeMap<u64, Parsed>>::deserialize(deserializer)?;
            Ok(parsed
                .into_iter()
                .map(|level| level.into_iter().map(|(k, v)| (k, v.0)).collect())
                .collect())
        }
    }
}

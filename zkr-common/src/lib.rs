//! zkr-common
//!
//! Cryptographic primitives shared by the rollup operator: BN254 scalar field
//! helpers, the MiMC sponge hash, Baby Jubjub point arithmetic, key
//! derivation, ECDH, deterministic signatures and the keyed-hash cipher.

pub mod babyjub;
pub mod cipher;
pub mod eddsa;
mod error;
pub mod field;
pub mod keys;
pub mod mimc;

pub use halo2curves_axiom::bn256::Fr;

pub use babyjub::Point;
pub use cipher::{decrypt, ecdh_decrypt, ecdh_encrypt, encrypt, EncryptedMessage};
pub use eddsa::{sign, verify, Signature};
pub use error::CryptoError;
pub use field::{
    fr_from_biguint, fr_from_decimal, fr_from_u128, fr_to_biguint, fr_to_decimal, fr_to_hex,
    fr_to_u128, serde_fr,
};
pub use keys::{
    address, address_hex, derive_public_key, derive_signing_scalar, ecdh, KeyPair, PrivateKey,
};
pub use mimc::{hash, hash_left_right, multi_hash, multi_hash_with_key};

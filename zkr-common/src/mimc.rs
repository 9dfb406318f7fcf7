//! MiMC sponge over the BN254 scalar field.
//!
//! Feistel permutation with the `x^5` round function and 220 rounds. Round
//! constants follow the circomlib schedule: starting from `keccak256("mimcsponge")`
//! each constant is the next keccak-256 digest reduced mod `p`, with the first
//! and last constants fixed to zero. The sponge absorbs one element per
//! permutation into the left lane and squeezes the left lane.

use halo2curves_axiom::bn256::Fr;
use halo2curves_axiom::ff::Field;
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use sha3::{Digest, Keccak256};

use crate::field::fr_from_biguint;

pub const ROUNDS: usize = 220;
const SEED: &str = "mimcsponge";

static ROUND_CONSTANTS: Lazy<Vec<Fr>> = Lazy::new(|| {
    let mut constants = vec![Fr::ZERO; ROUNDS];
    let mut digest: [u8; 32] = Keccak256::digest(SEED.as_bytes()).into();
    for constant in constants.iter_mut().take(ROUNDS - 1).skip(1) {
        digest = Keccak256::digest(digest).into();
        *constant = fr_from_biguint(&BigUint::from_bytes_be(&digest));
    }
    constants
});

pub fn round_constants() -> &'static [Fr] {
    &ROUND_CONSTANTS
}

/// One application of the keyed Feistel permutation.
pub fn feistel(mut xl: Fr, mut xr: Fr, key: Fr) -> (Fr, Fr) {
    for (round, constant) in ROUND_CONSTANTS.iter().enumerate() {
        let t = xl + key + constant;
        let t5 = t.square().square() * t;
        if round < ROUNDS - 1 {
            let next = xr + t5;
            xr = xl;
            xl = next;
        } else {
            xr += t5;
        }
    }
    (xl, xr)
}

/// Sponge hash of `inputs` under `key`.
pub fn multi_hash_with_key(inputs: &[Fr], key: Fr) -> Fr {
    let mut left = Fr::ZERO;
    let mut capacity = Fr::ZERO;
    for input in inputs {
        left += input;
        (left, capacity) = feistel(left, capacity, key);
    }
    left
}

/// `H(inputs)`: the sponge with the zero key.
pub fn multi_hash(inputs: &[Fr]) -> Fr {
    multi_hash_with_key(inputs, Fr::ZERO)
}

pub fn hash(value: Fr) -> Fr {
    multi_hash(&[value])
}

/// Two-to-one compression used for Merkle nodes.
pub fn hash_left_right(left: Fr, right: Fr) -> Fr {
    multi_hash(&[left, right])
}

//! Deterministic Schnorr-style signatures over Baby Jubjub with MiMC challenges.

use halo2curves_axiom::bn256::Fr;
use halo2curves_axiom::ff::Field;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::babyjub::{Point, SUBGROUP_ORDER};
use crate::field::{fr_from_biguint, fr_to_biguint, serde_fr};
use crate::keys::PrivateKey;
use crate::mimc::{multi_hash, multi_hash_with_key};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(rename = "R8")]
    pub r8: Point,
    #[serde(rename = "S", with = "serde_fr")]
    pub s: Fr,
}

fn challenge(r8: &Point, pk: &Point, msg_hash: Fr) -> BigUint {
    fr_to_biguint(&multi_hash(&[r8.x, r8.y, pk.x, pk.y, msg_hash]))
}

/// Signs `msg`. The nonce is derived from the key under a separate sponge key,
/// so signing needs no randomness.
pub fn sign(sk: &PrivateKey, msg: &[Fr]) -> Signature {
    let s = sk.signing_scalar();
    let pk = Point::base8().mul_scalar(&s);
    let msg_hash = multi_hash(msg);

    let nonce_key = multi_hash_with_key(&[*sk.scalar()], Fr::ONE);
    let r = fr_to_biguint(&multi_hash(&[nonce_key, msg_hash])) % &*SUBGROUP_ORDER;
    let r8 = Point::base8().mul_scalar(&r);

    let hm = challenge(&r8, &pk, msg_hash);
    let big_s = (r + hm * s) % &*SUBGROUP_ORDER;

    Signature {
        r8,
        s: fr_from_biguint(&big_s),
    }
}

/// Checks `BASE8·S == R8 + pk·hm`. Never panics on malformed input.
pub fn verify(msg: &[Fr], signature: &Signature, pk: &Point) -> bool {
    if !signature.r8.is_on_curve() || !pk.is_on_curve() {
        return false;
    }
    let s = fr_to_biguint(&signature.s);
    if s >= *SUBGROUP_ORDER {
        return false;
    }

    let hm = challenge(&signature.r8, pk, multi_hash(msg));
    let lhs = Point::base8().mul_scalar(&s);
    let rhs = signature.r8 + pk.mul_scalar(&hm);
    lhs == rhs
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn key(seed: u8) -> PrivateKey {
        PrivateKey::random_with(&mut ChaCha20Rng::from_seed([seed; 32])).unwrap()
    }

    fn message() -> Vec<Fr> {
        vec![Fr::from(0), Fr::from(1), Fr::from(500), Fr::from(2), Fr::from(1)]
    }

    #[test]
    fn signing_is_deterministic() {
        let sk = key(3);
        assert_eq!(sign(&sk, &message()), sign(&sk, &message()));
    }

    #[test]
    fn signature_rejects_substituted_public_key() {
        let sk = key(3);
        let signature = sign(&sk, &message());
        assert!(verify(&message(), &signature, &sk.public_key()));
        assert!(!verify(&message(), &signature, &key(4).public_key()));
    }

    #[test]
    fn signature_rejects_modified_message() {
        let sk = key(5);
        let signature = sign(&sk, &message());
        let mut tampered = message();
        tampered[2] = Fr::from(501);
        assert!(!verify(&tampered, &signature, &sk.public_key()));
    }

    #[test]
    fn verify_returns_false_for_malformed_signatures() {
        let sk = key(6);
        let pk = sk.public_key();
        let mut signature = sign(&sk, &message());

        let mut off_curve = signature.clone();
        off_curve.r8 = Point::new(Fr::from(1), Fr::from(2));
        assert!(!verify(&message(), &off_curve, &pk));

        signature.s = fr_from_biguint(&SUBGROUP_ORDER);
        assert!(!verify(&message(), &signature, &pk));

        let bogus_pk = Point::new(Fr::from(5), Fr::from(5));
        assert!(!verify(&message(), &sign(&sk, &message()), &bogus_pk));
    }

    #[test]
    fn signature_round_trips_through_json() {
        let signature = sign(&key(8), &message());
        let json = serde_json::to_value(&signature).unwrap();
        assert!(json["R8"].is_array());
        assert!(json["S"].is_string());
        let decoded: Signature = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, signature);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn signatures_verify_under_the_signer_key(
            seed in any::<[u8; 32]>(),
            msg in prop::collection::vec(any::<u64>(), 0..6),
        ) {
            let sk = PrivateKey::random_with(&mut ChaCha20Rng::from_seed(seed)).unwrap();
            let msg: Vec<Fr> = msg.into_iter().map(Fr::from).collect();
            let signature = sign(&sk, &msg);
            prop_assert!(verify(&msg, &signature, &sk.public_key()));
        }
    }
}

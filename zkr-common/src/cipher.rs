//! Keyed-hash stream cipher over field elements.
//!
//! Confidentiality only: there is no authentication tag.

use halo2curves_axiom::bn256::Fr;
use serde::{Deserialize, Serialize};

use crate::babyjub::Point;
use crate::field::serde_fr;
use crate::keys::{ecdh, PrivateKey};
use crate::mimc::multi_hash;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    #[serde(with = "serde_fr")]
    pub iv: Fr,
    #[serde(rename = "msg", with = "serde_fr::seq")]
    pub data: Vec<Fr>,
}

fn keystream(key: Fr, iv: Fr, position: usize) -> Fr {
    multi_hash(&[key, iv + Fr::from(position as u64)])
}

pub fn encrypt(msg: &[Fr], key: Fr) -> EncryptedMessage {
    let iv = multi_hash(msg);
    let data = msg
        .iter()
        .enumerate()
        .map(|(i, m)| *m + keystream(key, iv, i))
        .collect();
    EncryptedMessage { iv, data }
}

pub fn decrypt(ciphertext: &EncryptedMessage, key: Fr) -> Vec<Fr> {
    ciphertext
        .data
        .iter()
        .enumerate()
        .map(|(i, c)| *c - keystream(key, ciphertext.iv, i))
        .collect()
}

/// Encrypts for `recipient` with the ECDH secret of `sender` and `recipient`.
pub fn ecdh_encrypt(msg: &[Fr], sender: &PrivateKey, recipient: &Point) -> EncryptedMessage {
    encrypt(msg, ecdh(sender, recipient))
}

pub fn ecdh_decrypt(ciphertext: &EncryptedMessage, recipient: &PrivateKey, sender: &Point) -> Vec<Fr> {
    decrypt(ciphertext, ecdh(recipient, sender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn ciphertext_has_plaintext_length() {
        let msg = vec![Fr::from(1), Fr::from(2), Fr::from(3)];
        let ct = encrypt(&msg, Fr::from(77));
        assert_eq!(ct.data.len(), msg.len());
        assert_ne!(ct.data, msg);
    }

    #[test]
    fn wrong_key_does_not_decrypt() {
        let msg = vec![Fr::from(10), Fr::from(20)];
        let ct = encrypt(&msg, Fr::from(1));
        assert_ne!(decrypt(&ct, Fr::from(2)), msg);
    }

    #[test]
    fn ecdh_parties_share_plaintext() {
        let alice = PrivateKey::random_with(&mut ChaCha20Rng::from_seed([1; 32])).unwrap();
        let bob = PrivateKey::random_with(&mut ChaCha20Rng::from_seed([2; 32])).unwrap();
        let msg = vec![Fr::from(42), Fr::from(43)];

        let ct = ecdh_encrypt(&msg, &alice, &bob.public_key());
        assert_eq!(ecdh_decrypt(&ct, &bob, &alice.public_key()), msg);
    }

    proptest! {
        #[test]
        fn decrypt_inverts_encrypt(msg in prop::collection::vec(any::<u64>(), 0..8), key in any::<u64>()) {
            let msg: Vec<Fr> = msg.into_iter().map(Fr::from).collect();
            let key = Fr::from(key);
            prop_assert_eq!(decrypt(&encrypt(&msg, key), key), msg);
        }
    }
}

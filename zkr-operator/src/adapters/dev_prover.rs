//! Development prover.
//!
//! Checks every constraint of the batch and withdraw circuits natively and
//! emits a proof whose points are a MiMC digest of the public inputs keyed by
//! the circuit. Nothing here is zero-knowledge; it lets the operator run end
//! to end without a trusted setup.

use async_trait::async_trait;
use halo2curves_axiom::bn256::Fr;
use zkr_common::{
    fr_from_u128, fr_to_biguint, fr_to_decimal, fr_to_u128, multi_hash, multi_hash_with_key,
    verify, Point, Signature,
};
use zkr_merkle::{MerklePath, MimcSponge};

use crate::ports::{Circuit, Prover, ProverError, SolidityProof};
use crate::witness::{decode_batch_inputs, BatchWitness, WithdrawWitness};

#[derive(Clone, Debug, Default)]
pub struct DevProver;

impl DevProver {
    pub fn new() -> Self {
        Self
    }

    fn digest(circuit: Circuit, inputs: &[Fr]) -> Fr {
        let tag = match circuit {
            Circuit::Batch => Fr::from(1),
            Circuit::Withdraw => Fr::from(2),
        };
        multi_hash_with_key(inputs, tag)
    }

    fn seal(circuit: Circuit, inputs: Vec<Fr>) -> SolidityProof {
        let digest = fr_to_decimal(&Self::digest(circuit, &inputs));
        SolidityProof {
            a: [digest.clone(), "1".to_string()],
            b: [
                ["0".to_string(), "1".to_string()],
                ["1".to_string(), "0".to_string()],
            ],
            c: [digest, "2".to_string()],
            inputs,
        }
    }
}

fn invalid(message: impl Into<String>) -> ProverError {
    ProverError::InvalidWitness(message.into())
}

fn path_for(index: u64, siblings: &[Fr]) -> MerklePath {
    MerklePath {
        siblings: siblings.to_vec(),
        indices: (0..siblings.len())
            .map(|level| ((index >> level) & 1) as u8)
            .collect(),
    }
}

fn small(value: &Fr, what: &str) -> Result<u64, ProverError> {
    fr_to_u128(value)
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| invalid(format!("{what} is out of range")))
}

fn amount(value: &Fr, what: &str) -> Result<u128, ProverError> {
    fr_to_u128(value).ok_or_else(|| invalid(format!("{what} is out of range")))
}

fn leaf_hash(pk: &[Fr], balance: u128, nonce: u64) -> Fr {
    multi_hash(&[pk[0], pk[1], fr_from_u128(balance), Fr::from(nonce)])
}

/// Checks one batch witness the way the batch circuit constrains it.
pub fn check_batch_witness(witness: &BatchWitness) -> Result<(), ProverError> {
    let n = witness.tx_count();
    let lengths = [
        witness.balance_tree_root.len(),
        witness.tx_sender_public_key.len(),
        witness.tx_sender_balance.len(),
        witness.tx_sender_nonce.len(),
        witness.tx_sender_path_elements.len(),
        witness.tx_recipient_public_key.len(),
        witness.tx_recipient_balance.len(),
        witness.tx_recipient_nonce.len(),
        witness.tx_recipient_path_elements.len(),
        witness.intermediate_balance_tree_root.len(),
        witness.intermediate_balance_tree_path_elements.len(),
    ];
    if n == 0 {
        return Err(invalid("batch has no transactions"));
    }
    if lengths.iter().any(|len| *len != n) {
        return Err(invalid("witness arrays differ in length"));
    }

    for i in 0..n {
        let data = &witness.tx_data[i];
        let sender_pk = &witness.tx_sender_public_key[i];
        let recipient_pk = &witness.tx_recipient_public_key[i];
        if data.len() != 8 || sender_pk.len() != 2 || recipient_pk.len() != 2 {
            return Err(invalid(format!("tx {i}: malformed transaction data")));
        }

        let from = small(&data[0], "sender index")?;
        let to = small(&data[1], "recipient index")?;
        let value = amount(&data[2], "amount")?;
        let fee = amount(&data[3], "fee")?;
        let nonce = small(&data[4], "nonce")?;
        let sender_balance = amount(&witness.tx_sender_balance[i], "sender balance")?;
        let sender_nonce = small(&witness.tx_sender_nonce[i], "sender nonce")?;
        let recipient_balance = amount(&witness.tx_recipient_balance[i], "recipient balance")?;
        let recipient_nonce = small(&witness.tx_recipient_nonce[i], "recipient nonce")?;

        let pre_root = witness.balance_tree_root[i];
        let sender_path = path_for(from, &witness.tx_sender_path_elements[i]);
        let recipient_path = path_for(to, &witness.tx_recipient_path_elements[i]);
        let sender_leaf = leaf_hash(sender_pk, sender_balance, sender_nonce);
        let recipient_leaf = leaf_hash(recipient_pk, recipient_balance, recipient_nonce);

        if sender_path.compute_root::<MimcSponge>(sender_leaf) != pre_root {
            return Err(invalid(format!("tx {i}: sender is not in the balance tree")));
        }
        if recipient_path.compute_root::<MimcSponge>(recipient_leaf) != pre_root {
            return Err(invalid(format!("tx {i}: recipient is not in the balance tree")));
        }

        let signature = Signature {
            r8: Point::new(data[5], data[6]),
            s: data[7],
        };
        let sender_point = Point::new(sender_pk[0], sender_pk[1]);
        if !verify(&data[..5], &signature, &sender_point) {
            return Err(invalid(format!("tx {i}: signature does not verify")));
        }
        let next_nonce = sender_nonce
            .checked_add(1)
            .filter(|next| *next == nonce)
            .ok_or_else(|| invalid(format!("tx {i}: nonce does not follow the sender's")))?;

        let debited = value
            .checked_add(fee)
            .and_then(|total| sender_balance.checked_sub(total))
            .ok_or_else(|| invalid(format!("tx {i}: sender cannot cover amount and fee")))?;
        let debited_leaf = leaf_hash(sender_pk, debited, next_nonce);
        let intermediate_root = witness.intermediate_balance_tree_root[i];
        if sender_path.compute_root::<MimcSponge>(debited_leaf) != intermediate_root {
            return Err(invalid(format!("tx {i}: intermediate root does not match the debit")));
        }

        let (recipient_pk, base_balance, base_nonce) = if from == to {
            (sender_pk, debited, next_nonce)
        } else {
            (recipient_pk, recipient_balance, recipient_nonce)
        };
        let intermediate_path = path_for(to, &witness.intermediate_balance_tree_path_elements[i]);
        let base_leaf = leaf_hash(recipient_pk, base_balance, base_nonce);
        if intermediate_path.compute_root::<MimcSponge>(base_leaf) != intermediate_root {
            return Err(invalid(format!("tx {i}: recipient is not in the intermediate tree")));
        }

        let credited = base_balance
            .checked_add(value)
            .ok_or_else(|| invalid(format!("tx {i}: recipient balance overflows")))?;
        let next_root = witness
            .balance_tree_root
            .get(i + 1)
            .copied()
            .unwrap_or(witness.final_balance_tree_root);
        let credited_leaf = leaf_hash(recipient_pk, credited, base_nonce);
        if intermediate_path.compute_root::<MimcSponge>(credited_leaf) != next_root {
            return Err(invalid(format!("tx {i}: resulting root does not match the credit")));
        }
    }
    Ok(())
}

/// Checks that the withdraw key derives the claimed public key.
pub fn check_withdraw_witness(witness: &WithdrawWitness) -> Result<(), ProverError> {
    let derived = Point::base8().mul_scalar(&fr_to_biguint(&witness.private_key));
    if derived != witness.public_key {
        return Err(invalid("private key does not derive the public key"));
    }
    Ok(())
}

#[async_trait]
impl Prover for DevProver {
    async fn prove_batch(&self, witness: &BatchWitness) -> Result<SolidityProof, ProverError> {
        check_batch_witness(witness)?;
        Ok(Self::seal(Circuit::Batch, witness.public_inputs()))
    }

    async fn prove_withdraw(
        &self,
        witness: &WithdrawWitness,
    ) -> Result<SolidityProof, ProverError> {
        check_withdraw_witness(witness)?;
        Ok(Self::seal(Circuit::Withdraw, witness.public_inputs()))
    }

    async fn verify(&self, circuit: Circuit, proof: &SolidityProof) -> Result<bool, ProverError> {
        let well_formed = match circuit {
            Circuit::Batch => decode_batch_inputs(&proof.inputs).is_some(),
            Circuit::Withdraw => proof.inputs.len() == 3,
        };
        if !well_formed {
            return Ok(false);
        }
        let expected = Self::seal(circuit, proof.inputs.clone());
        Ok(expected.a == proof.a && expected.b == proof.b && expected.c == proof.c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ether, milliether, BalanceLeaf, BalanceTree, Transaction};
    use crate::pipeline::fold_batch;
    use crate::validator::Validator;
    use halo2curves_axiom::ff::Field;
    use zkr_common::PrivateKey;

    fn sk(seed: u64) -> PrivateKey {
        PrivateKey::from_scalar(Fr::from(seed))
    }

    fn folded() -> BatchWitness {
        let mut tree = BalanceTree::new(3, Fr::ZERO).unwrap();
        tree.insert_leaf(BalanceLeaf::new(sk(1).public_key(), ether(1), 0))
            .unwrap();
        tree.insert_leaf(BalanceLeaf::new(sk(2).public_key(), ether(1), 0))
            .unwrap();
        let txs = vec![
            Transaction::new(0, 1, milliether(100), milliether(1), 1).signed(&sk(1)),
            Transaction::new(1, 1, milliether(50), milliether(1), 1).signed(&sk(2)),
            Transaction::new(1, 0, milliether(20), milliether(1), 2).signed(&sk(2)),
        ];
        fold_batch(&tree, &txs, &Validator::default())
            .unwrap()
            .witness
    }

    #[tokio::test]
    async fn folded_batch_proves_and_verifies() {
        let prover = DevProver::new();
        let witness = folded();
        let proof = prover.prove_batch(&witness).await.unwrap();
        assert_eq!(proof.inputs, witness.public_inputs());
        assert!(prover.verify(Circuit::Batch, &proof).await.unwrap());
        assert!(!prover.verify(Circuit::Withdraw, &proof).await.unwrap());
    }

    #[tokio::test]
    async fn tampered_public_inputs_fail_verification() {
        let prover = DevProver::new();
        let mut proof = prover.prove_batch(&folded()).await.unwrap();
        proof.inputs[1] += Fr::ONE;
        assert!(!prover.verify(Circuit::Batch, &proof).await.unwrap());
    }

    #[tokio::test]
    async fn inconsistent_witness_is_refused() {
        let mut witness = folded();
        witness.tx_sender_balance[0] += Fr::ONE;
        assert!(matches!(
            DevProver::new().prove_batch(&witness).await,
            Err(ProverError::InvalidWitness(_))
        ));

        let mut witness = folded();
        witness.final_balance_tree_root = Fr::from(9);
        assert!(DevProver::new().prove_batch(&witness).await.is_err());
    }

    #[tokio::test]
    async fn withdraw_requires_the_matching_key() {
        let prover = DevProver::new();
        let witness = WithdrawWitness::new(&sk(7), Fr::from(123));
        let proof = prover.prove_withdraw(&witness).await.unwrap();
        assert!(prover.verify(Circuit::Withdraw, &proof).await.unwrap());

        let forged = WithdrawWitness {
            public_key: sk(8).public_key(),
            ..witness
        };
        assert!(prover.prove_withdraw(&forged).await.is_err());
    }
}

//! Circuit inputs for rollup batches and withdrawals.
//!
//! Field names follow the circuit input signals, so a witness serializes
//! directly into the `input.json` a proving engine consumes.

use halo2curves_axiom::bn256::Fr;
use serde::{Deserialize, Serialize};
use zkr_common::{fr_from_biguint, fr_to_u128, serde_fr, Point, PrivateKey};

use crate::models::Transaction;

/// Fields per transfer in the batch public inputs.
pub const TRANSFER_PUBLIC_FIELDS: usize = 5;

/// Per-transaction pre-state, intermediate state and paths for one batch.
///
/// Every vector is indexed by the transaction's position in the batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchWitness {
    #[serde(with = "serde_fr::seq")]
    pub balance_tree_root: Vec<Fr>,
    /// `[from, to, amount, fee, nonce, R8.x, R8.y, S]` per transaction.
    #[serde(with = "serde_fr::nested")]
    pub tx_data: Vec<Vec<Fr>>,

    #[serde(with = "serde_fr::nested")]
    pub tx_sender_public_key: Vec<Vec<Fr>>,
    #[serde(with = "serde_fr::seq")]
    pub tx_sender_balance: Vec<Fr>,
    #[serde(with = "serde_fr::seq")]
    pub tx_sender_nonce: Vec<Fr>,
    #[serde(with = "serde_fr::nested")]
    pub tx_sender_path_elements: Vec<Vec<Fr>>,

    #[serde(with = "serde_fr::nested")]
    pub tx_recipient_public_key: Vec<Vec<Fr>>,
    #[serde(with = "serde_fr::seq")]
    pub tx_recipient_balance: Vec<Fr>,
    #[serde(with = "serde_fr::seq")]
    pub tx_recipient_nonce: Vec<Fr>,
    #[serde(with = "serde_fr::nested")]
    pub tx_recipient_path_elements: Vec<Vec<Fr>>,

    #[serde(with = "serde_fr::seq")]
    pub intermediate_balance_tree_root: Vec<Fr>,
    #[serde(with = "serde_fr::nested")]
    pub intermediate_balance_tree_path_elements: Vec<Vec<Fr>>,

    #[serde(with = "serde_fr")]
    pub final_balance_tree_root: Fr,
}

impl BatchWitness {
    pub fn tx_count(&self) -> usize {
        self.tx_data.len()
    }

    pub fn initial_root(&self) -> Fr {
        self.balance_tree_root
            .first()
            .copied()
            .unwrap_or(self.final_balance_tree_root)
    }

    /// `[initialRoot, finalRoot, txCount, (from, to, amount, fee, nonce)*]`
    pub fn public_inputs(&self) -> Vec<Fr> {
        let mut inputs = Vec::with_capacity(3 + self.tx_count() * TRANSFER_PUBLIC_FIELDS);
        inputs.push(self.initial_root());
        inputs.push(self.final_balance_tree_root);
        inputs.push(Fr::from(self.tx_count() as u64));
        for data in &self.tx_data {
            inputs.extend(data.iter().take(TRANSFER_PUBLIC_FIELDS));
        }
        inputs
    }
}

/// The public part of a batch proof, decoded back into transfers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchPublicInputs {
    pub initial_root: Fr,
    pub final_root: Fr,
    pub transfers: Vec<Transaction>,
}

/// Inverse of [`BatchWitness::public_inputs`]. `None` when the layout is off.
pub fn decode_batch_inputs(inputs: &[Fr]) -> Option<BatchPublicInputs> {
    if inputs.len() < 3 {
        return None;
    }
    let (header, body) = inputs.split_at(3);
    let count = usize::try_from(fr_to_u128(&header[2])?).ok()?;
    if body.len() != count.checked_mul(TRANSFER_PUBLIC_FIELDS)? {
        return None;
    }

    let small = |value: &Fr| -> Option<u64> { u64::try_from(fr_to_u128(value)?).ok() };
    let transfers = body
        .chunks_exact(TRANSFER_PUBLIC_FIELDS)
        .map(|chunk| {
            Some(Transaction::new(
                small(&chunk[0])?,
                small(&chunk[1])?,
                fr_to_u128(&chunk[2])?,
                fr_to_u128(&chunk[3])?,
                small(&chunk[4])?,
            ))
        })
        .collect::<Option<Vec<_>>>()?;

    Some(BatchPublicInputs {
        initial_root: header[0],
        final_root: header[1],
        transfers,
    })
}

/// Proves knowledge of the key behind `public_key` and binds a nullifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawWitness {
    /// Signing scalar of the account key.
    #[serde(with = "serde_fr")]
    pub private_key: Fr,
    #[serde(with = "serde_fr")]
    pub nullifier: Fr,
    pub public_key: Point,
}

impl WithdrawWitness {
    pub fn new(sk: &PrivateKey, nullifier: Fr) -> Self {
        Self {
            private_key: fr_from_biguint(&sk.signing_scalar()),
            nullifier,
            public_key: sk.public_key(),
        }
    }

    /// `[pk.x, pk.y, nullifier]`
    pub fn public_inputs(&self) -> Vec<Fr> {
        vec![self.public_key.x, self.public_key.y, self.nullifier]
    }
}

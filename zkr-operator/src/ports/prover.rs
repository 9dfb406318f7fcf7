use async_trait::async_trait;
use halo2curves_axiom::bn256::Fr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zkr_common::serde_fr;

use crate::witness::{BatchWitness, WithdrawWitness};

/// Errors that can occur during proof generation or verification.
#[derive(Debug, Error)]
pub enum ProverError {
    /// The witness does not satisfy the circuit.
    #[error("invalid witness: {0}")]
    InvalidWitness(String),

    #[error("proof generation failed: {0}")]
    Generation(String),

    #[error("prover timed out after {0}s")]
    Timeout(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The two circuits the operator proves against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Circuit {
    Batch,
    Withdraw,
}

impl Circuit {
    pub fn name(&self) -> &'static str {
        match self {
            Circuit::Batch => "batch",
            Circuit::Withdraw => "withdraw",
        }
    }
}

/// Groth16 proof shaped for a Solidity verifier.
///
/// Coordinates are base-field elements, kept as decimal strings; `b` is in
/// the verifier's `[[x1, x0], [y1, y0]]` order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolidityProof {
    pub a: [String; 2],
    pub b: [[String; 2]; 2],
    pub c: [String; 2],
    #[serde(with = "serde_fr::seq")]
    pub inputs: Vec<Fr>,
}

/// Proof generation and local verification.
#[async_trait]
pub trait Prover: Send + Sync {
    async fn prove_batch(&self, witness: &BatchWitness) -> Result<SolidityProof, ProverError>;

    async fn prove_withdraw(
        &self,
        witness: &WithdrawWitness,
    ) -> Result<SolidityProof, ProverError>;

    /// Checks `proof` against its own public inputs.
    async fn verify(&self, circuit: Circuit, proof: &SolidityProof) -> Result<bool, ProverError>;
}

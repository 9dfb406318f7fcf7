//! Groth16 proving through the `snarkjs` CLI.
//!
//! Each circuit lives in its own directory under `circuits_dir`:
//!
//! ```text
//! <circuits_dir>/<circuit>/circuit.wasm
//! <circuits_dir>/<circuit>/circuit_final.zkey
//! <circuits_dir>/<circuit>/verification_key.json
//! ```
//!
//! Proving writes `input.json` to a scratch directory, runs
//! `snarkjs groth16 fullprove`, and reads back `proof.json`/`public.json`.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use halo2curves_axiom::bn256::Fr;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};
use zkr_common::{fr_from_decimal, fr_to_decimal, serde_fr};

use crate::ports::{Circuit, Prover, ProverError, SolidityProof};
use crate::witness::{BatchWitness, WithdrawWitness};

const WASM: &str = "circuit.wasm";
const ZKEY: &str = "circuit_final.zkey";
const VERIFICATION_KEY: &str = "verification_key.json";

/// `proof.json` as written by snarkjs.
#[derive(Debug, Serialize, Deserialize)]
struct SnarkjsProof {
    pi_a: Vec<String>,
    pi_b: Vec<Vec<String>>,
    pi_c: Vec<String>,
    #[serde(default = "groth16")]
    protocol: String,
    #[serde(default = "bn128")]
    curve: String,
}

fn groth16() -> String {
    "groth16".to_string()
}

fn bn128() -> String {
    "bn128".to_string()
}

/// The withdraw circuit takes only the key and the nullifier; the public key
/// is an output.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawInput {
    #[serde(with = "serde_fr")]
    private_key: Fr,
    #[serde(with = "serde_fr")]
    nullifier: Fr,
}

fn coordinate(values: &[String], index: usize, what: &str) -> Result<String, ProverError> {
    values
        .get(index)
        .cloned()
        .ok_or_else(|| ProverError::Generation(format!("{what} is missing coordinate {index}")))
}

impl SnarkjsProof {
    /// Reorders into the Solidity verifier layout; `b` swaps each pair.
    fn into_solidity(self, inputs: Vec<Fr>) -> Result<SolidityProof, ProverError> {
        let b0 = self
            .pi_b
            .first()
            .ok_or_else(|| ProverError::Generation("pi_b is empty".into()))?;
        let b1 = self
            .pi_b
            .get(1)
            .ok_or_else(|| ProverError::Generation("pi_b has one row".into()))?;
        Ok(SolidityProof {
            a: [
                coordinate(&self.pi_a, 0, "pi_a")?,
                coordinate(&self.pi_a, 1, "pi_a")?,
            ],
            b: [
                [coordinate(b0, 1, "pi_b")?, coordinate(b0, 0, "pi_b")?],
                [coordinate(b1, 1, "pi_b")?, coordinate(b1, 0, "pi_b")?],
            ],
            c: [
                coordinate(&self.pi_c, 0, "pi_c")?,
                coordinate(&self.pi_c, 1, "pi_c")?,
            ],
            inputs,
        })
    }

    fn from_solidity(proof: &SolidityProof) -> Self {
        let one = "1".to_string();
        Self {
            pi_a: vec![proof.a[0].clone(), proof.a[1].clone(), one.clone()],
            pi_b: vec![
                vec![proof.b[0][1].clone(), proof.b[0][0].clone()],
                vec![proof.b[1][1].clone(), proof.b[1][0].clone()],
                vec![one.clone(), "0".to_string()],
            ],
            pi_c: vec![proof.c[0].clone(), proof.c[1].clone(), one],
            protocol: groth16(),
            curve: bn128(),
        }
    }
}

fn parse_public(raw: &[u8]) -> Result<Vec<Fr>, ProverError> {
    let values: Vec<String> = serde_json::from_slice(raw)?;
    values
        .iter()
        .map(|value| {
            fr_from_decimal(value)
                .map_err(|err| ProverError::Generation(format!("public signal: {err}")))
        })
        .collect()
}

pub struct SnarkjsProver {
    circuits_dir: PathBuf,
    snarkjs_bin: String,
    timeout: Duration,
}

impl SnarkjsProver {
    pub fn new(circuits_dir: impl Into<PathBuf>, snarkjs_bin: impl Into<String>) -> Self {
        Self {
            circuits_dir: circuits_dir.into(),
            snarkjs_bin: snarkjs_bin.into(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn circuit_dir(&self, circuit: Circuit) -> Result<PathBuf, ProverError> {
        let name = match circuit {
            Circuit::Batch => "tx",
            Circuit::Withdraw => "withdraw",
        };
        let dir = self.circuits_dir.join(name);
        if !dir.is_dir() {
            return Err(ProverError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("circuit directory not found: {}", dir.display()),
            )));
        }
        Ok(dir)
    }

    async fn snarkjs(&self, args: &[&Path], command: &[&str]) -> Result<Output, ProverError> {
        let mut cmd = Command::new(&self.snarkjs_bin);
        cmd.args(command).args(args).kill_on_drop(true);
        debug!(bin = %self.snarkjs_bin, ?command, "running snarkjs");

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(ProverError::Timeout(self.timeout.as_secs())),
        }
    }

    async fn prove<I: Serialize>(
        &self,
        circuit: Circuit,
        input: &I,
    ) -> Result<SolidityProof, ProverError> {
        let dir = self.circuit_dir(circuit)?;
        let scratch = tempfile::tempdir()?;
        let input_path = scratch.path().join("input.json");
        let proof_path = scratch.path().join("proof.json");
        let public_path = scratch.path().join("public.json");
        tokio::fs::write(&input_path, serde_json::to_vec(input)?).await?;

        let output = self
            .snarkjs(
                &[
                    &input_path,
                    &dir.join(WASM),
                    &dir.join(ZKEY),
                    &proof_path,
                    &public_path,
                ],
                &["groth16", "fullprove"],
            )
            .await?;
        if !output.status.success() {
            return Err(ProverError::Generation(format!(
                "snarkjs fullprove failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let proof: SnarkjsProof = serde_json::from_slice(&tokio::fs::read(&proof_path).await?)?;
        let inputs = parse_public(&tokio::fs::read(&public_path).await?)?;
        info!(circuit = circuit.name(), inputs = inputs.len(), "generated groth16 proof");
        proof.into_solidity(inputs)
    }
}

#[async_trait]
impl Prover for SnarkjsProver {
    async fn prove_batch(&self, witness: &BatchWitness) -> Result<SolidityProof, ProverError> {
        if witness.tx_count() == 0 {
            return Err(ProverError::InvalidWitness("batch has no transactions".into()));
        }
        self.prove(Circuit::Batch, witness).await
    }

    async fn prove_withdraw(
        &self,
        witness: &WithdrawWitness,
    ) -> Result<SolidityProof, ProverError> {
        let input = WithdrawInput {
            private_key: witness.private_key,
            nullifier: witness.nullifier,
        };
        self.prove(Circuit::Withdraw, &input).await
    }

    async fn verify(&self, circuit: Circuit, proof: &SolidityProof) -> Result<bool, ProverError> {
        let dir = self.circuit_dir(circuit)?;
        let scratch = tempfile::tempdir()?;
        let proof_path = scratch.path().join("proof.json");
        let public_path = scratch.path().join("public.json");

        let public: Vec<String> = proof.inputs.iter().map(fr_to_decimal).collect();
        tokio::fs::write(&proof_path, serde_json::to_vec(&SnarkjsProof::from_solidity(proof))?)
            .await?;
        tokio::fs::write(&public_path, serde_json::to_vec(&public)?).await?;

        let output = self
            .snarkjs(
                &[&dir.join(VERIFICATION_KEY), &public_path, &proof_path],
                &["groth16", "verify"],
            )
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(output.status.success() && stdout.contains("OK"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_proof_json() -> &'static str {
        r#"{
            "pi_a": ["1", "2", "1"],
            "pi_b": [["3", "4"], ["5", "6"], ["1", "0"]],
            "pi_c": ["7", "8", "1"],
            "protocol": "groth16",
            "curve": "bn128"
        }"#
    }

    #[test]
    fn snarkjs_proof_converts_to_solidity_order() {
        let proof: SnarkjsProof = serde_json::from_str(sample_proof_json()).unwrap();
        let solidity = proof.into_solidity(vec![Fr::from(9)]).unwrap();
        assert_eq!(solidity.a, ["1".to_string(), "2".to_string()]);
        assert_eq!(
            solidity.b,
            [
                ["4".to_string(), "3".to_string()],
                ["6".to_string(), "5".to_string()]
            ]
        );
        assert_eq!(solidity.c, ["7".to_string(), "8".to_string()]);

        let back = SnarkjsProof::from_solidity(&solidity);
        assert_eq!(back.pi_b[0], vec!["3".to_string(), "4".to_string()]);
        assert_eq!(back.pi_a[2], "1");
    }

    #[test]
    fn truncated_proof_is_reported() {
        let proof: SnarkjsProof =
            serde_json::from_str(r#"{"pi_a": ["1"], "pi_b": [], "pi_c": []}"#).unwrap();
        assert!(matches!(
            proof.into_solidity(vec![]),
            Err(ProverError::Generation(_))
        ));
    }

    #[test]
    fn public_signals_parse_as_field_elements() {
        let inputs = parse_public(br#"["1", "21888242871839275222246405745257275088548364400416034343698204186575808495616"]"#).unwrap();
        assert_eq!(inputs[0], Fr::from(1));
        assert_eq!(inputs[1], -Fr::from(1));
        assert!(parse_public(br#"["not a number"]"#).is_err());
    }

    #[test]
    fn withdraw_input_only_carries_private_signals() {
        let input = WithdrawInput {
            private_key: Fr::from(5),
            nullifier: Fr::from(6),
        };
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json, serde_json::json!({"privateKey": "5", "nullifier": "6"}));
    }

    #[tokio::test]
    async fn missing_circuit_directory_is_an_io_error() {
        let scratch = tempfile::tempdir().unwrap();
        let prover = SnarkjsProver::new(scratch.path(), "snarkjs");
        let witness = WithdrawWitness::new(
            &zkr_common::PrivateKey::from_scalar(Fr::from(1)),
            Fr::from(2),
        );
        assert!(matches!(
            prover.prove_withdraw(&witness).await,
            Err(ProverError::Io(_))
        ));
    }
}

use async_trait::async_trait;
use halo2curves_axiom::bn256::Fr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zkr_common::Point;

use crate::models::{serde_wei, BalanceLeaf, Wei};
use crate::ports::prover::SolidityProof;

/// Errors from the ledger collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Transport or node failure; the call may be retried.
    #[error("ledger rpc error: {0}")]
    Rpc(String),

    #[error("proof rejected by ledger: {0}")]
    ProofRejected(String),

    #[error("nullifier already used")]
    NullifierReused,

    #[error("ledger transaction reverted: {0}")]
    Reverted(String),

    #[error("public key is not registered")]
    UnknownAccount,
}

/// Account record as held by the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub leaf_index: u64,
    pub public_key: Point,
    #[serde(with = "serde_wei")]
    pub balance: Wei,
    pub nonce: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEventKind {
    Deposit,
    Withdraw,
}

/// A `Deposit` or `Withdraw` notification, in ledger emission order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    pub kind: LedgerEventKind,
    pub leaf_index: u64,
    pub public_key: Point,
    #[serde(with = "serde_wei")]
    pub balance: Wei,
    pub nonce: u64,
}

impl LedgerEvent {
    pub fn leaf(&self) -> BalanceLeaf {
        BalanceLeaf::new(self.public_key, self.balance, self.nonce)
    }
}

/// Receipt for a state-changing ledger call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub tx_hash: String,
    #[serde(default)]
    pub block_number: Option<u64>,
}

/// The rollup contract as seen by the operator.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Credits `value` to the account for `public_key`, registering it on
    /// first use.
    async fn deposit(&self, public_key: Point, value: Wei) -> Result<LedgerReceipt, LedgerError>;

    async fn withdraw(
        &self,
        amount: Wei,
        proof: &SolidityProof,
    ) -> Result<LedgerReceipt, LedgerError>;

    async fn withdraw_all(&self, proof: &SolidityProof) -> Result<LedgerReceipt, LedgerError>;

    /// Applies a proven batch.
    async fn roll_up(&self, proof: &SolidityProof) -> Result<LedgerReceipt, LedgerError>;

    /// Looks an account up by `H([pk.x, pk.y])`.
    async fn user_data(&self, pubkey_hash: Fr) -> Result<UserData, LedgerError>;

    async fn is_public_key_registered(&self, public_key: Point) -> Result<bool, LedgerError>;

    async fn accrued_fees(&self) -> Result<Wei, LedgerError>;
}

//! Withdrawals from the rollup back to the ledger.

use std::sync::Arc;

use halo2curves_axiom::bn256::Fr;
use halo2curves_axiom::ff::Field;
use rand::rngs::OsRng;
use tracing::info;
use zkr_common::PrivateKey;

use crate::error::{OperatorError, ValidationError};
use crate::models::Wei;
use crate::ports::{Circuit, Ledger, LedgerReceipt, Prover};
use crate::state::TreeState;
use crate::witness::WithdrawWitness;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithdrawRequest {
    pub leaf_index: u64,
    /// `None` withdraws the whole balance.
    pub amount: Option<Wei>,
    pub nullifier: Fr,
}

impl WithdrawRequest {
    /// A request with a fresh random nullifier.
    pub fn new(leaf_index: u64, amount: Option<Wei>) -> Self {
        Self {
            leaf_index,
            amount,
            nullifier: Fr::random(OsRng),
        }
    }

    pub fn with_nullifier(mut self, nullifier: Fr) -> Self {
        self.nullifier = nullifier;
        self
    }
}

#[derive(Clone)]
pub struct WithdrawService {
    state: Arc<TreeState>,
    prover: Arc<dyn Prover>,
    ledger: Arc<dyn Ledger>,
}

impl WithdrawService {
    pub fn new(state: Arc<TreeState>, prover: Arc<dyn Prover>, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            state,
            prover,
            ledger,
        }
    }

    /// Checks the account, proves key ownership and submits the withdrawal.
    ///
    /// The balance check runs before any proof is generated. The tree itself
    /// changes only when the ledger's `Withdraw` event is reconciled.
    pub async fn withdraw(
        &self,
        sk: &PrivateKey,
        request: &WithdrawRequest,
    ) -> Result<LedgerReceipt, OperatorError> {
        self.state.ensure_synced().await?;

        let index = request.leaf_index;
        let leaf = self
            .state
            .read(|tree| tree.leaf_raw(index).cloned())
            .await
            .ok_or(ValidationError::UnknownAccount { index })?;
        if leaf.public_key != sk.public_key() {
            return Err(ValidationError::InvalidSignature.into());
        }
        if let Some(amount) = request.amount {
            if amount > leaf.balance {
                return Err(ValidationError::InsufficientFunds {
                    balance: leaf.balance,
                    required: amount,
                }
                .into());
            }
        }

        let witness = WithdrawWitness::new(sk, request.nullifier);
        let proof = self.prover.prove_withdraw(&witness).await?;
        if !self.prover.verify(Circuit::Withdraw, &proof).await? {
            return Err(OperatorError::ProofInvalid(
                "withdraw proof failed local verification".into(),
            ));
        }

        let receipt = match request.amount {
            Some(amount) => self.ledger.withdraw(amount, &proof).await?,
            None => self.ledger.withdraw_all(&proof).await?,
        };
        info!(
            index,
            amount = ?request.amount,
            tx_hash = %receipt.tx_hash,
            "withdrawal submitted"
        );
        Ok(receipt)
    }
}

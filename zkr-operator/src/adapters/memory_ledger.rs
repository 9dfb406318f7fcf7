//! In-process ledger with the rollup contract's semantics.
//!
//! Keeps its own copy of the balance tree, checks proofs through a
//! [`Prover`], tracks spent nullifiers and accrued fees, and emits
//! `Deposit`/`Withdraw` events on a bounded channel in the order it applies
//! them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use halo2curves_axiom::bn256::Fr;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use zkr_common::field::fr_to_bytes;
use zkr_common::{address, Point};
use zkr_merkle::TreeError;

use crate::models::{BalanceLeaf, BalanceTree, Wei};
use crate::pipeline::apply_transfer;
use crate::ports::{
    Circuit, Ledger, LedgerError, LedgerEvent, LedgerEventKind, LedgerReceipt, Prover,
    SolidityProof, UserData,
};
use crate::witness::decode_batch_inputs;

struct LedgerState {
    tree: BalanceTree,
    accounts: HashMap<[u8; 32], u64>,
    nullifiers: HashSet<[u8; 32]>,
    fees: Wei,
    height: u64,
}

impl LedgerState {
    fn receipt(&mut self) -> LedgerReceipt {
        self.height += 1;
        LedgerReceipt {
            tx_hash: format!("0x{:064x}", self.height),
            block_number: Some(self.height),
        }
    }

    fn account(&self, public_key: &Point) -> Option<(u64, BalanceLeaf)> {
        let index = *self.accounts.get(&fr_to_bytes(&address(public_key)))?;
        let leaf = self.tree.leaf_raw(index)?.clone();
        Some((index, leaf))
    }
}

pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    verifier: Arc<dyn Prover>,
    events: mpsc::Sender<LedgerEvent>,
}

impl InMemoryLedger {
    /// Creates an empty ledger and the receiving end of its event stream.
    pub fn new(
        depth: usize,
        zero_value: Fr,
        verifier: Arc<dyn Prover>,
        capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<LedgerEvent>), TreeError> {
        Ok(Self::with_tree(
            BalanceTree::new(depth, zero_value)?,
            verifier,
            capacity,
        ))
    }

    /// Starts from an existing tree, registering every account in it.
    pub fn with_tree(
        tree: BalanceTree,
        verifier: Arc<dyn Prover>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<LedgerEvent>) {
        let accounts = tree
            .leaves_raw()
            .iter()
            .zip(0u64..)
            .map(|(leaf, index)| (fr_to_bytes(&address(&leaf.public_key)), index))
            .collect();
        let (events, receiver) = mpsc::channel(capacity.max(1));
        let ledger = Self {
            state: Mutex::new(LedgerState {
                tree,
                accounts,
                nullifiers: HashSet::new(),
                fees: 0,
                height: 0,
            }),
            verifier,
            events,
        };
        (ledger, receiver)
    }

    /// Current on-ledger balance root.
    pub async fn root(&self) -> Fr {
        self.state.lock().await.tree.root()
    }

    /// Claims channel capacity before the state lock is taken, so a slow
    /// consumer never blocks readers of the ledger state.
    async fn reserve_event(&self) -> Option<mpsc::Permit<'_, LedgerEvent>> {
        match self.events.reserve().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                warn!("ledger event receiver dropped");
                None
            }
        }
    }

    async fn check(&self, circuit: Circuit, proof: &SolidityProof) -> Result<(), LedgerError> {
        match self.verifier.verify(circuit, proof).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(LedgerError::ProofRejected(format!(
                "{} proof does not verify",
                circuit.name()
            ))),
            Err(err) => Err(LedgerError::Rpc(err.to_string())),
        }
    }

    async fn withdraw_inner(
        &self,
        amount: Option<Wei>,
        proof: &SolidityProof,
    ) -> Result<LedgerReceipt, LedgerError> {
        self.check(Circuit::Withdraw, proof).await?;
        let &[x, y, nullifier] = proof.inputs.as_slice() else {
            return Err(LedgerError::ProofRejected("withdraw inputs malformed".into()));
        };
        let public_key =
            Point::try_new(x, y).map_err(|err| LedgerError::ProofRejected(err.to_string()))?;

        let permit = self.reserve_event().await;
        let mut state = self.state.lock().await;
        let nullifier_key = fr_to_bytes(&nullifier);
        if state.nullifiers.contains(&nullifier_key) {
            return Err(LedgerError::NullifierReused);
        }
        let (index, leaf) = state.account(&public_key).ok_or(LedgerError::UnknownAccount)?;
        let amount = amount.unwrap_or(leaf.balance);
        let remaining = leaf.balance.checked_sub(amount).ok_or_else(|| {
            LedgerError::Reverted(format!(
                "withdraw of {amount} exceeds balance {}",
                leaf.balance
            ))
        })?;

        let updated = BalanceLeaf::new(public_key, remaining, leaf.nonce);
        state
            .tree
            .update_leaf(index, updated.clone())
            .map_err(|err| LedgerError::Reverted(err.to_string()))?;
        state.nullifiers.insert(nullifier_key);
        let receipt = state.receipt();

        info!(index, amount, "ledger applied withdrawal");
        // Sent while the lock is held so events leave in mutation order.
        if let Some(permit) = permit {
            permit.send(LedgerEvent {
                kind: LedgerEventKind::Withdraw,
                leaf_index: index,
                public_key,
                balance: updated.balance,
                nonce: updated.nonce,
            });
        }
        Ok(receipt)
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn deposit(&self, public_key: Point, value: Wei) -> Result<LedgerReceipt, LedgerError> {
        let public_key = Point::try_new(public_key.x, public_key.y)
            .map_err(|err| LedgerError::Reverted(err.to_string()))?;

        let permit = self.reserve_event().await;
        let mut state = self.state.lock().await;
        let (index, leaf) = match state.account(&public_key) {
            Some((index, leaf)) => {
                let balance = leaf.balance.checked_add(value).ok_or_else(|| {
                    LedgerError::Reverted("deposit overflows balance".into())
                })?;
                let leaf = BalanceLeaf::new(public_key, balance, leaf.nonce);
                state
                    .tree
                    .update_leaf(index, leaf.clone())
                    .map_err(|err| LedgerError::Reverted(err.to_string()))?;
                (index, leaf)
            }
            None => {
                let leaf = BalanceLeaf::new(public_key, value, 0);
                let index = state
                    .tree
                    .insert_leaf(leaf.clone())
                    .map_err(|err| LedgerError::Reverted(err.to_string()))?;
                state
                    .accounts
                    .insert(fr_to_bytes(&address(&public_key)), index);
                (index, leaf)
            }
        };
        let receipt = state.receipt();

        info!(index, value, "ledger applied deposit");
        if let Some(permit) = permit {
            permit.send(LedgerEvent {
                kind: LedgerEventKind::Deposit,
                leaf_index: index,
                public_key,
                balance: leaf.balance,
                nonce: leaf.nonce,
            });
        }
        Ok(receipt)
    }

    async fn withdraw(
        &self,
        amount: Wei,
        proof: &SolidityProof,
    ) -> Result<LedgerReceipt, LedgerError> {
        self.withdraw_inner(Some(amount), proof).await
    }

    async fn withdraw_all(&self, proof: &SolidityProof) -> Result<LedgerReceipt, LedgerError> {
        self.withdraw_inner(None, proof).await
    }

    async fn roll_up(&self, proof: &SolidityProof) -> Result<LedgerReceipt, LedgerError> {
        self.check(Circuit::Batch, proof).await?;
        let batch = decode_batch_inputs(&proof.inputs)
            .ok_or_else(|| LedgerError::ProofRejected("batch inputs malformed".into()))?;

        let mut state = self.state.lock().await;
        if batch.initial_root != state.tree.root() {
            return Err(LedgerError::ProofRejected(
                "batch does not start from the current root".into(),
            ));
        }

        let mut tree = state.tree.clone();
        let mut fees: Wei = 0;
        for tx in &batch.transfers {
            tree = apply_transfer(&tree, tx)
                .map_err(|err| LedgerError::ProofRejected(err.to_string()))?
                .final_tree;
            fees = fees.saturating_add(tx.fee);
        }
        if tree.root() != batch.final_root {
            return Err(LedgerError::ProofRejected(
                "batch does not end at the claimed root".into(),
            ));
        }

        state.tree = tree;
        state.fees = state.fees.saturating_add(fees);
        info!(transfers = batch.transfers.len(), fees, "ledger applied rollup");
        Ok(state.receipt())
    }

    async fn user_data(&self, pubkey_hash: Fr) -> Result<UserData, LedgerError> {
        let state = self.state.lock().await;
        let index = *state
            .accounts
            .get(&fr_to_bytes(&pubkey_hash))
            .ok_or(LedgerError::UnknownAccount)?;
        let leaf = state
            .tree
            .leaf_raw(index)
            .ok_or(LedgerError::UnknownAccount)?;
        Ok(UserData {
            leaf_index: index,
            public_key: leaf.public_key,
            balance: leaf.balance,
            nonce: leaf.nonce,
        })
    }

    async fn is_public_key_registered(&self, public_key: Point) -> Result<bool, LedgerError> {
        Ok(self.state.lock().await.account(&public_key).is_some())
    }

    async fn accrued_fees(&self) -> Result<Wei, LedgerError> {
        Ok(self.state.lock().await.fees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::DevProver;
    use crate::witness::WithdrawWitness;
    use halo2curves_axiom::ff::Field;
    use std::time::Duration;
    use zkr_common::PrivateKey;

    fn ledger() -> (InMemoryLedger, mpsc::Receiver<LedgerEvent>) {
        InMemoryLedger::new(3, Fr::ZERO, Arc::new(DevProver::new()), 16).unwrap()
    }

    #[tokio::test]
    async fn deposits_register_then_top_up() {
        let (ledger, mut events) = ledger();
        let pk = PrivateKey::from_scalar(Fr::from(9)).public_key();

        ledger.deposit(pk, 100).await.unwrap();
        ledger.deposit(pk, 50).await.unwrap();

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!((first.leaf_index, first.balance), (0, 100));
        assert_eq!((second.leaf_index, second.balance), (0, 150));
        assert!(ledger.is_public_key_registered(pk).await.unwrap());

        let user = ledger.user_data(address(&pk)).await.unwrap();
        assert_eq!(user.balance, 150);
    }

    #[tokio::test]
    async fn full_event_channel_does_not_block_readers() {
        let (ledger, mut events) =
            InMemoryLedger::new(3, Fr::ZERO, Arc::new(DevProver::new()), 1).unwrap();
        let ledger = Arc::new(ledger);
        let first = PrivateKey::from_scalar(Fr::from(21)).public_key();
        let second = PrivateKey::from_scalar(Fr::from(22)).public_key();
        ledger.deposit(first, 10).await.unwrap();

        // The channel is full, so this deposit waits for capacity.
        let pending = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.deposit(second, 20).await }
        });
        tokio::task::yield_now().await;

        let reads = async {
            (
                ledger.accrued_fees().await.unwrap(),
                ledger.user_data(address(&first)).await.unwrap().balance,
            )
        };
        let (fees, balance) = tokio::time::timeout(Duration::from_secs(1), reads)
            .await
            .expect("reads are not blocked by the full channel");
        assert_eq!((fees, balance), (0, 10));

        assert_eq!(events.recv().await.unwrap().leaf_index, 0);
        pending.await.unwrap().unwrap();
        let next = events.recv().await.unwrap();
        assert_eq!((next.leaf_index, next.balance), (1, 20));
    }

    #[tokio::test]
    async fn off_curve_deposit_is_reverted() {
        let (ledger, mut events) = ledger();
        let bogus = Point::new(Fr::from(3), Fr::from(4));

        let err = ledger.deposit(bogus, 100).await.unwrap_err();
        assert!(matches!(err, LedgerError::Reverted(_)));
        assert!(events.try_recv().is_err());
        assert_eq!(ledger.root().await, BalanceTree::new(3, Fr::ZERO).unwrap().root());
    }

    #[tokio::test]
    async fn withdraw_rejects_a_spent_nullifier() {
        let (ledger, mut events) = ledger();
        let sk = PrivateKey::from_scalar(Fr::from(11));
        ledger.deposit(sk.public_key(), 100).await.unwrap();

        let proof = DevProver::new()
            .prove_withdraw(&WithdrawWitness::new(&sk, Fr::from(42)))
            .await
            .unwrap();
        ledger.withdraw(40, &proof).await.unwrap();
        assert_eq!(
            ledger.withdraw(10, &proof).await.unwrap_err(),
            LedgerError::NullifierReused
        );

        events.recv().await.unwrap();
        let withdrawal = events.recv().await.unwrap();
        assert_eq!(withdrawal.kind, LedgerEventKind::Withdraw);
        assert_eq!(withdrawal.balance, 60);
    }

    #[tokio::test]
    async fn existing_tree_accounts_are_registered() {
        let pk = PrivateKey::from_scalar(Fr::from(13)).public_key();
        let mut tree = BalanceTree::new(3, Fr::ZERO).unwrap();
        tree.insert_leaf(BalanceLeaf::new(pk, 70, 2)).unwrap();

        let (ledger, mut events) = InMemoryLedger::with_tree(tree, Arc::new(DevProver::new()), 4);
        ledger.deposit(pk, 30).await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!((event.leaf_index, event.balance, event.nonce), (0, 100, 2));
    }

    #[tokio::test]
    async fn forged_proof_is_rejected() {
        let (ledger, _events) = ledger();
        let mut proof = SolidityProof::default();
        proof.inputs = vec![Fr::ONE, Fr::ONE, Fr::ONE];
        assert!(matches!(
            ledger.withdraw_all(&proof).await,
            Err(LedgerError::ProofRejected(_))
        ));
    }
}

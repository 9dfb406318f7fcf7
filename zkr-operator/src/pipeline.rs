//! Batch state transition.
//!
//! Each transfer moves the tree through three snapshots: the pre-state, the
//! intermediate tree after the sender is debited, and the final tree after
//! the recipient is credited. Every snapshot is an owned clone, so recording
//! one never observes mutations meant for another. The final tree of one
//! transfer is the pre-state of the next.

use halo2curves_axiom::bn256::Fr;
use tracing::{info, warn};
use zkr_common::fr_from_u128;
use zkr_merkle::MerklePath;

use crate::error::{OperatorError, ValidationError};
use crate::models::{BalanceLeaf, BalanceTree, Transaction};
use crate::validator::Validator;
use crate::witness::BatchWitness;

/// One applied transfer and the snapshots around it.
#[derive(Clone, Debug)]
pub struct TransferStep {
    pub pre_root: Fr,
    pub sender: BalanceLeaf,
    pub sender_path: MerklePath,
    pub recipient: BalanceLeaf,
    pub recipient_path: MerklePath,
    pub intermediate_root: Fr,
    pub intermediate_recipient_path: MerklePath,
    pub final_tree: BalanceTree,
}

/// Debits `tx.from` and credits `tx.to` on clones of `tree`.
///
/// Only balances and nonces are checked here; signatures and fees are the
/// validator's concern.
pub fn apply_transfer(tree: &BalanceTree, tx: &Transaction) -> Result<TransferStep, OperatorError> {
    let sender = tree
        .leaf_raw(tx.from)
        .cloned()
        .ok_or(ValidationError::UnknownAccount { index: tx.from })?;
    let recipient = tree
        .leaf_raw(tx.to)
        .cloned()
        .ok_or(ValidationError::UnknownAccount { index: tx.to })?;
    let sender_path = tree.update_path(tx.from)?;
    let recipient_path = tree.update_path(tx.to)?;

    let required = tx.amount.checked_add(tx.fee);
    let debited = required
        .and_then(|required| sender.balance.checked_sub(required))
        .ok_or(ValidationError::InsufficientFunds {
            balance: sender.balance,
            required: required.unwrap_or(u128::MAX),
        })?;

    let next_nonce = sender
        .nonce
        .checked_add(1)
        .ok_or(ValidationError::NonceMismatch {
            expected: u64::MAX,
            got: tx.nonce,
        })?;

    let mut intermediate = tree.clone();
    intermediate.update_leaf(
        tx.from,
        BalanceLeaf::new(sender.public_key, debited, next_nonce),
    )?;
    let intermediate_root = intermediate.root();
    let intermediate_recipient_path = intermediate.update_path(tx.to)?;

    // Read back from the intermediate tree so a self-transfer sees the debit.
    let credited_from = intermediate
        .leaf_raw(tx.to)
        .cloned()
        .ok_or(ValidationError::UnknownAccount { index: tx.to })?;
    let credited = credited_from
        .balance
        .checked_add(tx.amount)
        .ok_or(ValidationError::BalanceOverflow { index: tx.to })?;

    let mut final_tree = intermediate.clone();
    final_tree.update_leaf(
        tx.to,
        BalanceLeaf::new(credited_from.public_key, credited, credited_from.nonce),
    )?;

    Ok(TransferStep {
        pre_root: tree.root(),
        sender,
        sender_path,
        recipient,
        recipient_path,
        intermediate_root,
        intermediate_recipient_path,
        final_tree,
    })
}

/// A transfer dropped from a batch because it no longer validates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedTransfer {
    pub position: usize,
    pub tx: Transaction,
    pub reason: ValidationError,
}

/// Result of folding one batch.
#[derive(Clone, Debug)]
pub struct BatchFold {
    pub witness: BatchWitness,
    pub final_tree: BalanceTree,
    pub applied: Vec<Transaction>,
    pub rejected: Vec<RejectedTransfer>,
}

impl BatchFold {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Folds `txs` in order over `tree` and assembles the batch witness.
///
/// Each transfer is re-validated against the rolling tree; one that fails is
/// recorded in `rejected` and skipped, and the rest keep their order. `tree`
/// itself is never mutated.
pub fn fold_batch(
    tree: &BalanceTree,
    txs: &[Transaction],
    validator: &Validator,
) -> Result<BatchFold, OperatorError> {
    let mut current = tree.clone();
    let mut witness = BatchWitness::default();
    let mut applied = Vec::with_capacity(txs.len());
    let mut rejected = Vec::new();

    for (position, tx) in txs.iter().enumerate() {
        if let Err(reason) = validator.validate(&current, tx) {
            warn!(position, from = tx.from, nonce = tx.nonce, %reason, "dropping stale transfer from batch");
            rejected.push(RejectedTransfer {
                position,
                tx: tx.clone(),
                reason,
            });
            continue;
        }

        let step = apply_transfer(&current, tx)?;

        witness.balance_tree_root.push(step.pre_root);
        witness.tx_data.push(tx.circuit_fields());

        witness
            .tx_sender_public_key
            .push(vec![step.sender.public_key.x, step.sender.public_key.y]);
        witness.tx_sender_balance.push(fr_from_u128(step.sender.balance));
        witness.tx_sender_nonce.push(Fr::from(step.sender.nonce));
        witness.tx_sender_path_elements.push(step.sender_path.siblings);

        witness
            .tx_recipient_public_key
            .push(vec![step.recipient.public_key.x, step.recipient.public_key.y]);
        witness.tx_recipient_balance.push(fr_from_u128(step.recipient.balance));
        witness.tx_recipient_nonce.push(Fr::from(step.recipient.nonce));
        witness.tx_recipient_path_elements.push(step.recipient_path.siblings);

        witness.intermediate_balance_tree_root.push(step.intermediate_root);
        witness
            .intermediate_balance_tree_path_elements
            .push(step.intermediate_recipient_path.siblings);

        applied.push(tx.clone());
        current = step.final_tree;
    }

    witness.final_balance_tree_root = current.root();
    info!(
        applied = applied.len(),
        rejected = rejected.len(),
        initial_root = ?tree.root(),
        final_root = ?current.root(),
        "folded batch"
    );

    Ok(BatchFold {
        witness,
        final_tree: current,
        applied,
        rejected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ether, milliether};
    use halo2curves_axiom::ff::Field;
    use zkr_common::PrivateKey;
    use zkr_merkle::{MimcSponge, TreeLeaf};

    fn alice() -> PrivateKey {
        PrivateKey::from_scalar(Fr::from(31337))
    }

    fn bob() -> PrivateKey {
        PrivateKey::from_scalar(Fr::from(271828))
    }

    fn two_accounts() -> BalanceTree {
        let mut tree = BalanceTree::new(2, Fr::ZERO).unwrap();
        tree.insert_leaf(BalanceLeaf::new(alice().public_key(), ether(1), 0))
            .unwrap();
        tree.insert_leaf(BalanceLeaf::new(bob().public_key(), ether(1), 0))
            .unwrap();
        tree
    }

    fn scenario_txs() -> Vec<Transaction> {
        vec![
            Transaction::new(0, 1, milliether(100), milliether(10), 1).signed(&alice()),
            Transaction::new(0, 1, milliether(300), milliether(20), 2).signed(&alice()),
        ]
    }

    #[test]
    fn two_transfers_fold_to_expected_balances() {
        let tree = two_accounts();
        let fold = fold_batch(&tree, &scenario_txs(), &Validator::default()).unwrap();

        let a = fold.final_tree.leaf_raw(0).unwrap();
        let b = fold.final_tree.leaf_raw(1).unwrap();
        assert_eq!(a.nonce, 2);
        assert_eq!(a.balance, milliether(570));
        assert_eq!(b.balance, milliether(1400));
        assert_eq!(b.nonce, 0);
        assert_eq!(fold.applied.len(), 2);
        assert!(fold.rejected.is_empty());

        // The input tree is untouched.
        assert_eq!(tree.leaf_raw(0).unwrap().balance, ether(1));
    }

    #[test]
    fn witness_chains_roots_between_steps() {
        let tree = two_accounts();
        let fold = fold_batch(&tree, &scenario_txs(), &Validator::default()).unwrap();
        let w = &fold.witness;

        assert_eq!(w.tx_count(), 2);
        assert_eq!(w.balance_tree_root[0], tree.root());
        assert_eq!(w.final_balance_tree_root, fold.final_tree.root());
        assert_ne!(w.balance_tree_root[1], w.balance_tree_root[0]);
        assert_eq!(w.tx_sender_path_elements[0].len(), 2);

        // Sender path authenticates the pre-state leaf against the pre-state root.
        let sender = BalanceLeaf::new(alice().public_key(), ether(1), 0);
        let path = MerklePath {
            siblings: w.tx_sender_path_elements[0].clone(),
            indices: vec![0, 0],
        };
        assert_eq!(path.compute_root::<MimcSponge>(sender.leaf_hash()), w.balance_tree_root[0]);

        // Recipient path against the intermediate root.
        let recipient = BalanceLeaf::new(bob().public_key(), ether(1), 0);
        let path = MerklePath {
            siblings: w.intermediate_balance_tree_path_elements[0].clone(),
            indices: vec![1, 0],
        };
        assert_eq!(
            path.compute_root::<MimcSponge>(recipient.leaf_hash()),
            w.intermediate_balance_tree_root[0]
        );
    }

    #[test]
    fn stale_transfer_is_skipped_without_reordering() {
        let mut txs = scenario_txs();
        // Replays nonce 1 after it was consumed.
        txs.insert(1, txs[0].clone());

        let fold = fold_batch(&two_accounts(), &txs, &Validator::default()).unwrap();
        assert_eq!(fold.applied, scenario_txs());
        assert_eq!(fold.rejected.len(), 1);
        assert_eq!(fold.rejected[0].position, 1);
        assert_eq!(
            fold.rejected[0].reason,
            ValidationError::NonceMismatch { expected: 2, got: 1 }
        );
    }

    #[test]
    fn self_transfer_only_costs_the_fee() {
        let tx = Transaction::new(0, 0, milliether(100), milliether(1), 1).signed(&alice());
        let fold = fold_batch(&two_accounts(), &[tx], &Validator::default()).unwrap();
        let a = fold.final_tree.leaf_raw(0).unwrap();
        assert_eq!(a.balance, ether(1) - milliether(1));
        assert_eq!(a.nonce, 1);
    }

    #[test]
    fn empty_batch_keeps_the_root() {
        let tree = two_accounts();
        let fold = fold_batch(&tree, &[], &Validator::default()).unwrap();
        assert!(fold.is_empty());
        assert_eq!(fold.witness.final_balance_tree_root, tree.root());
        assert_eq!(fold.witness.public_inputs()[0], tree.root());
    }

    #[test]
    fn apply_transfer_rejects_an_exhausted_nonce() {
        let mut tree = BalanceTree::new(2, Fr::ZERO).unwrap();
        tree.insert_leaf(BalanceLeaf::new(alice().public_key(), ether(1), u64::MAX))
            .unwrap();
        tree.insert_leaf(BalanceLeaf::new(bob().public_key(), ether(1), 0))
            .unwrap();
        let root = tree.root();

        let tx = Transaction::new(0, 1, milliether(100), milliether(1), 0);
        assert!(matches!(
            apply_transfer(&tree, &tx),
            Err(OperatorError::Validation(ValidationError::NonceMismatch {
                expected: u64::MAX,
                got: 0
            }))
        ));
        assert_eq!(tree.root(), root);
    }

    #[test]
    fn apply_transfer_rejects_overdraft() {
        let tx = Transaction::new(1, 0, ether(2), 0, 1);
        assert!(matches!(
            apply_transfer(&two_accounts(), &tx),
            Err(OperatorError::Validation(ValidationError::InsufficientFunds { .. }))
        ));
    }
}

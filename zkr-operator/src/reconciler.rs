//! Applies ledger `Deposit`/`Withdraw` events to the operator's tree.

use std::sync::Arc;

use halo2curves_axiom::bn256::Fr;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use zkr_merkle::LeafSelection;

use crate::error::OperatorError;
use crate::models::BalanceTree;
use crate::ports::LedgerEvent;
use crate::state::TreeState;

/// Writes one event into `tree`: an index equal to the next leaf index is a
/// new account, a lower one an existing account, a higher one a skipped
/// event.
pub fn apply_event(tree: &mut BalanceTree, event: &LedgerEvent) -> Result<(), OperatorError> {
    let next = tree.next_leaf_index();
    let index = event.leaf_index;

    if index > next {
        return Err(OperatorError::Desync(format!(
            "ledger event for leaf {index} arrived while next leaf index is {next}"
        )));
    }
    if index == next {
        tree.insert_leaf(event.leaf())?;
        return Ok(());
    }

    if let Some(existing) = tree.leaf_raw(index) {
        if existing.public_key != event.public_key {
            return Err(OperatorError::Desync(format!(
                "ledger event for leaf {index} names a different public key"
            )));
        }
    }
    tree.update_leaf(index, event.leaf())?;
    Ok(())
}

/// Replays a full ledger history into a fresh tree.
pub fn rebuild_tree<I>(depth: usize, zero_value: Fr, events: I) -> Result<BalanceTree, OperatorError>
where
    I: IntoIterator<Item = LedgerEvent>,
{
    let mut tree = BalanceTree::new(depth, zero_value)?;
    for event in events {
        apply_event(&mut tree, &event)?;
    }
    Ok(tree)
}

/// Single consumer of the ledger event stream.
#[derive(Clone)]
pub struct Reconciler {
    state: Arc<TreeState>,
}

impl Reconciler {
    pub fn new(state: Arc<TreeState>) -> Self {
        Self { state }
    }

    pub async fn apply(&self, event: &LedgerEvent) -> Result<(), OperatorError> {
        self.state
            .mutate(|tree| {
                apply_event(tree, event)?;
                Ok(((), LeafSelection::Indices(vec![event.leaf_index])))
            })
            .await?;

        info!(
            kind = ?event.kind,
            index = event.leaf_index,
            balance = %event.balance,
            nonce = event.nonce,
            "reconciled ledger event"
        );
        Ok(())
    }

    /// Consumes `events` in order until the channel closes or the tree
    /// desynchronizes.
    pub async fn run(self, mut events: mpsc::Receiver<LedgerEvent>) -> Result<(), OperatorError> {
        while let Some(event) = events.recv().await {
            match self.apply(&event).await {
                Ok(()) => {}
                Err(err) if err.is_fatal() => {
                    error!(%err, index = event.leaf_index, "reconciler stopping");
                    return Err(err);
                }
                Err(err) => warn!(%err, index = event.leaf_index, "failed to reconcile ledger event"),
            }
        }
        info!("ledger event stream closed");
        Ok(())
    }
}

//! Single-writer handle over the authoritative balance tree.
//!
//! Readers share a consistent snapshot through the read lock. Every mutation
//! runs on a clone under the write lock, is persisted, and only then replaces
//! the live tree, so a failed mutation or a failed save leaves nothing behind.
//! A fatal error latches the handle: further mutations fail with `Desync`
//! until [`TreeState::resync`] installs a tree rebuilt from ledger history.

use std::sync::Arc;

use halo2curves_axiom::bn256::Fr;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use zkr_merkle::LeafSelection;

use crate::error::OperatorError;
use crate::models::{BalanceTree, Transaction};
use crate::pipeline::{fold_batch, BatchFold};
use crate::ports::TreeStore;
use crate::validator::Validator;

struct Inner {
    tree: BalanceTree,
    desync: Option<String>,
}

pub struct TreeState {
    name: String,
    inner: RwLock<Inner>,
    store: Arc<dyn TreeStore>,
}

impl TreeState {
    /// Loads the tree saved under `name`, or creates and saves an empty one.
    pub fn open(
        name: impl Into<String>,
        depth: usize,
        zero_value: Fr,
        store: Arc<dyn TreeStore>,
    ) -> Result<Self, OperatorError> {
        let name = name.into();
        let tree = match store.load(&name)? {
            Some(tree) => {
                if tree.depth() != depth || tree.zero_value() != zero_value {
                    warn!(
                        name = %name,
                        stored_depth = tree.depth(),
                        configured_depth = depth,
                        "stored tree parameters differ from configuration; using stored tree"
                    );
                }
                info!(name = %name, leaves = tree.next_leaf_index(), root = ?tree.root(), "loaded balance tree");
                tree
            }
            None => {
                let tree = BalanceTree::new(depth, zero_value)?;
                store.save(&name, &tree, &LeafSelection::All)?;
                info!(name = %name, depth, "created balance tree");
                tree
            }
        };

        Ok(Self {
            name,
            inner: RwLock::new(Inner { tree, desync: None }),
            store,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owned copy of the current tree.
    pub async fn snapshot(&self) -> BalanceTree {
        self.inner.read().await.tree.clone()
    }

    /// Runs `f` against the current tree under the read lock.
    pub async fn read<R>(&self, f: impl FnOnce(&BalanceTree) -> R) -> R {
        f(&self.inner.read().await.tree)
    }

    pub async fn root(&self) -> Fr {
        self.inner.read().await.tree.root()
    }

    /// Reason for the latched desync, if any.
    pub async fn desync_reason(&self) -> Option<String> {
        self.inner.read().await.desync.clone()
    }

    pub async fn ensure_synced(&self) -> Result<(), OperatorError> {
        match self.desync_reason().await {
            Some(reason) => Err(OperatorError::Desync(reason)),
            None => Ok(()),
        }
    }

    /// Applies `f` to a copy of the tree, saves the leaves it reports as
    /// touched, and commits the copy.
    pub async fn mutate<R>(
        &self,
        f: impl FnOnce(&mut BalanceTree) -> Result<(R, LeafSelection), OperatorError>,
    ) -> Result<R, OperatorError> {
        let mut inner = self.inner.write().await;
        if let Some(reason) = &inner.desync {
            return Err(OperatorError::Desync(reason.clone()));
        }

        let mut next = inner.tree.clone();
        match f(&mut next) {
            Ok((value, touched)) => {
                self.store.save(&self.name, &next, &touched)?;
                inner.tree = next;
                Ok(value)
            }
            Err(err) => {
                if err.is_fatal() {
                    error!(name = %self.name, %err, "balance tree desynchronized; mutations halted");
                    inner.desync = Some(err.to_string());
                }
                Err(err)
            }
        }
    }

    /// Folds `txs` over the current tree and commits the final tree.
    pub async fn fold_and_commit(
        &self,
        txs: &[Transaction],
        validator: &Validator,
    ) -> Result<BatchFold, OperatorError> {
        self.mutate(|tree| {
            let fold = fold_batch(tree, txs, validator)?;
            let mut touched: Vec<u64> = fold.applied.iter().flat_map(|tx| [tx.from, tx.to]).collect();
            touched.sort_unstable();
            touched.dedup();
            *tree = fold.final_tree.clone();
            Ok((fold, LeafSelection::Indices(touched)))
        })
        .await
    }

    /// Replaces the tree wholesale and clears a latched desync.
    pub async fn resync(&self, tree: BalanceTree) -> Result<(), OperatorError> {
        let mut inner = self.inner.write().await;
        self.store.save(&self.name, &tree, &LeafSelection::All)?;
        info!(
            name = %self.name,
            leaves = tree.next_leaf_index(),
            root = ?tree.root(),
            "balance tree resynchronized"
        );
        inner.tree = tree;
        inner.desync = None;
        Ok(())
    }
}

use thiserror::Error;
use zkr_merkle::{LeafSelection, TreeError};

use crate::models::{BalanceTree, Transaction};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored record could not be decoded: {0}")]
    Codec(String),

    /// Stored parts do not reconstruct a consistent tree.
    #[error("stored tree is inconsistent: {0}")]
    Tree(#[from] TreeError),

    #[error("invalid tree name: {0:?}")]
    InvalidName(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

/// Tree persistence keyed by tree name.
///
/// `save` upserts the metadata and the leaves chosen by `leaves`; `load`
/// returns `None` for a name that was never saved.
pub trait TreeStore: Send + Sync {
    fn save(
        &self,
        name: &str,
        tree: &BalanceTree,
        leaves: &LeafSelection,
    ) -> Result<(), StoreError>;

    fn load(&self, name: &str) -> Result<Option<BalanceTree>, StoreError>;
}

/// Ordered queue of accepted transfers.
///
/// Indices increase by one per append and are never reused.
pub trait TxQueue: Send + Sync {
    /// Appends `tx` and returns its queue index.
    fn append(&self, tx: &Transaction) -> Result<u64, StoreError>;

    /// Number of appended transfers not yet taken.
    fn pending(&self) -> Result<u64, StoreError>;

    /// Removes and returns up to `max` transfers in append order.
    fn take(&self, max: usize) -> Result<Vec<(u64, Transaction)>, StoreError>;
}

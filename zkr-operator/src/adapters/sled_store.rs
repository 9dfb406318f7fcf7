//! sled-backed tree store and transfer queue.
//!
//! Layout:
//! - `tree_metadata`: `name -> json(TreeMetadata)`
//! - `tree_leaves`: `name ++ 0x00 ++ be(index) -> json(LeafRecord)`
//! - `tx_queue`: `be(queue index) -> json(Transaction)`
//! - `tx_queue_meta`: `next_append`, `next_consume` counters

use std::path::Path;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::Db;
use tracing::debug;
use zkr_merkle::{LeafRecord, LeafSelection, MerkleTree, TreeHasher, TreeMetadata};

use crate::models::{BalanceTree, Transaction};
use crate::ports::{StoreError, TreeStore, TxQueue};

const METADATA_TREE: &str = "tree_metadata";
const LEAVES_TREE: &str = "tree_leaves";
const QUEUE_TREE: &str = "tx_queue";
const QUEUE_META_TREE: &str = "tx_queue_meta";
const NEXT_APPEND: &[u8] = b"next_append";
const NEXT_CONSUME: &[u8] = b"next_consume";

/// Opens the sled database at `path`, creating parent directories.
pub fn open_db(path: impl AsRef<Path>) -> Result<Db, StoreError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|err| {
                StoreError::Backend(format!("create {}: {err}", parent.display()))
            })?;
        }
    }
    Ok(sled::open(path)?)
}

/// Opens a database that is removed when dropped.
pub fn temporary_db() -> Result<Db, StoreError> {
    Ok(sled::Config::new().temporary(true).open()?)
}

#[derive(Clone)]
pub struct SledTreeStore {
    db: Db,
    metadata: sled::Tree,
    leaves: sled::Tree,
}

impl SledTreeStore {
    pub fn new(db: &Db) -> Result<Self, StoreError> {
        Ok(Self {
            db: db.clone(),
            metadata: db.open_tree(METADATA_TREE)?,
            leaves: db.open_tree(LEAVES_TREE)?,
        })
    }

    /// Writes the metadata and the selected leaves of any tree.
    pub fn save_tree<P, H>(
        &self,
        name: &str,
        tree: &MerkleTree<P, H>,
        selection: &LeafSelection,
    ) -> Result<(), StoreError>
    where
        P: Serialize + Clone,
        H: TreeHasher,
    {
        check_name(name)?;

        let mut batch = sled::Batch::default();
        let records = tree.leaf_records(selection);
        for record in &records {
            batch.insert(leaf_key(name, record.index), serde_json::to_vec(record)?);
        }
        self.leaves.apply_batch(batch)?;
        self.metadata
            .insert(name.as_bytes(), serde_json::to_vec(&tree.metadata())?)?;

        debug!(name, leaves = records.len(), root = ?tree.root(), "saved tree");
        Ok(())
    }

    /// Reconstructs a tree saved under `name`.
    pub fn load_tree<P, H>(&self, name: &str) -> Result<Option<MerkleTree<P, H>>, StoreError>
    where
        P: DeserializeOwned,
        H: TreeHasher,
    {
        check_name(name)?;

        let Some(raw) = self.metadata.get(name.as_bytes())? else {
            return Ok(None);
        };
        let metadata: TreeMetadata = serde_json::from_slice(&raw)?;

        let mut records = Vec::new();
        for item in self.leaves.scan_prefix(leaf_prefix(name)) {
            let (_, value) = item?;
            let record: LeafRecord<P> = serde_json::from_slice(&value)?;
            records.push(record);
        }
        // Leaves past the stored frontier belong to a save that never
        // finished writing its metadata.
        records.retain(|record| record.index < metadata.next_leaf_index);

        let tree = MerkleTree::from_parts(metadata, records)?;
        debug!(name, leaves = tree.next_leaf_index(), "loaded tree");
        Ok(Some(tree))
    }

    /// Every stored key/value pair, metadata first.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut entries = Vec::new();
        for tree in [&self.metadata, &self.leaves] {
            for item in tree.iter() {
                let (key, value) = item?;
                entries.push((key.to_vec(), value.to_vec()));
            }
        }
        Ok(entries)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl TreeStore for SledTreeStore {
    fn save(
        &self,
        name: &str,
        tree: &BalanceTree,
        leaves: &LeafSelection,
    ) -> Result<(), StoreError> {
        self.save_tree(name, tree, leaves)
    }

    fn load(&self, name: &str) -> Result<Option<BalanceTree>, StoreError> {
        self.load_tree(name)
    }
}

fn check_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.as_bytes().contains(&0) {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn leaf_prefix(name: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(name.len() + 1);
    prefix.extend_from_slice(name.as_bytes());
    prefix.push(0);
    prefix
}

fn leaf_key(name: &str, index: u64) -> Vec<u8> {
    let mut key = leaf_prefix(name);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

/// Transfer queue with monotonically increasing indices.
pub struct SledTxQueue {
    entries: sled::Tree,
    meta: sled::Tree,
    lock: Mutex<()>,
}

impl SledTxQueue {
    pub fn new(db: &Db) -> Result<Self, StoreError> {
        Ok(Self {
            entries: db.open_tree(QUEUE_TREE)?,
            meta: db.open_tree(QUEUE_META_TREE)?,
            lock: Mutex::new(()),
        })
    }

    fn counter(&self, key: &[u8]) -> Result<u64, StoreError> {
        match self.meta.get(key)? {
            Some(raw) => {
                let bytes: [u8; 8] = raw[..]
                    .try_into()
                    .map_err(|_| StoreError::Codec("queue counter is not 8 bytes".into()))?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, StoreError> {
        self.lock
            .lock()
            .map_err(|_| StoreError::Backend("queue lock poisoned".into()))
    }
}

impl TxQueue for SledTxQueue {
    fn append(&self, tx: &Transaction) -> Result<u64, StoreError> {
        let _guard = self.guard()?;
        let index = self.counter(NEXT_APPEND)?;
        self.entries
            .insert(index.to_be_bytes(), serde_json::to_vec(tx)?)?;
        self.meta.insert(NEXT_APPEND, (index + 1).to_be_bytes().to_vec())?;
        Ok(index)
    }

    fn pending(&self) -> Result<u64, StoreError> {
        let _guard = self.guard()?;
        Ok(self
            .counter(NEXT_APPEND)?
            .saturating_sub(self.counter(NEXT_CONSUME)?))
    }

    fn take(&self, max: usize) -> Result<Vec<(u64, Transaction)>, StoreError> {
        let _guard = self.guard()?;
        let start = self.counter(NEXT_CONSUME)?;

        let mut taken = Vec::with_capacity(max);
        for item in self.entries.range(start.to_be_bytes()..).take(max) {
            let (key, value) = item?;
            let bytes: [u8; 8] = key[..]
                .try_into()
                .map_err(|_| StoreError::Codec("queue key is not 8 bytes".into()))?;
            taken.push((u64::from_be_bytes(bytes), serde_json::from_slice(&value)?));
        }

        if let Some((last, _)) = taken.last() {
            let mut batch = sled::Batch::default();
            for (index, _) in &taken {
                batch.remove(index.to_be_bytes().to_vec());
            }
            self.entries.apply_batch(batch)?;
            self.meta.insert(NEXT_CONSUME, (last + 1).to_be_bytes().to_vec())?;
        }
        Ok(taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BalanceLeaf;
    use halo2curves_axiom::bn256::Fr;
    use halo2curves_axiom::ff::Field;
    use zkr_common::PrivateKey;

    fn sample_tree() -> BalanceTree {
        let mut tree = BalanceTree::new(3, Fr::ZERO).unwrap();
        for seed in 1..=3u64 {
            let pk = PrivateKey::from_scalar(Fr::from(seed * 1000)).public_key();
            tree.insert_leaf(BalanceLeaf::new(pk, seed as u128 * 10, 0))
                .unwrap();
        }
        tree
    }

    #[test]
    fn missing_tree_loads_as_none() {
        let store = SledTreeStore::new(&temporary_db().unwrap()).unwrap();
        assert!(store.load("absent").unwrap().is_none());
        assert!(matches!(
            store.load(""),
            Err(StoreError::InvalidName(_))
        ));
    }

    #[test]
    fn saved_tree_loads_equal() {
        let store = SledTreeStore::new(&temporary_db().unwrap()).unwrap();
        let tree = sample_tree();
        store.save("balance", &tree, &LeafSelection::All).unwrap();
        assert_eq!(store.load("balance").unwrap(), Some(tree));
    }

    #[test]
    fn incremental_saves_accumulate_leaves() {
        let store = SledTreeStore::new(&temporary_db().unwrap()).unwrap();
        let mut tree = BalanceTree::new(3, Fr::ZERO).unwrap();
        let pk = PrivateKey::from_scalar(Fr::from(5)).public_key();
        for balance in [1u128, 2, 3] {
            tree.insert_leaf(BalanceLeaf::new(pk, balance, 0)).unwrap();
            store.save("balance", &tree, &LeafSelection::Latest).unwrap();
        }
        tree.update_leaf(1, BalanceLeaf::new(pk, 20, 1)).unwrap();
        store
            .save("balance", &tree, &LeafSelection::Indices(vec![1]))
            .unwrap();

        assert_eq!(store.load("balance").unwrap(), Some(tree));
    }

    #[test]
    fn trees_with_prefix_names_do_not_mix() {
        let store = SledTreeStore::new(&temporary_db().unwrap()).unwrap();
        let tree = sample_tree();
        let empty = BalanceTree::new(3, Fr::ZERO).unwrap();
        store.save("bal", &empty, &LeafSelection::All).unwrap();
        store.save("balance", &tree, &LeafSelection::All).unwrap();
        assert_eq!(store.load("bal").unwrap(), Some(empty));
    }

    #[test]
    fn queue_preserves_append_order() {
        let queue = SledTxQueue::new(&temporary_db().unwrap()).unwrap();
        for nonce in 1..=5 {
            assert_eq!(
                queue.append(&Transaction::new(0, 1, 10, 1, nonce)).unwrap(),
                nonce - 1
            );
        }
        assert_eq!(queue.pending().unwrap(), 5);

        let first = queue.take(2).unwrap();
        assert_eq!(
            first.iter().map(|(i, tx)| (*i, tx.nonce)).collect::<Vec<_>>(),
            vec![(0, 1), (1, 2)]
        );
        assert_eq!(queue.pending().unwrap(), 3);

        let rest = queue.take(10).unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].0, 2);
        assert!(queue.take(1).unwrap().is_empty());
        assert_eq!(queue.append(&Transaction::new(0, 1, 1, 1, 9)).unwrap(), 5);
    }
}

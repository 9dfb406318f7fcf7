//! Fixed-depth incremental Merkle tree.
//!
//! The tree keeps three caches next to its leaves:
//!
//! - `zeros[level]`: the root of an empty subtree of height `level`.
//! - `filled_subtrees[level]`: the value of the even node on the insertion
//!   frontier at `level`, used as the left sibling of the next odd insert.
//! - `filled_paths[level][position]`: every node value ever produced at that
//!   position, so authentication paths are lookups rather than recomputation.
//!
//! Inserts, updates and path queries are all `O(depth)`.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use halo2curves_axiom::bn256::Fr;
use tracing::debug;

use crate::snapshot::{LeafRecord, LeafSelection, TreeMetadata};
use crate::{MerklePath, MimcSponge, TreeError, TreeHasher, TreeLeaf};

pub const MAX_DEPTH: usize = 32;

#[derive(Clone, Debug, PartialEq)]
pub struct MerkleTree<P, H = MimcSponge> {
    depth: usize,
    zero_value: Fr,
    root: Fr,
    leaves: Vec<Fr>,
    leaves_raw: Vec<P>,
    next_leaf_index: u64,
    max_leaf_index: u64,
    zeros: Vec<Fr>,
    filled_subtrees: Vec<Fr>,
    filled_paths: Vec<BTreeMap<u64, Fr>>,
    hasher: PhantomData<H>,
}

impl<P, H: TreeHasher> MerkleTree<P, H> {
    /// Creates an empty tree whose missing leaves are `zero_value`.
    pub fn new(depth: usize, zero_value: Fr) -> Result<Self, TreeError> {
        let zeros = zero_ladder::<H>(depth, zero_value)?;
        let root = H::hash_pair(zeros[depth - 1], zeros[depth - 1]);

        Ok(Self {
            depth,
            zero_value,
            root,
            leaves: Vec::new(),
            leaves_raw: Vec::new(),
            next_leaf_index: 0,
            max_leaf_index: 1u64 << depth,
            filled_subtrees: zeros.clone(),
            zeros,
            filled_paths: vec![BTreeMap::new(); depth],
            hasher: PhantomData,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn zero_value(&self) -> Fr {
        self.zero_value
    }

    pub fn root(&self) -> Fr {
        self.root
    }

    pub fn next_leaf_index(&self) -> u64 {
        self.next_leaf_index
    }

    pub fn max_leaf_index(&self) -> u64 {
        self.max_leaf_index
    }

    pub fn is_empty(&self) -> bool {
        self.next_leaf_index == 0
    }

    pub fn leaf(&self, index: u64) -> Option<Fr> {
        self.leaves.get(usize::try_from(index).ok()?).copied()
    }

    pub fn leaf_raw(&self, index: u64) -> Option<&P> {
        self.leaves_raw.get(usize::try_from(index).ok()?)
    }

    pub fn leaves(&self) -> &[Fr] {
        &self.leaves
    }

    pub fn leaves_raw(&self) -> &[P] {
        &self.leaves_raw
    }

    pub fn zeros(&self) -> &[Fr] {
        &self.zeros
    }

    pub fn filled_subtrees(&self) -> &[Fr] {
        &self.filled_subtrees
    }

    pub fn filled_paths(&self) -> &[BTreeMap<u64, Fr>] {
        &self.filled_paths
    }

    /// Appends a leaf and returns its index.
    pub fn insert(&mut self, leaf: Fr, raw: P) -> Result<u64, TreeError> {
        if self.next_leaf_index + 1 >= self.max_leaf_index {
            return Err(TreeError::TreeFull {
                capacity: self.max_leaf_index,
            });
        }

        let index = self.next_leaf_index;
        let mut position = index;
        let mut node = leaf;

        for level in 0..self.depth {
            let (left, right) = if position % 2 == 0 {
                let right = self.zeros[level];
                self.filled_subtrees[level] = node;
                self.filled_paths[level].insert(position, node);
                self.filled_paths[level].insert(position + 1, right);
                (node, right)
            } else {
                let left = self.filled_subtrees[level];
                self.filled_paths[level].insert(position - 1, left);
                self.filled_paths[level].insert(position, node);
                (left, node)
            };
            node = H::hash_pair(left, right);
            position /= 2;
        }

        self.root = node;
        self.leaves.push(leaf);
        self.leaves_raw.push(raw);
        self.next_leaf_index += 1;

        debug!(index, root = ?self.root, "inserted merkle leaf");
        Ok(index)
    }

    /// Replaces an inserted leaf.
    ///
    /// The cached path of the current leaf must still fold to the current root;
    /// otherwise the tree is desynchronized and nothing is written.
    pub fn update(&mut self, index: u64, leaf: Fr, raw: P) -> Result<(), TreeError> {
        let path = self.update_path(index)?;
        let slot = index as usize;

        let computed = path.compute_root::<H>(self.leaves[slot]);
        if computed != self.root {
            return Err(TreeError::Desync {
                index,
                expected: self.root,
                computed,
            });
        }

        let frontier = self.next_leaf_index - 1;
        let mut position = index;
        let mut node = leaf;

        for (level, sibling) in path.siblings.iter().enumerate() {
            self.filled_paths[level].insert(position, node);
            if position == (frontier >> level) & !1 {
                self.filled_subtrees[level] = node;
            }
            node = if position % 2 == 0 {
                H::hash_pair(node, *sibling)
            } else {
                H::hash_pair(*sibling, node)
            };
            position /= 2;
        }

        self.root = node;
        self.leaves[slot] = leaf;
        self.leaves_raw[slot] = raw;

        debug!(index, root = ?self.root, "updated merkle leaf");
        Ok(())
    }

    /// Sibling values and direction bits for an inserted leaf.
    pub fn update_path(&self, index: u64) -> Result<MerklePath, TreeError> {
        if index >= self.next_leaf_index {
            return Err(TreeError::IndexNotInserted {
                index,
                next: self.next_leaf_index,
            });
        }

        let mut siblings = Vec::with_capacity(self.depth);
        let mut indices = Vec::with_capacity(self.depth);
        let mut position = index;

        for level in 0..self.depth {
            let sibling_position = position ^ 1;
            let sibling = self.filled_paths[level]
                .get(&sibling_position)
                .copied()
                .ok_or(TreeError::MissingSibling {
                    level,
                    position: sibling_position,
                })?;
            siblings.push(sibling);
            indices.push((position & 1) as u8);
            position /= 2;
        }

        Ok(MerklePath { siblings, indices })
    }

    /// True when `path` authenticates `leaf` against the current root.
    pub fn verify_path(&self, leaf: Fr, path: &MerklePath) -> bool {
        path.depth() == self.depth && path.compute_root::<H>(leaf) == self.root
    }

    pub fn metadata(&self) -> TreeMetadata {
        TreeMetadata {
            depth: self.depth,
            zero_value: self.zero_value,
            root: self.root,
            next_leaf_index: self.next_leaf_index,
            zeros: self.zeros.clone(),
            filled_subtrees: self.filled_subtrees.clone(),
            filled_paths: self.filled_paths.clone(),
        }
    }

    /// Leaf records chosen by `selection`; unknown indices are skipped.
    pub fn leaf_records(&self, selection: &LeafSelection) -> Vec<LeafRecord<P>>
    where
        P: Clone,
    {
        let indices: Vec<u64> = match selection {
            LeafSelection::Latest => self.next_leaf_index.checked_sub(1).into_iter().collect(),
            LeafSelection::Indices(indices) => indices.clone(),
            LeafSelection::All => (0..self.next_leaf_index).collect(),
        };

        indices
            .into_iter()
            .filter_map(|index| {
                Some(LeafRecord {
                    index,
                    hash: self.leaf(index)?,
                    raw: self.leaf_raw(index)?.clone(),
                })
            })
            .collect()
    }

    /// Rebuilds a tree from stored parts.
    ///
    /// Leaves must cover `0..next_leaf_index` exactly once, and every stored
    /// leaf must authenticate against the stored root through the stored paths.
    pub fn from_parts(
        metadata: TreeMetadata,
        mut records: Vec<LeafRecord<P>>,
    ) -> Result<Self, TreeError> {
        let depth = metadata.depth;
        let zeros = zero_ladder::<H>(depth, metadata.zero_value)?;
        if zeros != metadata.zeros {
            return Err(TreeError::CorruptSnapshot(
                "zero ladder does not match zero value".into(),
            ));
        }
        if metadata.filled_subtrees.len() != depth || metadata.filled_paths.len() != depth {
            return Err(TreeError::CorruptSnapshot(format!(
                "cache levels do not match depth {depth}"
            )));
        }
        let max_leaf_index = 1u64 << depth;
        if metadata.next_leaf_index >= max_leaf_index {
            return Err(TreeError::CorruptSnapshot(format!(
                "next leaf index {} exceeds capacity {max_leaf_index}",
                metadata.next_leaf_index
            )));
        }

        records.sort_by_key(|record| record.index);
        let contiguous = records.len() as u64 == metadata.next_leaf_index
            && records
                .iter()
                .enumerate()
                .all(|(i, record)| record.index == i as u64);
        if !contiguous {
            return Err(TreeError::CorruptSnapshot(format!(
                "expected leaves 0..{}, found {} records",
                metadata.next_leaf_index,
                records.len()
            )));
        }

        let (leaves, leaves_raw): (Vec<Fr>, Vec<P>) = records
            .into_iter()
            .map(|record| (record.hash, record.raw))
            .unzip();

        let tree = Self {
            depth,
            zero_value: metadata.zero_value,
            root: metadata.root,
            leaves,
            leaves_raw,
            next_leaf_index: metadata.next_leaf_index,
            max_leaf_index,
            zeros,
            filled_subtrees: metadata.filled_subtrees,
            filled_paths: metadata.filled_paths,
            hasher: PhantomData,
        };

        if tree.is_empty() {
            let empty_root = H::hash_pair(tree.zeros[depth - 1], tree.zeros[depth - 1]);
            if empty_root != tree.root {
                return Err(TreeError::CorruptSnapshot("empty tree root mismatch".into()));
            }
        }
        for (index, leaf) in tree.leaves.iter().enumerate() {
            let computed = tree.update_path(index as u64)?.compute_root::<H>(*leaf);
            if computed != tree.root {
                return Err(TreeError::Desync {
                    index: index as u64,
                    expected: tree.root,
                    computed,
                });
            }
        }

        Ok(tree)
    }
}

impl<P: TreeLeaf, H: TreeHasher> MerkleTree<P, H> {
    /// Inserts a payload under its own leaf hash.
    pub fn insert_leaf(&mut self, raw: P) -> Result<u64, TreeError> {
        let leaf = raw.leaf_hash();
        self.insert(leaf, raw)
    }

    /// Updates a payload under its own leaf hash.
    pub fn update_leaf(&mut self, index: u64, raw: P) -> Result<(), TreeError> {
        let leaf = raw.leaf_hash();
        self.update(index, leaf, raw)
    }
}

fn zero_ladder<H: TreeHasher>(depth: usize, zero_value: Fr) -> Result<Vec<Fr>, TreeError> {
    if depth == 0 || depth > MAX_DEPTH {
        return Err(TreeError::InvalidDepth {
            depth,
            max: MAX_DEPTH,
        });
    }
    let mut zeros = Vec::with_capacity(depth);
    let mut current = zero_value;
    for _ in 0..depth {
        zeros.push(current);
        current = H::hash_pair(current, current);
    }
    Ok(zeros)
}

#[cfg(test)]
mod tests {
    use super::*;
    use halo2curves_axiom::ff::Field;
    use proptest::prelude::*;
    use zkr_common::{hash_left_right, multi_hash};

    type Tree = MerkleTree<Vec<Fr>>;

    fn payload(a: u64, b: u64) -> Vec<Fr> {
        vec![Fr::from(a), Fr::from(b)]
    }

    /// Reference root computed level by level from the raw leaves.
    fn naive_root(depth: usize, zero_value: Fr, leaves: &[Fr]) -> Fr {
        let mut level_nodes = leaves.to_vec();
        let mut zero = zero_value;
        for _ in 0..depth {
            if level_nodes.len() % 2 == 1 {
                level_nodes.push(zero);
            }
            if level_nodes.is_empty() {
                level_nodes.push(zero);
                level_nodes.push(zero);
            }
            level_nodes = level_nodes
                .chunks(2)
                .map(|pair| hash_left_right(pair[0], pair[1]))
                .collect();
            zero = hash_left_right(zero, zero);
        }
        level_nodes[0]
    }

    #[test]
    fn fresh_trees_with_same_parameters_are_equal() {
        let a = Tree::new(4, Fr::ZERO).unwrap();
        let b = Tree::new(4, Fr::ZERO).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.root(), naive_root(4, Fr::ZERO, &[]));
    }

    #[test]
    fn trees_with_different_leaves_are_not_equal() {
        let mut a = Tree::new(4, Fr::ZERO).unwrap();
        let mut b = Tree::new(4, Fr::ZERO).unwrap();
        a.insert_leaf(payload(1, 2)).unwrap();
        b.insert_leaf(payload(3, 4)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn single_leaf_root_matches_hashing_against_zeros() {
        let mut tree = Tree::new(4, Fr::ZERO).unwrap();
        let leaf = multi_hash(&[Fr::from(1), Fr::from(2)]);
        tree.insert(leaf, payload(1, 2)).unwrap();

        let mut expected = leaf;
        for zero in tree.zeros() {
            expected = hash_left_right(expected, *zero);
        }
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn insert_rejects_when_full() {
        let mut tree = Tree::new(2, Fr::ZERO).unwrap();
        for i in 0..3 {
            assert_eq!(tree.insert_leaf(payload(i, i)).unwrap(), i);
        }
        let err = tree.insert_leaf(payload(9, 9)).unwrap_err();
        assert_eq!(err, TreeError::TreeFull { capacity: 4 });
        assert_eq!(tree.next_leaf_index(), 3);
    }

    #[test]
    fn invalid_depth_is_rejected() {
        assert!(matches!(
            Tree::new(0, Fr::ZERO),
            Err(TreeError::InvalidDepth { depth: 0, .. })
        ));
        assert!(Tree::new(MAX_DEPTH + 1, Fr::ZERO).is_err());
    }

    #[test]
    fn update_rejects_uninserted_index() {
        let mut tree = Tree::new(3, Fr::ZERO).unwrap();
        tree.insert_leaf(payload(1, 1)).unwrap();
        assert_eq!(
            tree.update_leaf(1, payload(2, 2)),
            Err(TreeError::IndexNotInserted { index: 1, next: 1 })
        );
        assert!(tree.update_path(5).is_err());
    }

    #[test]
    fn update_matches_a_tree_built_with_the_new_leaf() {
        let mut updated = Tree::new(3, Fr::ZERO).unwrap();
        let mut rebuilt = Tree::new(3, Fr::ZERO).unwrap();
        for i in 0..3 {
            updated.insert_leaf(payload(i, 0)).unwrap();
        }
        updated.update_leaf(1, payload(42, 42)).unwrap();

        for raw in [payload(0, 0), payload(42, 42), payload(2, 0)] {
            rebuilt.insert_leaf(raw).unwrap();
        }
        assert_eq!(updated.root(), rebuilt.root());
        assert_eq!(updated.leaf_raw(1), Some(&payload(42, 42)));
    }

    #[test]
    fn update_on_the_frontier_is_seen_by_later_inserts() {
        let mut updated = Tree::new(3, Fr::ZERO).unwrap();
        for i in 0..3 {
            updated.insert_leaf(payload(i, 0)).unwrap();
        }
        updated.update_leaf(2, payload(7, 7)).unwrap();
        updated.update_leaf(0, payload(8, 8)).unwrap();
        updated.insert_leaf(payload(3, 0)).unwrap();
        updated.insert_leaf(payload(4, 0)).unwrap();

        let expected: Vec<Fr> = [payload(8, 8), payload(1, 0), payload(7, 7), payload(3, 0), payload(4, 0)]
            .iter()
            .map(|raw| raw.leaf_hash())
            .collect();
        assert_eq!(updated.root(), naive_root(3, Fr::ZERO, &expected));
    }

    #[test]
    fn update_detects_desynchronized_cache() {
        let mut tree = Tree::new(3, Fr::ZERO).unwrap();
        tree.insert_leaf(payload(1, 1)).unwrap();
        tree.insert_leaf(payload(2, 2)).unwrap();
        let snapshot = tree.clone();

        tree.root = Fr::from(12345);
        let err = tree.update_leaf(0, payload(3, 3)).unwrap_err();
        assert!(matches!(err, TreeError::Desync { index: 0, .. }));
        assert!(err.is_fatal());
        assert_eq!(tree.leaves(), snapshot.leaves());
        assert_eq!(tree.filled_paths(), snapshot.filled_paths());
    }

    #[test]
    fn clones_are_independent() {
        let mut original = Tree::new(3, Fr::ZERO).unwrap();
        original.insert_leaf(payload(1, 1)).unwrap();
        let copy = original.clone();
        original.update_leaf(0, payload(5, 5)).unwrap();
        assert_ne!(original, copy);
        assert_eq!(copy.leaf_raw(0), Some(&payload(1, 1)));
    }

    #[test]
    fn from_parts_restores_an_equal_tree() {
        let mut tree = Tree::new(3, Fr::from(7)).unwrap();
        for i in 0..5 {
            tree.insert_leaf(payload(i, i + 1)).unwrap();
        }
        tree.update_leaf(3, payload(30, 31)).unwrap();

        let restored =
            Tree::from_parts(tree.metadata(), tree.leaf_records(&LeafSelection::All)).unwrap();
        assert_eq!(restored, tree);
    }

    #[test]
    fn from_parts_rejects_missing_leaves() {
        let mut tree = Tree::new(3, Fr::ZERO).unwrap();
        tree.insert_leaf(payload(1, 1)).unwrap();
        tree.insert_leaf(payload(2, 2)).unwrap();
        let err = Tree::from_parts(tree.metadata(), tree.leaf_records(&LeafSelection::Latest))
            .unwrap_err();
        assert!(matches!(err, TreeError::CorruptSnapshot(_)));
    }

    #[test]
    fn metadata_serializes_with_decimal_scalars() {
        let mut tree = Tree::new(2, Fr::ZERO).unwrap();
        tree.insert_leaf(payload(1, 2)).unwrap();
        let json = serde_json::to_value(tree.metadata()).unwrap();
        assert_eq!(json["depth"], 2);
        assert_eq!(json["zero_value"], "0");
        assert!(json["filled_paths"][0]["1"].is_string());
        let decoded: TreeMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, tree.metadata());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn paths_fold_to_root_for_every_leaf(values in prop::collection::vec(any::<u64>(), 1..15)) {
            let mut tree = Tree::new(4, Fr::ZERO).unwrap();
            for value in &values {
                tree.insert_leaf(vec![Fr::from(*value)]).unwrap();
            }
            prop_assert_eq!(tree.root(), naive_root(4, Fr::ZERO, tree.leaves()));
            for index in 0..tree.next_leaf_index() {
                let path = tree.update_path(index).unwrap();
                let leaf = tree.leaf(index).unwrap();
                prop_assert!(tree.verify_path(leaf, &path));
            }
        }

        #[test]
        fn updates_keep_paths_consistent(
            values in prop::collection::vec(any::<u64>(), 2..12),
            edits in prop::collection::vec((any::<prop::sample::Index>(), any::<u64>()), 1..6),
        ) {
            let mut tree = Tree::new(4, Fr::ZERO).unwrap();
            for value in &values {
                tree.insert_leaf(vec![Fr::from(*value)]).unwrap();
            }
            for (slot, value) in edits {
                let index = slot.index(values.len()) as u64;
                tree.update_leaf(index, vec![Fr::from(value)]).unwrap();
            }
            prop_assert_eq!(tree.root(), naive_root(4, Fr::ZERO, tree.leaves()));
            for index in 0..tree.next_leaf_index() {
                let path = tree.update_path(index).unwrap();
                prop_assert!(tree.verify_path(tree.leaf(index).unwrap(), &path));
            }
        }
    }
}

//! Persistable pieces of a tree.
//!
//! A tree is stored as one [`TreeMetadata`] row plus one [`LeafRecord`] per
//! leaf. Stores upsert the metadata on every save and the leaves chosen by a
//! [`LeafSelection`]; loading hands both back to `MerkleTree::from_parts`.

use std::collections::BTreeMap;

use halo2curves_axiom::bn256::Fr;
use serde::{Deserialize, Serialize};
use zkr_common::serde_fr;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMetadata {
    pub depth: usize,
    #[serde(with = "serde_fr")]
    pub zero_value: Fr,
    #[serde(with = "serde_fr")]
    pub root: Fr,
    pub next_leaf_index: u64,
    #[serde(with = "serde_fr::seq")]
    pub zeros: Vec<Fr>,
    #[serde(with = "serde_fr::seq")]
    pub filled_subtrees: Vec<Fr>,
    #[serde(with = "serde_fr::levels")]
    pub filled_paths: Vec<BTreeMap<u64, Fr>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafRecord<P> {
    pub index: u64,
    #[serde(with = "serde_fr")]
    pub hash: Fr,
    pub raw: P,
}

/// Which leaves a save writes alongside the metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LeafSelection {
    /// The most recently inserted leaf.
    #[default]
    Latest,
    Indices(Vec<u64>),
    All,
}

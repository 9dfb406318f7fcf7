use halo2curves_axiom::bn256::Fr;
use serde::{Deserialize, Serialize};
use zkr_common::serde_fr;

use crate::TreeHasher;

/// Authentication path from a leaf to the root.
///
/// `indices[level]` is 0 when the node at that level is a left child and 1
/// when it is a right child.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    #[serde(with = "serde_fr::seq")]
    pub siblings: Vec<Fr>,
    pub indices: Vec<u8>,
}

impl MerklePath {
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    /// Folds `leaf` upward through the siblings.
    pub fn compute_root<H: TreeHasher>(&self, leaf: Fr) -> Fr {
        self.siblings
            .iter()
            .zip(&self.indices)
            .fold(leaf, |node, (sibling, bit)| {
                if *bit == 0 {
                    H::hash_pair(node, *sibling)
                } else {
                    H::hash_pair(*sibling, node)
                }
            })
    }
}

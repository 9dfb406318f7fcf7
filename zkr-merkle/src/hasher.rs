use std::fmt::Debug;

use halo2curves_axiom::bn256::Fr;
use zkr_common::{hash_left_right, multi_hash};

/// Two-to-one node compression.
pub trait TreeHasher: Clone + Debug + Default + PartialEq + Send + Sync + 'static {
    fn hash_pair(left: Fr, right: Fr) -> Fr;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MimcSponge;

impl TreeHasher for MimcSponge {
    fn hash_pair(left: Fr, right: Fr) -> Fr {
        hash_left_right(left, right)
    }
}

/// A leaf payload that knows its own leaf hash.
pub trait TreeLeaf {
    fn leaf_hash(&self) -> Fr;
}

impl TreeLeaf for Vec<Fr> {
    fn leaf_hash(&self) -> Fr {
        multi_hash(self)
    }
}

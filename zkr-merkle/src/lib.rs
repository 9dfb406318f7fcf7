//! zkr-merkle
//!
//! Incremental authenticated Merkle tree over the BN254 scalar field. The
//! tree is generic over its leaf payload and its node hasher; the default
//! hasher is the MiMC sponge from `zkr-common`.

mod error;
mod hasher;
mod path;
pub mod snapshot;
mod tree;

pub use error::TreeError;
pub use hasher::{MimcSponge, TreeHasher, TreeLeaf};
pub use path::MerklePath;
pub use snapshot::{LeafRecord, LeafSelection, TreeMetadata};
pub use tree::{MerkleTree, MAX_DEPTH};

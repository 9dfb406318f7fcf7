use halo2curves_axiom::bn256::Fr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("invalid tree depth {depth}; supported depths are 1..={max}")]
    InvalidDepth { depth: usize, max: usize },

    #[error("tree is full ({capacity} leaf slots)")]
    TreeFull { capacity: u64 },

    #[error("leaf index {index} has not been inserted (next leaf index is {next})")]
    IndexNotInserted { index: u64, next: u64 },

    #[error("tree desynchronized at leaf {index}: cached root {expected:?}, recomputed {computed:?}")]
    Desync { index: u64, expected: Fr, computed: Fr },

    #[error("no cached sibling at level {level}, position {position}")]
    MissingSibling { level: usize, position: u64 },

    #[error("corrupt tree snapshot: {0}")]
    CorruptSnapshot(String),
}

impl TreeError {
    /// Desynchronization means cached state can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TreeError::Desync { .. } | TreeError::CorruptSnapshot(_))
    }
}

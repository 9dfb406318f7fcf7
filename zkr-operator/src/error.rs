//! Error types for the operator.

use thiserror::Error;
use zkr_merkle::TreeError;

use crate::models::Wei;
use crate::ports::{LedgerError, ProverError, StoreError};

/// A proposed transfer was rejected. Raised before any tree mutation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown account at leaf index {index}")]
    UnknownAccount { index: u64 },

    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Wei, required: Wei },

    #[error("fee {fee} is below the minimum fee {minimum}")]
    FeeTooLow { fee: Wei, minimum: Wei },

    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("balance overflow at leaf index {index}")]
    BalanceOverflow { index: u64 },
}

/// Aggregated error type for operator services.
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Capacity or indexing errors from the tree; nothing was mutated.
    #[error(transparent)]
    Tree(TreeError),

    /// Off-chain state no longer matches the ledger. Fatal until resync.
    #[error("tree desynchronized: {0}")]
    Desync(String),

    #[error("proof invalid: {0}")]
    ProofInvalid(String),

    #[error("nullifier already used")]
    NullifierReused,

    #[error(transparent)]
    Ledger(LedgerError),

    #[error(transparent)]
    Prover(#[from] ProverError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("operator is shutting down")]
    ShuttingDown,
}

impl OperatorError {
    /// Get a machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            OperatorError::Validation(err) => match err {
                ValidationError::UnknownAccount { .. } => "UNKNOWN_ACCOUNT",
                ValidationError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
                ValidationError::FeeTooLow { .. } => "FEE_TOO_LOW",
                ValidationError::NonceMismatch { .. } => "NONCE_MISMATCH",
                ValidationError::InvalidSignature => "INVALID_SIGNATURE",
                ValidationError::BalanceOverflow { .. } => "BALANCE_OVERFLOW",
            },
            OperatorError::Tree(err) => match err {
                TreeError::TreeFull { .. } => "TREE_FULL",
                TreeError::IndexNotInserted { .. } => "INDEX_NOT_INSERTED",
                _ => "TREE_ERROR",
            },
            OperatorError::Desync(_) => "DESYNC",
            OperatorError::ProofInvalid(_) => "PROOF_INVALID",
            OperatorError::NullifierReused => "NULLIFIER_REUSED",
            OperatorError::Ledger(_) => "LEDGER_ERROR",
            OperatorError::Prover(_) => "PROVER_ERROR",
            OperatorError::Store(_) => "STORE_ERROR",
            OperatorError::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperatorError::Ledger(LedgerError::Rpc(_))
                | OperatorError::Prover(ProverError::Timeout(_))
                | OperatorError::Store(_)
        )
    }

    /// Desync stops all further mutation of the affected tree.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OperatorError::Desync(_))
    }

    /// Get HTTP status code suggestion.
    pub fn suggested_status_code(&self) -> u16 {
        match self {
            OperatorError::Validation(_) => 400,
            OperatorError::Tree(TreeError::TreeFull { .. }) => 507,
            OperatorError::Tree(_) => 400,
            OperatorError::Desync(_) => 503,
            OperatorError::ProofInvalid(_) => 422,
            OperatorError::NullifierReused => 409,
            OperatorError::Ledger(_) => 502,
            OperatorError::Prover(_) => 500,
            OperatorError::Store(_) => 500,
            OperatorError::ShuttingDown => 503,
        }
    }
}

impl From<TreeError> for OperatorError {
    fn from(err: TreeError) -> Self {
        if err.is_fatal() {
            OperatorError::Desync(err.to_string())
        } else {
            OperatorError::Tree(err)
        }
    }
}

impl From<LedgerError> for OperatorError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NullifierReused => OperatorError::NullifierReused,
            LedgerError::ProofRejected(reason) => OperatorError::ProofInvalid(reason),
            other => OperatorError::Ledger(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_stable_codes() {
        let err = OperatorError::from(ValidationError::NonceMismatch { expected: 2, got: 5 });
        assert_eq!(err.error_code(), "NONCE_MISMATCH");
        assert_eq!(err.suggested_status_code(), 400);
        assert!(!err.is_retryable());
    }

    #[test]
    fn tree_desync_becomes_fatal_operator_error() {
        let err = OperatorError::from(TreeError::CorruptSnapshot("bad".into()));
        assert!(err.is_fatal());
        assert_eq!(err.error_code(), "DESYNC");

        let full = OperatorError::from(TreeError::TreeFull { capacity: 4 });
        assert!(!full.is_fatal());
        assert_eq!(full.error_code(), "TREE_FULL");
    }

    #[test]
    fn ledger_rejections_surface_as_taxonomy_errors() {
        assert!(matches!(
            OperatorError::from(LedgerError::NullifierReused),
            OperatorError::NullifierReused
        ));
        assert!(matches!(
            OperatorError::from(LedgerError::ProofRejected("stale root".into())),
            OperatorError::ProofInvalid(_)
        ));
        assert!(OperatorError::from(LedgerError::Rpc("timeout".into())).is_retryable());
    }
}

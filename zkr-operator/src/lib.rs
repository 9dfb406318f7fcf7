//! zkr-operator
//!
//! Off-chain operator for a zk-rollup payment system. It validates signed
//! transfers against an authenticated balance tree, folds queued transfers
//! into batch witnesses for the proving engine, submits proven batches to the
//! rollup ledger, and reconciles the ledger's deposit and withdraw events back
//! into the tree.
//!
//! All tree mutation goes through [`state::TreeState`], which serializes
//! writers and halts on desynchronization.

pub mod adapters;
pub mod batch;
pub mod config;
pub mod error;
pub mod models;
pub mod operator;
pub mod pipeline;
pub mod ports;
pub mod reconciler;
pub mod state;
pub mod transfer;
pub mod validator;
pub mod withdraw;
pub mod witness;

pub use batch::{BatchOutcome, BatchProcessor, BatchReport};
pub use config::{LedgerKind, OperatorConfig, ProverKind};
pub use error::{OperatorError, ValidationError};
pub use models::{ether, milliether, BalanceLeaf, BalanceTree, Transaction, Wei};
pub use operator::Operator;
pub use pipeline::{apply_transfer, fold_batch, BatchFold, RejectedTransfer, TransferStep};
pub use reconciler::{apply_event, rebuild_tree, Reconciler};
pub use state::TreeState;
pub use transfer::TransferService;
pub use validator::{FeePolicy, Validator};
pub use withdraw::{WithdrawRequest, WithdrawService};
pub use witness::{BatchWitness, WithdrawWitness};

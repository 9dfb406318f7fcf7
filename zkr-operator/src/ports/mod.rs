//! Collaborator interfaces: the ledger contract, the proving engine and the
//! persistent stores.

pub mod ledger;
pub mod prover;
pub mod store;

pub use ledger::{Ledger, LedgerError, LedgerEvent, LedgerEventKind, LedgerReceipt, UserData};
pub use prover::{Circuit, Prover, ProverError, SolidityProof};
pub use store::{StoreError, TreeStore, TxQueue};

//! Concrete implementations of the ports.

pub mod dev_prover;
pub mod eth_ledger;
pub mod memory_ledger;
pub mod sled_store;
pub mod snarkjs_prover;

pub use dev_prover::DevProver;
pub use eth_ledger::{EthEventListener, EthLedger};
pub use memory_ledger::InMemoryLedger;
pub use sled_store::{open_db, temporary_db, SledTreeStore, SledTxQueue};
pub use snarkjs_prover::SnarkjsProver;

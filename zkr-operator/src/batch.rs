//! Batch assembly, proving and submission.
//!
//! One cycle takes `batch_size` queued transfers, folds them into the tree,
//! proves the resulting witness, checks the proof locally and submits it with
//! `rollUp`. The fold is committed before proving; a later proof or ledger
//! failure aborts the batch without rolling the tree back or re-queuing.

use std::sync::Arc;
use std::time::Duration;

use halo2curves_axiom::bn256::Fr;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::OperatorError;
use crate::models::Transaction;
use crate::pipeline::RejectedTransfer;
use crate::ports::{Circuit, Ledger, LedgerReceipt, Prover, TxQueue};
use crate::state::TreeState;
use crate::validator::Validator;

/// A submitted batch.
#[derive(Clone, Debug)]
pub struct BatchReport {
    pub initial_root: Fr,
    pub final_root: Fr,
    pub applied: Vec<Transaction>,
    pub rejected: Vec<RejectedTransfer>,
    pub receipt: LedgerReceipt,
}

#[derive(Clone, Debug)]
pub enum BatchOutcome {
    /// Fewer than `batch_size` transfers are waiting.
    Idle { pending: u64 },
    /// Every taken transfer failed re-validation; nothing to prove.
    Empty { rejected: Vec<RejectedTransfer> },
    /// A stop was requested after folding; the batch was not submitted.
    Discarded { applied: usize },
    Submitted(BatchReport),
}

pub struct BatchProcessor {
    state: Arc<TreeState>,
    queue: Arc<dyn TxQueue>,
    prover: Arc<dyn Prover>,
    ledger: Arc<dyn Ledger>,
    validator: Validator,
    batch_size: usize,
    interval: Duration,
}

impl BatchProcessor {
    pub fn new(
        state: Arc<TreeState>,
        queue: Arc<dyn TxQueue>,
        prover: Arc<dyn Prover>,
        ledger: Arc<dyn Ledger>,
        validator: Validator,
        batch_size: usize,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            queue,
            prover,
            ledger,
            validator,
            batch_size: batch_size.max(1),
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Runs one batch cycle.
    pub async fn run_once(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<BatchOutcome, OperatorError> {
        self.state.ensure_synced().await?;

        let pending = self.queue.pending()?;
        if pending < self.batch_size as u64 {
            return Ok(BatchOutcome::Idle { pending });
        }

        let txs: Vec<Transaction> = self
            .queue
            .take(self.batch_size)?
            .into_iter()
            .map(|(_, tx)| tx)
            .collect();
        let fold = self.state.fold_and_commit(&txs, &self.validator).await?;
        if fold.is_empty() {
            warn!(rejected = fold.rejected.len(), "every transfer in the batch was stale");
            return Ok(BatchOutcome::Empty {
                rejected: fold.rejected,
            });
        }
        if *shutdown.borrow() {
            warn!(applied = fold.applied.len(), "stop requested; discarding folded batch");
            return Ok(BatchOutcome::Discarded {
                applied: fold.applied.len(),
            });
        }

        let initial_root = fold.witness.initial_root();
        let final_root = fold.witness.final_balance_tree_root;
        let proof = self.prover.prove_batch(&fold.witness).await?;
        if !self.prover.verify(Circuit::Batch, &proof).await? {
            return Err(OperatorError::ProofInvalid(
                "batch proof failed local verification".into(),
            ));
        }
        if *shutdown.borrow() {
            warn!(applied = fold.applied.len(), "stop requested; discarding proven batch");
            return Ok(BatchOutcome::Discarded {
                applied: fold.applied.len(),
            });
        }

        let receipt = self.ledger.roll_up(&proof).await?;
        info!(
            applied = fold.applied.len(),
            rejected = fold.rejected.len(),
            initial_root = ?initial_root,
            final_root = ?final_root,
            tx_hash = %receipt.tx_hash,
            "batch rolled up"
        );
        Ok(BatchOutcome::Submitted(BatchReport {
            initial_root,
            final_root,
            applied: fold.applied,
            rejected: fold.rejected,
            receipt,
        }))
    }

    /// Runs batch cycles on a fixed interval until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.batch_size,
            interval_secs = self.interval.as_secs(),
            "starting batch processor"
        );
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once(&shutdown).await {
                        Ok(BatchOutcome::Idle { pending }) => debug!(pending, "waiting for a full batch"),
                        Ok(BatchOutcome::Submitted(report)) => {
                            debug!(tx_hash = %report.receipt.tx_hash, "batch cycle complete")
                        }
                        Ok(outcome) => debug!(?outcome, "batch cycle ended without submission"),
                        Err(err) if err.is_fatal() => error!(%err, "batch processing halted until resync"),
                        Err(err) => warn!(%err, code = err.error_code(), "batch aborted"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("batch processor stopping");
                        return;
                    }
                }
            }
        }
    }
}

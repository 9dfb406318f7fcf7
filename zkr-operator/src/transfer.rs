//! Inbound transfer acceptance.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::OperatorError;
use crate::models::Transaction;
use crate::ports::TxQueue;
use crate::state::TreeState;
use crate::validator::Validator;

/// Validates transfers against the committed tree and queues the accepted
/// ones in arrival order.
#[derive(Clone)]
pub struct TransferService {
    state: Arc<TreeState>,
    queue: Arc<dyn TxQueue>,
    validator: Validator,
    shutdown: watch::Receiver<bool>,
}

impl TransferService {
    pub fn new(
        state: Arc<TreeState>,
        queue: Arc<dyn TxQueue>,
        validator: Validator,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            state,
            queue,
            validator,
            shutdown,
        }
    }

    /// Returns the queue index of the accepted transfer. Refused once the
    /// stop signal is raised, since the batch loop no longer drains the queue.
    pub async fn submit(&self, tx: Transaction) -> Result<u64, OperatorError> {
        if *self.shutdown.borrow() {
            return Err(OperatorError::ShuttingDown);
        }
        self.state.ensure_synced().await?;
        if let Err(err) = self
            .state
            .read(|tree| self.validator.validate(tree, &tx))
            .await
        {
            debug!(from = tx.from, to = tx.to, nonce = tx.nonce, %err, "transfer rejected");
            return Err(err.into());
        }

        let index = self.queue.append(&tx)?;
        info!(
            queue_index = index,
            from = tx.from,
            to = tx.to,
            amount = %tx.amount,
            fee = %tx.fee,
            nonce = tx.nonce,
            "transfer accepted"
        );
        Ok(index)
    }

    pub fn pending(&self) -> Result<u64, OperatorError> {
        Ok(self.queue.pending()?)
    }
}

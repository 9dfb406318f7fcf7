//! Collaborator wiring and task lifecycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sled::Db;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::adapters::{
    open_db, DevProver, EthEventListener, EthLedger, InMemoryLedger, SledTreeStore, SledTxQueue,
    SnarkjsProver,
};
use crate::batch::BatchProcessor;
use crate::config::{LedgerKind, OperatorConfig, ProverKind};
use crate::models::BalanceTree;
use crate::ports::{Ledger, LedgerEvent, Prover, TreeStore, TxQueue};
use crate::reconciler::Reconciler;
use crate::state::TreeState;
use crate::transfer::TransferService;
use crate::validator::Validator;
use crate::withdraw::WithdrawService;

/// Every long-lived collaborator of one operator process.
pub struct Operator {
    config: OperatorConfig,
    db: Db,
    state: Arc<TreeState>,
    queue: Arc<dyn TxQueue>,
    prover: Arc<dyn Prover>,
    ledger: Arc<dyn Ledger>,
    ledger_address: Option<String>,
    events: Option<mpsc::Receiver<LedgerEvent>>,
    listener: Option<EthEventListener>,
    stop: Arc<watch::Sender<bool>>,
}

impl Operator {
    /// Opens storage and connects the configured ledger and prover.
    pub async fn build(config: OperatorConfig) -> Result<Self> {
        let db = open_db(&config.db_path)
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;

        let prover: Arc<dyn Prover> = match &config.prover {
            ProverKind::Dev => Arc::new(DevProver::new()),
            ProverKind::Snarkjs {
                circuits_dir,
                snarkjs_bin,
            } => Arc::new(SnarkjsProver::new(circuits_dir.clone(), snarkjs_bin.clone())),
        };

        let (sender, receiver) = mpsc::channel(config.event_channel_capacity.max(1));
        let (ledger, ledger_address, events, listener) = match &config.ledger {
            LedgerKind::Memory => {
                // The process-local ledger resumes from the persisted tree.
                let tree = match SledTreeStore::new(&db)?.load(&config.tree_name)? {
                    Some(tree) => tree,
                    None => BalanceTree::new(config.tree_depth, config.tree_zero_value)?,
                };
                let (ledger, events) =
                    InMemoryLedger::with_tree(tree, prover.clone(), config.event_channel_capacity);
                let ledger: Arc<dyn Ledger> = Arc::new(ledger);
                (ledger, None, events, None)
            }
            LedgerKind::Ethereum {
                rpc_url,
                rollup_address,
                private_key,
                poll_interval_secs,
                start_block,
            } => {
                let ledger = EthLedger::connect(rpc_url, rollup_address, private_key).await?;
                let address = format!("{:?}", ledger.address());
                let listener = EthEventListener::new(
                    rpc_url,
                    rollup_address,
                    sender,
                    Duration::from_secs((*poll_interval_secs).max(1)),
                    *start_block,
                )?;
                let ledger: Arc<dyn Ledger> = Arc::new(ledger);
                (ledger, Some(address), receiver, Some(listener))
            }
        };

        Self::assemble(config, db, prover, ledger, ledger_address, events, listener)
    }

    /// Wires explicit collaborators around an already open database.
    pub fn with_parts(
        config: OperatorConfig,
        db: Db,
        prover: Arc<dyn Prover>,
        ledger: Arc<dyn Ledger>,
        events: mpsc::Receiver<LedgerEvent>,
    ) -> Result<Self> {
        Self::assemble(config, db, prover, ledger, None, events, None)
    }

    fn assemble(
        config: OperatorConfig,
        db: Db,
        prover: Arc<dyn Prover>,
        ledger: Arc<dyn Ledger>,
        ledger_address: Option<String>,
        events: mpsc::Receiver<LedgerEvent>,
        listener: Option<EthEventListener>,
    ) -> Result<Self> {
        let store = Arc::new(SledTreeStore::new(&db)?);
        let queue: Arc<dyn TxQueue> = Arc::new(SledTxQueue::new(&db)?);
        let state = Arc::new(
            TreeState::open(
                config.tree_name.clone(),
                config.tree_depth,
                config.tree_zero_value,
                store,
            )
            .context("Failed to open balance tree")?,
        );

        Ok(Self {
            config,
            db,
            state,
            queue,
            prover,
            ledger,
            ledger_address,
            events: Some(events),
            listener,
            stop: Arc::new(watch::channel(false).0),
        })
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub fn state(&self) -> Arc<TreeState> {
        self.state.clone()
    }

    pub fn ledger(&self) -> Arc<dyn Ledger> {
        self.ledger.clone()
    }

    /// Contract address when running against an EVM ledger.
    pub fn ledger_address(&self) -> Option<&str> {
        self.ledger_address.as_deref()
    }

    pub fn validator(&self) -> Validator {
        Validator::new(self.config.fee_policy())
    }

    pub fn transfer_service(&self) -> TransferService {
        TransferService::new(
            self.state.clone(),
            self.queue.clone(),
            self.validator(),
            self.stop.subscribe(),
        )
    }

    pub fn withdraw_service(&self) -> WithdrawService {
        WithdrawService::new(self.state.clone(), self.prover.clone(), self.ledger.clone())
    }

    pub fn batch_processor(&self) -> BatchProcessor {
        BatchProcessor::new(
            self.state.clone(),
            self.queue.clone(),
            self.prover.clone(),
            self.ledger.clone(),
            self.validator(),
            self.config.batch_size,
            self.config.batch_interval(),
        )
    }

    /// Takes the ledger event stream for a caller that drives reconciliation
    /// itself. [`Operator::spawn`] then runs without a reconciler.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<LedgerEvent>> {
        self.events.take()
    }

    /// Stop signal shared by the background tasks and the transfer service.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    /// Handle that raises the stop signal from another task.
    pub fn shutdown_trigger(&self) -> Arc<watch::Sender<bool>> {
        self.stop.clone()
    }

    /// Refuses new transfers and asks the background tasks to stop.
    pub fn shutdown(&self) {
        if !self.stop.send_replace(true) {
            info!("operator shutdown requested");
        }
    }

    /// Starts the reconciler, the batch processor and, for EVM ledgers, the
    /// event listener.
    pub fn spawn(&mut self) -> Vec<JoinHandle<()>> {
        let shutdown = self.shutdown_signal();
        let mut handles = Vec::new();

        if let Some(events) = self.events.take() {
            let reconciler = Reconciler::new(self.state.clone());
            handles.push(tokio::spawn(async move {
                if let Err(err) = reconciler.run(events).await {
                    error!(%err, "reconciler exited");
                }
            }));
        }

        let batches = self.batch_processor();
        handles.push(tokio::spawn(batches.run(shutdown.clone())));

        if let Some(listener) = self.listener.take() {
            handles.push(tokio::spawn(async move {
                if let Err(err) = listener.run(shutdown).await {
                    error!("rollup event listener exited: {err:#}");
                }
            }));
        }

        info!(
            tree = %self.config.tree_name,
            batch_size = self.config.batch_size,
            "operator tasks started"
        );
        handles
    }

    /// Flushes storage to disk.
    pub async fn close(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .context("Failed to flush database")?;
        info!("operator storage flushed");
        Ok(())
    }
}

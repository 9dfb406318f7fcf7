//! Rollup contract on an EVM chain.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::abi::Detokenize;
use ethers::prelude::*;
use halo2curves_axiom::bn256::Fr;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use zkr_common::field::{fr_from_bytes, fr_to_bytes};
use zkr_common::Point;

use crate::models::Wei;
use crate::ports::{
    Ledger, LedgerError, LedgerEvent, LedgerEventKind, LedgerReceipt, SolidityProof, UserData,
};

abigen!(
    RollUpContract,
    r#"[
        function deposit(uint256 pubkeyX, uint256 pubkeyY) payable
        function withdraw(uint256 amount, uint256[2] a, uint256[2][2] b, uint256[2] c, uint256[3] input)
        function withdrawAll(uint256[2] a, uint256[2][2] b, uint256[2] c, uint256[3] input)
        function rollUp(uint256[2] a, uint256[2][2] b, uint256[2] c, uint256[] input)
        function getUserData(uint256 pubkeyHash) view returns (uint256, uint256, uint256, uint256, uint256)
        function isPublicKeyRegistered(uint256 pubkeyX, uint256 pubkeyY) view returns (bool)
        function getAccuredFees() view returns (uint256)
        event Deposit(uint256 balanceTreeIndex, uint256 publicKeyX, uint256 publicKeyY, uint256 balance, uint256 nonce)
        event Withdraw(uint256 balanceTreeIndex, uint256 publicKeyX, uint256 publicKeyY, uint256 balance, uint256 nonce)
    ]"#
);

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

pub fn fr_to_u256(value: &Fr) -> U256 {
    U256::from_little_endian(&fr_to_bytes(value))
}

pub fn u256_to_fr(value: U256) -> Option<Fr> {
    let mut bytes = [0u8; 32];
    value.to_little_endian(&mut bytes);
    fr_from_bytes(&bytes).ok()
}

fn u256_to_u64(value: U256) -> Option<u64> {
    (value <= U256::from(u64::MAX)).then(|| value.as_u64())
}

fn u256_to_wei(value: U256) -> Option<Wei> {
    (value <= U256::from(u128::MAX)).then(|| value.as_u128())
}

fn decimal(value: &str) -> Result<U256, LedgerError> {
    U256::from_dec_str(value)
        .map_err(|err| LedgerError::ProofRejected(format!("proof coordinate {value:?}: {err}")))
}

type ProofPoints = ([U256; 2], [[U256; 2]; 2], [U256; 2]);

fn proof_points(proof: &SolidityProof) -> Result<ProofPoints, LedgerError> {
    Ok((
        [decimal(&proof.a[0])?, decimal(&proof.a[1])?],
        [
            [decimal(&proof.b[0][0])?, decimal(&proof.b[0][1])?],
            [decimal(&proof.b[1][0])?, decimal(&proof.b[1][1])?],
        ],
        [decimal(&proof.c[0])?, decimal(&proof.c[1])?],
    ))
}

fn withdraw_inputs(proof: &SolidityProof) -> Result<[U256; 3], LedgerError> {
    match proof.inputs.as_slice() {
        [x, y, nullifier] => Ok([fr_to_u256(x), fr_to_u256(y), fr_to_u256(nullifier)]),
        _ => Err(LedgerError::ProofRejected(
            "withdraw proof must carry three public inputs".into(),
        )),
    }
}

fn classify(err: ContractError<Client>) -> LedgerError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("nullifier") {
        LedgerError::NullifierReused
    } else if lower.contains("proof") || lower.contains("verif") {
        LedgerError::ProofRejected(message)
    } else if err.is_revert() {
        LedgerError::Reverted(message)
    } else {
        LedgerError::Rpc(message)
    }
}

pub struct EthLedger {
    contract: RollUpContract<Client>,
}

impl EthLedger {
    pub async fn connect(rpc_url: &str, rollup_address: &str, private_key: &str) -> Result<Self> {
        let provider =
            Provider::<Http>::try_from(rpc_url).context("Failed to create HTTP provider")?;
        let chain_id = provider
            .get_chainid()
            .await
            .context("Failed to fetch chain id")?;
        let wallet = private_key
            .parse::<LocalWallet>()
            .context("Invalid operator private key")?
            .with_chain_id(chain_id.as_u64());
        let address: Address = rollup_address
            .parse()
            .context("Invalid rollup contract address")?;

        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        info!(%address, chain_id = chain_id.as_u64(), "connected to rollup contract");
        Ok(Self {
            contract: RollUpContract::new(address, client),
        })
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    async fn send<D: Detokenize>(
        &self,
        call: ContractCall<Client, D>,
    ) -> Result<LedgerReceipt, LedgerError> {
        let pending = call.send().await.map_err(classify)?;
        let tx_hash = pending.tx_hash();
        debug!(?tx_hash, "ledger transaction sent");

        let receipt = pending
            .await
            .map_err(|err| LedgerError::Rpc(err.to_string()))?
            .ok_or_else(|| LedgerError::Rpc(format!("transaction {tx_hash:?} was dropped")))?;
        if receipt.status != Some(U64::from(1)) {
            return Err(LedgerError::Reverted(format!(
                "transaction {tx_hash:?} reverted"
            )));
        }
        Ok(LedgerReceipt {
            tx_hash: format!("{:?}", receipt.transaction_hash),
            block_number: receipt.block_number.map(|block| block.as_u64()),
        })
    }
}

#[async_trait]
impl Ledger for EthLedger {
    async fn deposit(&self, public_key: Point, value: Wei) -> Result<LedgerReceipt, LedgerError> {
        let call = self
            .contract
            .deposit(fr_to_u256(&public_key.x), fr_to_u256(&public_key.y))
            .value(U256::from(value));
        self.send(call).await
    }

    async fn withdraw(
        &self,
        amount: Wei,
        proof: &SolidityProof,
    ) -> Result<LedgerReceipt, LedgerError> {
        let (a, b, c) = proof_points(proof)?;
        let call = self
            .contract
            .withdraw(U256::from(amount), a, b, c, withdraw_inputs(proof)?);
        self.send(call).await
    }

    async fn withdraw_all(&self, proof: &SolidityProof) -> Result<LedgerReceipt, LedgerError> {
        let (a, b, c) = proof_points(proof)?;
        let call = self.contract.withdraw_all(a, b, c, withdraw_inputs(proof)?);
        self.send(call).await
    }

    async fn roll_up(&self, proof: &SolidityProof) -> Result<LedgerReceipt, LedgerError> {
        let (a, b, c) = proof_points(proof)?;
        let inputs = proof.inputs.iter().map(fr_to_u256).collect();
        let call = self.contract.roll_up(a, b, c, inputs);
        self.send(call).await
    }

    async fn user_data(&self, pubkey_hash: Fr) -> Result<UserData, LedgerError> {
        let (index, x, y, balance, nonce) = self
            .contract
            .get_user_data(fr_to_u256(&pubkey_hash))
            .call()
            .await
            .map_err(classify)?;
        let malformed = || LedgerError::Rpc("user data out of range".into());
        Ok(UserData {
            leaf_index: u256_to_u64(index).ok_or_else(malformed)?,
            public_key: Point::try_new(
                u256_to_fr(x).ok_or_else(malformed)?,
                u256_to_fr(y).ok_or_else(malformed)?,
            )
            .map_err(|err| LedgerError::Rpc(err.to_string()))?,
            balance: u256_to_wei(balance).ok_or_else(malformed)?,
            nonce: u256_to_u64(nonce).ok_or_else(malformed)?,
        })
    }

    async fn is_public_key_registered(&self, public_key: Point) -> Result<bool, LedgerError> {
        self.contract
            .is_public_key_registered(fr_to_u256(&public_key.x), fr_to_u256(&public_key.y))
            .call()
            .await
            .map_err(classify)
    }

    async fn accrued_fees(&self) -> Result<Wei, LedgerError> {
        let fees = self
            .contract
            .get_accured_fees()
            .call()
            .await
            .map_err(classify)?;
        u256_to_wei(fees).ok_or_else(|| LedgerError::Rpc("accrued fees out of range".into()))
    }
}

/// Polls `Deposit`/`Withdraw` logs and forwards them in emission order.
pub struct EthEventListener {
    contract: RollUpContract<Provider<Http>>,
    provider: Arc<Provider<Http>>,
    sender: mpsc::Sender<LedgerEvent>,
    poll_interval: Duration,
    next_block: u64,
}

impl EthEventListener {
    pub fn new(
        rpc_url: &str,
        rollup_address: &str,
        sender: mpsc::Sender<LedgerEvent>,
        poll_interval: Duration,
        start_block: u64,
    ) -> Result<Self> {
        let provider = Arc::new(
            Provider::<Http>::try_from(rpc_url).context("Failed to create HTTP provider")?,
        );
        let address: Address = rollup_address
            .parse()
            .context("Invalid rollup contract address")?;
        Ok(Self {
            contract: RollUpContract::new(address, provider.clone()),
            provider,
            sender,
            poll_interval,
            next_block: start_block,
        })
    }

    /// Run the listener loop until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            address = %self.contract.address(),
            from_block = self.next_block,
            "starting rollup event listener"
        );
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(0) => {}
                        Ok(count) => debug!(count, next_block = self.next_block, "forwarded ledger events"),
                        Err(err) if self.sender.is_closed() => return Err(err),
                        Err(err) => warn!("failed to fetch rollup events: {err:#}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("rollup event listener stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn poll_once(&mut self) -> Result<usize> {
        let latest = self.provider.get_block_number().await?.as_u64();
        if latest < self.next_block {
            return Ok(0);
        }

        let mut logs = self
            .contract
            .events()
            .from_block(self.next_block)
            .to_block(latest)
            .query_with_meta()
            .await?;
        logs.sort_by_key(|(_, meta)| (meta.block_number, meta.log_index));

        let count = logs.len();
        for (event, _) in logs {
            let event = decode_event(event)?;
            self.sender
                .send(event)
                .await
                .map_err(|_| anyhow!("ledger event channel closed"))?;
        }
        self.next_block = latest + 1;
        Ok(count)
    }
}

fn decode_event(event: RollUpContractEvents) -> Result<LedgerEvent> {
    let (kind, index, x, y, balance, nonce) = match event {
        RollUpContractEvents::DepositFilter(e) => (
            LedgerEventKind::Deposit,
            e.balance_tree_index,
            e.public_key_x,
            e.public_key_y,
            e.balance,
            e.nonce,
        ),
        RollUpContractEvents::WithdrawFilter(e) => (
            LedgerEventKind::Withdraw,
            e.balance_tree_index,
            e.public_key_x,
            e.public_key_y,
            e.balance,
            e.nonce,
        ),
    };
    Ok(LedgerEvent {
        kind,
        leaf_index: u256_to_u64(index).context("leaf index out of range")?,
        public_key: Point::try_new(
            u256_to_fr(x).context("public key x is not a field element")?,
            u256_to_fr(y).context("public key y is not a field element")?,
        )
        .context("event public key is off the curve")?,
        balance: u256_to_wei(balance).context("balance out of range")?,
        nonce: u256_to_u64(nonce).context("nonce out of range")?,
    })
}

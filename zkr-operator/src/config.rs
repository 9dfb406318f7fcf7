//! Operator configuration.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use halo2curves_axiom::bn256::Fr;
use zkr_common::fr_from_decimal;

use crate::validator::FeePolicy;

/// Which ledger the operator talks to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerKind {
    /// Process-local ledger with contract semantics. Useful for development.
    Memory,
    /// Rollup contract on an EVM chain.
    Ethereum {
        rpc_url: String,
        rollup_address: String,
        private_key: String,
        poll_interval_secs: u64,
        start_block: u64,
    },
}

/// Which proving backend produces batch and withdraw proofs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProverKind {
    Dev,
    Snarkjs {
        circuits_dir: PathBuf,
        snarkjs_bin: String,
    },
}

/// Operator configuration.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Name the balance tree is stored under.
    pub tree_name: String,
    pub tree_depth: usize,
    pub tree_zero_value: Fr,
    /// Transactions per rollup batch.
    pub batch_size: usize,
    pub batch_interval_secs: u64,
    pub min_fee_numerator: u128,
    pub min_fee_denominator: u128,
    /// sled database directory.
    pub db_path: PathBuf,
    pub event_channel_capacity: usize,
    pub listen_addr: SocketAddr,
    pub ledger: LedgerKind,
    pub prover: ProverKind,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            tree_name: "balance".to_string(),
            tree_depth: 4,
            tree_zero_value: Fr::from(0),
            batch_size: 4,
            batch_interval_secs: 10,
            min_fee_numerator: 3,
            min_fee_denominator: 1000,
            db_path: PathBuf::from("data/operator-db"),
            event_channel_capacity: 1024,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            ledger: LedgerKind::Memory,
            prover: ProverKind::Dev,
        }
    }
}

impl OperatorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let tree_name = lookup("ZKR_TREE_NAME").unwrap_or(defaults.tree_name);
        let tree_depth = parse_or(&lookup, "ZKR_TREE_DEPTH", defaults.tree_depth)?;
        let tree_zero_value = match lookup("ZKR_TREE_ZERO_VALUE") {
            Some(raw) => fr_from_decimal(&raw)
                .with_context(|| format!("ZKR_TREE_ZERO_VALUE is not a field element: {raw}"))?,
            None => defaults.tree_zero_value,
        };

        let batch_size = parse_or(&lookup, "ZKR_BATCH_SIZE", defaults.batch_size)?;
        if batch_size == 0 {
            bail!("ZKR_BATCH_SIZE must be at least 1");
        }
        let batch_interval_secs =
            parse_or(&lookup, "ZKR_BATCH_INTERVAL_SECS", defaults.batch_interval_secs)?;

        let min_fee_numerator =
            parse_or(&lookup, "ZKR_MIN_FEE_NUMERATOR", defaults.min_fee_numerator)?;
        let min_fee_denominator =
            parse_or(&lookup, "ZKR_MIN_FEE_DENOMINATOR", defaults.min_fee_denominator)?;
        if min_fee_denominator == 0 {
            bail!("ZKR_MIN_FEE_DENOMINATOR must be non-zero");
        }

        let db_path = lookup("ZKR_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);
        let event_channel_capacity = parse_or(
            &lookup,
            "ZKR_EVENT_CHANNEL_CAPACITY",
            defaults.event_channel_capacity,
        )?;
        let listen_addr = parse_or(&lookup, "ZKR_LISTEN_ADDR", defaults.listen_addr)?;

        let ledger = match lookup("ZKR_LEDGER").as_deref().unwrap_or("memory") {
            "memory" => LedgerKind::Memory,
            "ethereum" => LedgerKind::Ethereum {
                rpc_url: lookup("ETHEREUM_RPC_URL")
                    .context("ETHEREUM_RPC_URL must be set when ZKR_LEDGER=ethereum")?,
                rollup_address: lookup("ROLLUP_ADDRESS")
                    .context("ROLLUP_ADDRESS must be set when ZKR_LEDGER=ethereum")?,
                private_key: lookup("OPERATOR_PRIVATE_KEY")
                    .context("OPERATOR_PRIVATE_KEY must be set when ZKR_LEDGER=ethereum")?,
                poll_interval_secs: parse_or(&lookup, "ZKR_POLL_INTERVAL_SECS", 5)?,
                start_block: parse_or(&lookup, "ZKR_START_BLOCK", 0)?,
            },
            other => bail!("unknown ZKR_LEDGER value: {other}"),
        };

        let prover = match lookup("ZKR_PROVER").as_deref().unwrap_or("dev") {
            "dev" => ProverKind::Dev,
            "snarkjs" => ProverKind::Snarkjs {
                circuits_dir: lookup("ZKR_CIRCUITS_DIR")
                    .map(PathBuf::from)
                    .context("ZKR_CIRCUITS_DIR must be set when ZKR_PROVER=snarkjs")?,
                snarkjs_bin: lookup("ZKR_SNARKJS_BIN").unwrap_or_else(|| "snarkjs".to_string()),
            },
            other => bail!("unknown ZKR_PROVER value: {other}"),
        };

        Ok(Self {
            tree_name,
            tree_depth,
            tree_zero_value,
            batch_size,
            batch_interval_secs,
            min_fee_numerator,
            min_fee_denominator,
            db_path,
            event_channel_capacity,
            listen_addr,
            ledger,
            prover,
        })
    }

    pub fn fee_policy(&self) -> FeePolicy {
        FeePolicy::new(self.min_fee_numerator, self.min_fee_denominator)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_secs(self.batch_interval_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err| anyhow::anyhow!("{key}={raw}: {err}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = OperatorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.tree_name, "balance");
        assert_eq!(config.tree_depth, 4);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.ledger, LedgerKind::Memory);
        assert_eq!(config.prover, ProverKind::Dev);
        assert_eq!(config.fee_policy(), FeePolicy::default());
    }

    #[test]
    fn ethereum_ledger_requires_connection_settings() {
        let err = OperatorConfig::from_lookup(lookup(&[("ZKR_LEDGER", "ethereum")])).unwrap_err();
        assert!(err.to_string().contains("ETHEREUM_RPC_URL"));

        let config = OperatorConfig::from_lookup(lookup(&[
            ("ZKR_LEDGER", "ethereum"),
            ("ETHEREUM_RPC_URL", "http://localhost:8545"),
            ("ROLLUP_ADDRESS", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            ("OPERATOR_PRIVATE_KEY", "0x01"),
            ("ZKR_START_BLOCK", "12"),
        ]))
        .unwrap();
        assert!(matches!(
            config.ledger,
            LedgerKind::Ethereum { start_block: 12, poll_interval_secs: 5, .. }
        ));
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(OperatorConfig::from_lookup(lookup(&[("ZKR_BATCH_SIZE", "0")])).is_err());
        assert!(OperatorConfig::from_lookup(lookup(&[("ZKR_TREE_DEPTH", "deep")])).is_err());
        assert!(OperatorConfig::from_lookup(lookup(&[("ZKR_PROVER", "magic")])).is_err());
        assert!(OperatorConfig::from_lookup(lookup(&[("ZKR_MIN_FEE_DENOMINATOR", "0")])).is_err());
    }
}

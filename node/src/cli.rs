//! # CLI Interface
//!
//! Defines the command-line argument structure for `zap-vault-node` using
//! `clap` derive. Supports three subcommands: `run`, `networks`, and
//! `version`. Every `run` flag can also be set through a `ZAP_VAULT_*`
//! environment variable.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand};

use zap_vault::config::{
    DEFAULT_CHAIN_ID, DEFAULT_MAX_DELEGATES_PER_OWNER, DEFAULT_METRICS_PORT, DEFAULT_RPC_PORT,
    DEFAULT_TRANSFER_TIMEOUT,
};
use zap_vault::{Account, VaultConfig};

/// Zap vault devnet node.
///
/// Hosts a single delegated-access vault backed by an in-memory token
/// ledger, serves it over HTTP/WebSocket, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "zap-vault-node",
    about = "Zap delegated-access vault node",
    version,
    propagate_version = true
)]
pub struct VaultNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the vault node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the vault node.
    Run(RunArgs),
    /// Print the supported network deployment table and exit.
    Networks(NetworksArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Port for the HTTP/WebSocket API.
    #[arg(long, env = "ZAP_VAULT_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "ZAP_VAULT_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Chain id whose contract deployment this node serves.
    #[arg(long, env = "ZAP_VAULT_CHAIN_ID", default_value_t = DEFAULT_CHAIN_ID)]
    pub chain_id: u64,

    /// JSON file with extra network deployments, merged over the built-in table.
    #[arg(long, env = "ZAP_VAULT_NETWORKS")]
    pub networks: Option<PathBuf>,

    /// Bound on each external token transfer, in milliseconds. 0 disables it.
    #[arg(
        long,
        env = "ZAP_VAULT_TRANSFER_TIMEOUT_MS",
        default_value_t = DEFAULT_TRANSFER_TIMEOUT.as_millis() as u64
    )]
    pub transfer_timeout_ms: u64,

    /// Maximum number of delegates per owner.
    #[arg(long, env = "ZAP_VAULT_MAX_DELEGATES", default_value_t = DEFAULT_MAX_DELEGATES_PER_OWNER)]
    pub max_delegates: usize,

    /// Custody account on the token ledger. Defaults to a fixed devnet address.
    #[arg(long, env = "ZAP_VAULT_CUSTODIAN")]
    pub custodian: Option<Account>,

    /// Fund a devnet account on the token ledger, as `<ACCOUNT>=<AMOUNT>`.
    /// May be repeated.
    #[arg(long = "allocate", value_name = "ACCOUNT=AMOUNT")]
    pub allocations: Vec<Allocation>,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "ZAP_VAULT_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

impl RunArgs {
    /// Builds the vault configuration from the parsed flags.
    pub fn vault_config(&self) -> VaultConfig {
        VaultConfig {
            transfer_timeout: match self.transfer_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            max_delegates_per_owner: self.max_delegates,
        }
    }

    /// The custody account, falling back to the devnet default.
    pub fn custodian(&self) -> Account {
        self.custodian
            .unwrap_or_else(|| Account::from_label("zap-vault-custodian"))
    }
}

/// Arguments for the `networks` subcommand.
#[derive(Parser, Debug)]
pub struct NetworksArgs {
    /// JSON file with extra network deployments, merged over the built-in table.
    #[arg(long, env = "ZAP_VAULT_NETWORKS")]
    pub networks: Option<PathBuf>,
}

/// A devnet funding instruction: give `account` `amount` tokens at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub account: Account,
    pub amount: u64,
}

impl FromStr for Allocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (account, amount) = s
            .split_once('=')
            .ok_or_else(|| format!("expected <ACCOUNT>=<AMOUNT>, got '{s}'"))?;
        Ok(Self {
            account: account
                .trim()
                .parse()
                .map_err(|e| format!("bad account '{account}': {e}"))?,
            amount: amount
                .trim()
                .parse()
                .map_err(|e| format!("bad amount '{amount}': {e}"))?,
        })
    }
}

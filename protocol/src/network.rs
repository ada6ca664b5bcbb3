//! # Network Deployments
//!
//! Maps a chain id to the contract addresses deployed on that chain. The
//! supported set is a table, not control flow: adding a network means adding
//! a row (in code via [`NetworkRegistry::register`], or as data via
//! [`NetworkRegistry::from_json`]). Asking for an unknown chain is an
//! ordinary `Err`, never a panic.
//!
//! The JSON format is an array of deployments:
//!
//! ```json
//! [
//!   {
//!     "chain_id": 31337,
//!     "name": "hardhat",
//!     "addresses": {
//!       "media_factory": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
//!       "market": "0xe7f1725e7734ce288f8367e1bb143e90bb3f0512",
//!       "media": "0x9fe46736679d2d9a65f0992f2272de9f3c7fa6e0"
//!     }
//!   }
//! ]
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::Account;

// ---------------------------------------------------------------------------
// Chain Identifiers
// ---------------------------------------------------------------------------

/// Ethereum mainnet.
pub const CHAIN_ID_MAINNET: u64 = 1;

/// Rinkeby testnet.
pub const CHAIN_ID_RINKEBY: u64 = 4;

/// BNB Smart Chain mainnet.
pub const CHAIN_ID_BSC: u64 = 56;

/// BNB Smart Chain testnet.
pub const CHAIN_ID_BSC_TESTNET: u64 = 97;

/// Local hardhat node.
pub const CHAIN_ID_HARDHAT: u64 = 31337;

/// Returns a friendly name for a chain id, mainly for logging.
pub fn chain_name(chain_id: u64) -> String {
    match chain_id {
        CHAIN_ID_MAINNET => "mainnet".to_string(),
        CHAIN_ID_RINKEBY => "rinkeby".to_string(),
        CHAIN_ID_BSC => "bsc".to_string(),
        CHAIN_ID_BSC_TESTNET => "bsc-testnet".to_string(),
        CHAIN_ID_HARDHAT => "hardhat".to_string(),
        other => format!("unknown({other})"),
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while resolving network deployments.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// No deployment is registered for this chain id.
    #[error("unsupported network: chain id {0}")]
    UnsupportedNetwork(u64),

    /// The deployment table could not be parsed.
    #[error("malformed deployment table: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Deployments
// ---------------------------------------------------------------------------

/// Addresses of the contracts deployed on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAddresses {
    /// The media factory contract.
    pub media_factory: Account,
    /// The marketplace contract.
    pub market: Account,
    /// The media (NFT) contract.
    pub media: Account,
}

/// One row of the deployment table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDeployment {
    /// Chain id the contracts live on.
    pub chain_id: u64,
    /// Human-readable network name.
    pub name: String,
    /// Deployed contract addresses.
    pub addresses: ContractAddresses,
}

// Deterministic addresses of the first three contracts a fresh hardhat node
// deploys from its default account.

const HARDHAT_MEDIA_FACTORY: Account = Account::from_bytes([
    0x5f, 0xbd, 0xb2, 0x31, 0x56, 0x78, 0xaf, 0xec, 0xb3, 0x67,
    0xf0, 0x32, 0xd9, 0x3f, 0x64, 0x2f, 0x64, 0x18, 0x0a, 0xa3,
]);

const HARDHAT_MARKET: Account = Account::from_bytes([
    0xe7, 0xf1, 0x72, 0x5e, 0x77, 0x34, 0xce, 0x28, 0x8f, 0x83,
    0x67, 0xe1, 0xbb, 0x14, 0x3e, 0x90, 0xbb, 0x3f, 0x05, 0x12,
]);

const HARDHAT_MEDIA: Account = Account::from_bytes([
    0x9f, 0xe4, 0x67, 0x36, 0x67, 0x9d, 0x2d, 0x9a, 0x65, 0xf0,
    0x99, 0x2f, 0x22, 0x72, 0xde, 0x9f, 0x3c, 0x7f, 0xa6, 0xe0,
]);

fn hardhat_deployment() -> NetworkDeployment {
    NetworkDeployment {
        chain_id: CHAIN_ID_HARDHAT,
        name: chain_name(CHAIN_ID_HARDHAT),
        addresses: ContractAddresses {
            media_factory: HARDHAT_MEDIA_FACTORY,
            market: HARDHAT_MARKET,
            media: HARDHAT_MEDIA,
        },
    }
}

// ---------------------------------------------------------------------------
// NetworkRegistry
// ---------------------------------------------------------------------------

/// The chain id -> deployment table.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    deployments: BTreeMap<u64, NetworkDeployment>,
}

impl NetworkRegistry {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the built-in table (local hardhat only).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(hardhat_deployment());
        registry
    }

    /// Parses a JSON deployment array into a table.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Malformed`] if the JSON does not match the
    /// deployment schema or contains an invalid address.
    pub fn from_json(json: &str) -> Result<Self, NetworkError> {
        let rows: Vec<NetworkDeployment> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for row in rows {
            registry.register(row);
        }
        Ok(registry)
    }

    /// Adds or replaces the row for `deployment.chain_id`. Returns the row
    /// it replaced, if any.
    pub fn register(&mut self, deployment: NetworkDeployment) -> Option<NetworkDeployment> {
        self.deployments.insert(deployment.chain_id, deployment)
    }

    /// Merges every row of `other` into this table, `other` winning on
    /// conflicts.
    pub fn extend(&mut self, other: NetworkRegistry) {
        self.deployments.extend(other.deployments);
    }

    /// Resolves the contract addresses for `chain_id`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::UnsupportedNetwork`] if the chain has no row.
    pub fn contract_addresses(&self, chain_id: u64) -> Result<&ContractAddresses, NetworkError> {
        self.deployment(chain_id).map(|d| &d.addresses)
    }

    /// Resolves the full deployment row for `chain_id`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::UnsupportedNetwork`] if the chain has no row.
    pub fn deployment(&self, chain_id: u64) -> Result<&NetworkDeployment, NetworkError> {
        self.deployments
            .get(&chain_id)
            .ok_or(NetworkError::UnsupportedNetwork(chain_id))
    }

    /// Supported chain ids in ascending order.
    pub fn supported_chain_ids(&self) -> Vec<u64> {
        self.deployments.keys().copied().collect()
    }

    /// All rows in ascending chain id order.
    pub fn deployments(&self) -> impl Iterator<Item = &NetworkDeployment> {
        self.deployments.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"[
        {
            "chain_id": 97,
            "name": "bsc-testnet",
            "addresses": {
                "media_factory": "0x1111111111111111111111111111111111111111",
                "market": "0x2222222222222222222222222222222222222222",
                "media": "0x3333333333333333333333333333333333333333"
            }
        }
    ]"#;

    #[test]
    fn test_default_table_contains_hardhat() {
        let registry = NetworkRegistry::with_defaults();
        let addresses = registry.contract_addresses(CHAIN_ID_HARDHAT).unwrap();
        assert_eq!(
            addresses.media_factory.to_string(),
            "0x5fbdb2315678afecb367f032d93f642f64180aa3"
        );
        assert_eq!(
            addresses.market.to_string(),
            "0xe7f1725e7734ce288f8367e1bb143e90bb3f0512"
        );
        assert_eq!(
            addresses.media.to_string(),
            "0x9fe46736679d2d9a65f0992f2272de9f3c7fa6e0"
        );
    }

    #[test]
    fn test_unknown_chain_is_an_error() {
        let registry = NetworkRegistry::with_defaults();
        let err = registry.contract_addresses(CHAIN_ID_MAINNET).unwrap_err();
        assert!(matches!(err, NetworkError::UnsupportedNetwork(1)));
        assert_eq!(err.to_string(), "unsupported network: chain id 1");
    }

    #[test]
    fn test_table_loads_from_json() {
        let registry = NetworkRegistry::from_json(TABLE).unwrap();
        assert_eq!(registry.supported_chain_ids(), vec![CHAIN_ID_BSC_TESTNET]);

        let row = registry.deployment(CHAIN_ID_BSC_TESTNET).unwrap();
        assert_eq!(row.name, "bsc-testnet");
        assert_eq!(row.addresses.market, Account::from_bytes([0x22; 20]));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let bad_address = TABLE.replace("0x2222222222222222222222222222222222222222", "0x22");
        assert!(matches!(
            NetworkRegistry::from_json(&bad_address),
            Err(NetworkError::Malformed(_))
        ));
        assert!(matches!(
            NetworkRegistry::from_json("{}"),
            Err(NetworkError::Malformed(_))
        ));
    }

    #[test]
    fn test_register_replaces_row() {
        let mut registry = NetworkRegistry::with_defaults();
        let mut row = hardhat_deployment();
        row.name = "local".into();

        let previous = registry.register(row).expect("hardhat row existed");
        assert_eq!(previous.name, "hardhat");
        assert_eq!(registry.deployment(CHAIN_ID_HARDHAT).unwrap().name, "local");
    }

    #[test]
    fn test_extend_merges_tables() {
        let mut registry = NetworkRegistry::with_defaults();
        registry.extend(NetworkRegistry::from_json(TABLE).unwrap());
        assert_eq!(
            registry.supported_chain_ids(),
            vec![CHAIN_ID_BSC_TESTNET, CHAIN_ID_HARDHAT]
        );
    }

    #[test]
    fn test_chain_name_formatting() {
        assert_eq!(chain_name(CHAIN_ID_BSC), "bsc");
        assert_eq!(chain_name(12345), "unknown(12345)");
    }
}

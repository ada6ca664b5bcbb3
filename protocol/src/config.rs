//! # Protocol Configuration & Constants
//!
//! Every tunable number in the vault lives here, together with
//! [`VaultConfig`], the per-instance knobs handed to the authorization
//! registry and the custodial ledger at construction time.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The vault protocol version reported by nodes.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Vault Limits
// ---------------------------------------------------------------------------

/// Upper bound on a single call to the external token ledger. The owner's
/// lock is held for the whole external call, so an unbounded wait would
/// stall every other caller touching the same owner.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of delegates a single owner may authorize.
pub const DEFAULT_MAX_DELEGATES_PER_OWNER: usize = 256;

/// Capacity of the vault event broadcast channel. Slow subscribers that
/// fall further behind than this lose the oldest events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Node Defaults
// ---------------------------------------------------------------------------

/// Default HTTP API port.
pub const DEFAULT_RPC_PORT: u16 = 9841;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

/// Chain id of a local hardhat node, the default devnet target.
pub const DEFAULT_CHAIN_ID: u64 = 31337;

// ---------------------------------------------------------------------------
// VaultConfig
// ---------------------------------------------------------------------------

/// Runtime configuration for a vault instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Bound on each external debit/credit. `None` waits indefinitely.
    pub transfer_timeout: Option<Duration>,

    /// Maximum delegates per owner. Grants beyond this are rejected.
    pub max_delegates_per_owner: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            transfer_timeout: Some(DEFAULT_TRANSFER_TIMEOUT),
            max_delegates_per_owner: DEFAULT_MAX_DELEGATES_PER_OWNER,
        }
    }
}

// Copyright (c) 2026 Zap Vault Developers. MIT License.
// See LICENSE for details.

//! # Zap Vault: Delegated-Access Custodial Ledger
//!
//! The vault holds fungible token balances on behalf of account owners and
//! lets an owner grant other accounts ("delegates") the right to deposit into
//! and withdraw from that balance. Actual token movement is delegated to an
//! external token ledger; the vault only keeps the books and enforces who may
//! touch them.
//!
//! ## Architecture
//!
//! - **account**: Fixed-width account addresses.
//! - **vault**: Authorization registry, custodial ledger, the external
//!   transfer capability, and the event stream.
//! - **network**: Chain id to deployed contract address resolution.
//! - **config**: Protocol constants and vault tuning knobs.
//!
//! ## Design Philosophy
//!
//! 1. Every balance mutation is checked, ordered, and reversible on failure.
//! 2. State lives in an explicit vault instance, never in ambient globals.
//! 3. Distinct owners never contend for the same lock.
//! 4. If it touches money, it has tests. Plural.

pub mod account;
pub mod config;
pub mod network;
pub mod vault;

pub use account::{Account, AccountError};
pub use config::VaultConfig;
pub use network::{ContractAddresses, NetworkDeployment, NetworkError, NetworkRegistry};
pub use vault::{
    AuthorizationError, AuthorizationRegistry, CustodialLedger, EventBus, FundsSide,
    InMemoryTokenLedger, TokenTransfer, TransferError, VaultError, VaultEvent, VaultEventKind,
};

//! # Vault Module: Delegated-Access Custody
//!
//! The vault is where custodied money lives. Owners deposit tokens, grant
//! delegates the right to move them, and withdraw them again; the vault keeps
//! the books and refuses anyone the owner has not vouched for.
//!
//! ## Architecture
//!
//! ```text
//! authorization.rs  owner -> delegate grants and access checks
//! ledger.rs         per-owner balances, deposit/withdraw ordering
//! token.rs          the external token ledger capability
//! events.rs         broadcast stream of committed state changes
//! ```
//!
//! ## Design Principles
//!
//! 1. **All amounts are `u64` in the token's smallest unit.** No floating
//!    point, overflow checked on every credit.
//!
//! 2. **Access is checked on every call, under the owner's lock.** A
//!    revocation applies to the next operation, never to a cached answer.
//!
//! 3. **No half-finished transfers.** A deposit credits the ledger only after
//!    the token ledger confirmed the debit; a withdrawal that could not pay
//!    out restores the ledger before reporting the error.

pub mod authorization;
pub mod events;
pub mod ledger;
pub mod token;

pub use authorization::{AuthorizationError, AuthorizationRegistry};
pub use events::{EventBus, VaultEvent, VaultEventKind};
pub use ledger::{CustodialLedger, FundsSide, VaultError};
pub use token::{InMemoryTokenLedger, TokenTransfer, TransferError};

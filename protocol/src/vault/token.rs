//! # External Token Transfer Capability
//!
//! The vault does not move tokens itself. It asks an external fungible-token
//! ledger to do so through the [`TokenTransfer`] trait:
//!
//! - `debit(account, amount)` pulls `amount` from `account` into vault
//!   custody (a deposit).
//! - `credit(account, amount)` pays `amount` out of vault custody to
//!   `account` (a withdrawal).
//!
//! Each call is atomic on its own and may fail on its own. Nothing here
//! promises transactions spanning two calls; the ledger's ordering and
//! compensation rules are built around exactly that.
//!
//! [`InMemoryTokenLedger`] is the devnet and test implementation: a plain
//! balance table with a designated custodian account holding everything the
//! vault has taken in.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::account::Account;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors reported by the external token ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The source account does not hold enough tokens.
    #[error("insufficient token balance for {account}: available {available}, requested {requested}")]
    InsufficientBalance {
        /// The account that was debited.
        account: Account,
        /// Its balance at the time of the call.
        available: u64,
        /// The amount requested.
        requested: u64,
    },

    /// Crediting would push the receiving balance past `u64::MAX`.
    #[error("token balance overflow for {account}: current {current}, credit {credit}")]
    Overflow {
        /// The account being credited.
        account: Account,
        /// Its balance before the credit.
        current: u64,
        /// The amount that caused the overflow.
        credit: u64,
    },

    /// The token ledger could not be reached or refused the call.
    #[error("token ledger unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// TokenTransfer
// ---------------------------------------------------------------------------

/// Typed handle to the external fungible-token ledger.
#[async_trait]
pub trait TokenTransfer: Send + Sync {
    /// Moves `amount` from `account` into vault custody.
    async fn debit(&self, account: &Account, amount: u64) -> Result<(), TransferError>;

    /// Moves `amount` out of vault custody to `account`.
    async fn credit(&self, account: &Account, amount: u64) -> Result<(), TransferError>;
}

// ---------------------------------------------------------------------------
// InMemoryTokenLedger
// ---------------------------------------------------------------------------

/// An in-process token ledger with a single custodian account.
///
/// The whole table sits behind one mutex so that every debit/credit moves
/// tokens between two accounts atomically. Fine for devnet and tests, where
/// the lock is held for a few hash map operations at most.
#[derive(Debug)]
pub struct InMemoryTokenLedger {
    custodian: Account,
    balances: Mutex<HashMap<Account, u64>>,
}

impl InMemoryTokenLedger {
    /// Creates an empty ledger whose custody account is `custodian`.
    pub fn new(custodian: Account) -> Self {
        Self {
            custodian,
            balances: Mutex::new(HashMap::new()),
        }
    }

    /// The account holding tokens taken into vault custody.
    pub fn custodian(&self) -> Account {
        self.custodian
    }

    /// Funds `account` with `amount` tokens and returns its new balance.
    ///
    /// This is harness funding (the token contract's `allocate`), not vault
    /// functionality. The vault never creates supply.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Overflow`] if the balance would exceed
    /// `u64::MAX`.
    pub fn allocate(&self, account: &Account, amount: u64) -> Result<u64, TransferError> {
        let mut balances = self.balances.lock();
        let balance = balances.entry(*account).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(TransferError::Overflow {
            account: *account,
            current: *balance,
            credit: amount,
        })?;
        Ok(*balance)
    }

    /// Returns `account`'s token balance (zero if never funded).
    pub fn balance_of(&self, account: &Account) -> u64 {
        self.balances.lock().get(account).copied().unwrap_or(0)
    }

    /// Sum of all balances, custodian included.
    pub fn total_supply(&self) -> u128 {
        self.balances.lock().values().map(|&b| u128::from(b)).sum()
    }

    fn transfer(&self, from: &Account, to: &Account, amount: u64) -> Result<(), TransferError> {
        let mut balances = self.balances.lock();

        let available = balances.get(from).copied().unwrap_or(0);
        if available < amount {
            return Err(TransferError::InsufficientBalance {
                account: *from,
                available,
                requested: amount,
            });
        }
        if from == to {
            return Ok(());
        }

        let current = balances.get(to).copied().unwrap_or(0);
        let credited = current.checked_add(amount).ok_or(TransferError::Overflow {
            account: *to,
            current,
            credit: amount,
        })?;

        balances.insert(*from, available - amount);
        balances.insert(*to, credited);
        Ok(())
    }
}

#[async_trait]
impl TokenTransfer for InMemoryTokenLedger {
    async fn debit(&self, account: &Account, amount: u64) -> Result<(), TransferError> {
        self.transfer(account, &self.custodian, amount)
    }

    async fn credit(&self, account: &Account, amount: u64) -> Result<(), TransferError> {
        self.transfer(&self.custodian, account, amount)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! # Custodial Ledger
//!
//! Holds a non-negative token balance per owner and moves it only on behalf
//! of callers the [`AuthorizationRegistry`] vouches for. Actual token
//! movement goes through the external [`TokenTransfer`] capability.
//!
//! ## Ordering
//!
//! ```text
//! deposit:  check access -> check amount -> external debit  -> ledger credit
//! withdraw: check access -> check amount -> ledger debit    -> external credit
//!                                           (restored if the credit fails)
//! ```
//!
//! A deposit touches the ledger only after the external debit succeeded, so
//! a failed or cancelled deposit leaves nothing behind. A withdrawal debits
//! the ledger first so the same balance cannot be paid out twice; if the
//! payout then fails, times out, or the caller drops the future, a
//! [`PendingWithdrawal`] guard puts the amount back before the owner's lock
//! is released.
//!
//! ## Concurrency
//!
//! Every owner has its own slot: an async mutex serializing mutations and an
//! atomic holding the balance. The mutex is held across the whole
//! check-transfer-mutate sequence, including the external call. Different
//! owners never share a slot and proceed in parallel. Balance reads load the
//! atomic directly and never wait on an in-flight mutation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::authorization::AuthorizationRegistry;
use super::events::{EventBus, VaultEventKind};
use super::token::{TokenTransfer, TransferError};
use crate::account::Account;
use crate::config::VaultConfig;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Which side of the vault ran out of funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundsSide {
    /// The depositor's balance on the external token ledger.
    External,
    /// The owner's balance inside the vault.
    Ledger,
}

impl std::fmt::Display for FundsSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FundsSide::External => write!(f, "external"),
            FundsSide::Ledger => write!(f, "ledger"),
        }
    }
}

/// Errors that can occur during deposits and withdrawals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    /// The actor is neither the owner nor one of its delegates.
    #[error("permission denied: {actor} may not act on behalf of {owner}")]
    PermissionDenied {
        /// The account that made the call.
        actor: Account,
        /// The owner whose balance was targeted.
        owner: Account,
    },

    /// Zero-amount operations are rejected outright.
    #[error("invalid amount: zero-amount operations are not permitted")]
    InvalidAmount,

    /// Not enough funds on the given side to cover the request.
    #[error("insufficient {side} funds: available {available}, requested {requested}")]
    InsufficientFunds {
        /// External for deposits, ledger for withdrawals.
        side: FundsSide,
        /// The balance at the time of the check.
        available: u64,
        /// The amount requested.
        requested: u64,
    },

    /// Crediting the owner would push its ledger balance past `u64::MAX`.
    #[error("ledger overflow for {owner}: current {current}, credit {credit}")]
    Overflow {
        /// The owner being credited.
        owner: Account,
        /// The balance before the failed credit.
        current: u64,
        /// The amount that caused the overflow.
        credit: u64,
    },

    /// The external token ledger rejected the call.
    #[error("token transfer failed: {0}")]
    Transfer(#[from] TransferError),

    /// The external token ledger did not answer in time.
    #[error("token transfer timed out after {0:?}")]
    TransferTimeout(Duration),
}

// ---------------------------------------------------------------------------
// Owner slots
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct OwnerSlot {
    /// Serializes every mutation of this owner's balance.
    lock: Mutex<()>,
    /// Written only while `lock` is held.
    balance: AtomicU64,
    /// Set by the first committed deposit. Never cleared.
    funded: AtomicBool,
}

/// Removes an owner slot that a deposit created but never funded, so failed
/// or cancelled deposits leave no entry behind.
///
/// The slot is only removed if no other call holds a handle to it, so a
/// waiter queued on the owner lock always finds its slot still mapped.
struct UnfundedSlot<'a> {
    slots: &'a DashMap<Account, Arc<OwnerSlot>>,
    owner: Account,
    committed: bool,
}

impl UnfundedSlot<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for UnfundedSlot<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // At most the map's reference and this call's own handle.
        let removed = self.slots.remove_if(&self.owner, |_, slot| {
            Arc::strong_count(slot) <= 2 && !slot.funded.load(Ordering::Acquire)
        });
        if removed.is_some() {
            debug!(owner = %self.owner, "released unfunded owner slot");
        }
    }
}

/// Restores a ledger debit unless the payout is confirmed.
///
/// Must be created after the owner's lock guard so that it drops first and
/// the restore happens while the lock is still held.
struct PendingWithdrawal<'a> {
    slot: &'a OwnerSlot,
    events: &'a EventBus,
    actor: Account,
    owner: Account,
    amount: u64,
    settled: bool,
}

impl PendingWithdrawal<'_> {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for PendingWithdrawal<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Cannot overflow: the same amount was subtracted under this lock.
        let balance = self.slot.balance.fetch_add(self.amount, Ordering::AcqRel) + self.amount;
        warn!(
            actor = %self.actor,
            owner = %self.owner,
            amount = self.amount,
            balance,
            "withdrawal payout did not complete, ledger debit restored"
        );
        self.events.publish(VaultEventKind::WithdrawalReverted {
            actor: self.actor,
            owner: self.owner,
            amount: self.amount,
            balance,
        });
    }
}

// ---------------------------------------------------------------------------
// CustodialLedger
// ---------------------------------------------------------------------------

/// Per-owner custodied balances, guarded by the authorization registry.
pub struct CustodialLedger {
    registry: Arc<AuthorizationRegistry>,
    token: Arc<dyn TokenTransfer>,
    slots: DashMap<Account, Arc<OwnerSlot>>,
    transfer_timeout: Option<Duration>,
    events: EventBus,
}

impl CustodialLedger {
    /// Creates an empty ledger.
    pub fn new(
        registry: Arc<AuthorizationRegistry>,
        token: Arc<dyn TokenTransfer>,
        config: &VaultConfig,
    ) -> Self {
        Self {
            registry,
            token,
            slots: DashMap::new(),
            transfer_timeout: config.transfer_timeout,
            events: EventBus::default(),
        }
    }

    /// Publishes balance changes on `events` instead of a private bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// The registry consulted on every mutation.
    pub fn registry(&self) -> &Arc<AuthorizationRegistry> {
        &self.registry
    }

    /// Subscribes to this ledger's balance events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<super::events::VaultEvent> {
        self.events.subscribe()
    }

    /// Deposits `amount` into `owner`'s balance, paid for by `actor`.
    ///
    /// Debits `actor` on the external token ledger, then credits `owner`.
    /// Returns the owner's new balance.
    ///
    /// # Errors
    ///
    /// - [`VaultError::PermissionDenied`] if `actor` has no access to `owner`.
    /// - [`VaultError::InvalidAmount`] if `amount` is zero.
    /// - [`VaultError::Overflow`] if the owner's balance would overflow.
    /// - [`VaultError::InsufficientFunds`] (external) if `actor` cannot pay.
    /// - [`VaultError::Transfer`] / [`VaultError::TransferTimeout`] if the
    ///   token ledger fails or stalls.
    ///
    /// On every error the ledger balance is unchanged, and an owner that was
    /// never funded is left without a slot.
    pub async fn deposit(
        &self,
        actor: &Account,
        owner: &Account,
        amount: u64,
    ) -> Result<u64, VaultError> {
        // Cheap rejection before a slot is allocated for the owner.
        self.authorize(actor, owner)?;
        Self::ensure_nonzero(amount)?;

        let slot = self.slot(owner);
        let vacancy = UnfundedSlot {
            slots: &self.slots,
            owner: *owner,
            committed: false,
        };
        let _guard = slot.lock.lock().await;
        self.authorize(actor, owner)?;

        let current = slot.balance.load(Ordering::Acquire);
        let updated = current.checked_add(amount).ok_or(VaultError::Overflow {
            owner: *owner,
            current,
            credit: amount,
        })?;

        match self.bounded(self.token.debit(actor, amount)).await? {
            Ok(()) => {}
            Err(TransferError::InsufficientBalance {
                available,
                requested,
                ..
            }) => {
                warn!(%actor, %owner, available, requested, "deposit rejected: insufficient external funds");
                return Err(VaultError::InsufficientFunds {
                    side: FundsSide::External,
                    available,
                    requested,
                });
            }
            Err(e) => {
                warn!(%actor, %owner, amount, error = %e, "deposit rejected: external debit failed");
                return Err(e.into());
            }
        }

        slot.balance.store(updated, Ordering::Release);
        slot.funded.store(true, Ordering::Release);
        vacancy.commit();
        debug!(%actor, %owner, amount, balance = updated, "deposit committed");
        self.events.publish(VaultEventKind::Deposited {
            actor: *actor,
            owner: *owner,
            amount,
            balance: updated,
        });
        Ok(updated)
    }

    /// Withdraws `amount` from `owner`'s balance and pays it to `actor`.
    ///
    /// A delegate withdrawing on an owner's behalf receives the tokens
    /// itself. Returns the owner's new balance.
    ///
    /// # Errors
    ///
    /// - [`VaultError::PermissionDenied`] if `actor` has no access to `owner`.
    /// - [`VaultError::InvalidAmount`] if `amount` is zero.
    /// - [`VaultError::InsufficientFunds`] (ledger) if `amount` exceeds the
    ///   owner's balance. Checked before the token ledger is contacted.
    /// - [`VaultError::Transfer`] / [`VaultError::TransferTimeout`] if the
    ///   payout fails or stalls; the ledger debit is restored first.
    pub async fn withdraw(
        &self,
        actor: &Account,
        owner: &Account,
        amount: u64,
    ) -> Result<u64, VaultError> {
        self.authorize(actor, owner)?;
        Self::ensure_nonzero(amount)?;

        let Some(slot) = self.existing_slot(owner) else {
            return Err(Self::overdrawn(actor, owner, 0, amount));
        };
        // Never committed: a funded slot is kept, one held open only by an
        // in-flight deposit that since failed is released.
        let _vacancy = UnfundedSlot {
            slots: &self.slots,
            owner: *owner,
            committed: false,
        };
        let _guard = slot.lock.lock().await;
        self.authorize(actor, owner)?;

        let available = slot.balance.load(Ordering::Acquire);
        if available < amount {
            return Err(Self::overdrawn(actor, owner, available, amount));
        }
        let remaining = available - amount;
        slot.balance.store(remaining, Ordering::Release);

        let pending = PendingWithdrawal {
            slot: &slot,
            events: &self.events,
            actor: *actor,
            owner: *owner,
            amount,
            settled: false,
        };

        match self.bounded(self.token.credit(actor, amount)).await {
            Ok(Ok(())) => pending.settle(),
            Ok(Err(e)) => return Err(e.into()),
            Err(timeout) => return Err(timeout),
        }

        debug!(%actor, %owner, amount, balance = remaining, "withdrawal committed");
        self.events.publish(VaultEventKind::Withdrawn {
            actor: *actor,
            owner: *owner,
            amount,
            balance: remaining,
        });
        Ok(remaining)
    }

    /// Returns `owner`'s ledger balance, zero if it never received a deposit.
    pub fn balance_of(&self, owner: &Account) -> u64 {
        self.slots
            .get(owner)
            .map(|slot| slot.balance.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Sum of all ledger balances.
    pub fn total_custodied(&self) -> u128 {
        self.slots
            .iter()
            .map(|entry| u128::from(entry.value().balance.load(Ordering::Acquire)))
            .sum()
    }

    /// Number of owners that have ever received a deposit. Deposits that
    /// fail or are cancelled do not count.
    pub fn owner_count(&self) -> usize {
        self.slots.len()
    }

    fn authorize(&self, actor: &Account, owner: &Account) -> Result<(), VaultError> {
        if self.registry.has_access(actor, owner) {
            return Ok(());
        }
        warn!(%actor, %owner, "vault access denied");
        Err(VaultError::PermissionDenied {
            actor: *actor,
            owner: *owner,
        })
    }

    fn ensure_nonzero(amount: u64) -> Result<(), VaultError> {
        if amount == 0 {
            return Err(VaultError::InvalidAmount);
        }
        Ok(())
    }

    fn overdrawn(actor: &Account, owner: &Account, available: u64, requested: u64) -> VaultError {
        warn!(%actor, %owner, available, requested, "withdrawal rejected: insufficient ledger funds");
        VaultError::InsufficientFunds {
            side: FundsSide::Ledger,
            available,
            requested,
        }
    }

    /// Returns the owner's slot, creating it on first use.
    ///
    /// The map reference is released before returning so no shard lock is
    /// ever held across an await.
    fn slot(&self, owner: &Account) -> Arc<OwnerSlot> {
        Arc::clone(self.slots.entry(*owner).or_default().value())
    }

    fn existing_slot(&self, owner: &Account) -> Option<Arc<OwnerSlot>> {
        self.slots.get(owner).map(|slot| Arc::clone(slot.value()))
    }

    /// Runs a token ledger call under the configured timeout. The outer error
    /// is the timeout, the inner one is the ledger's own answer.
    async fn bounded<F>(&self, call: F) -> Result<Result<(), TransferError>, VaultError>
    where
        F: Future<Output = Result<(), TransferError>>,
    {
        match self.transfer_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                warn!(timeout = ?limit, "token ledger call timed out");
                VaultError::TransferTimeout(limit)
            }),
            None => Ok(call.await),
        }
    }
}

impl std::fmt::Debug for CustodialLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodialLedger")
            .field("owners", &self.slots.len())
            .field("transfer_timeout", &self.transfer_timeout)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

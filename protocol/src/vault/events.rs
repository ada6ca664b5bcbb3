//! # Vault Events
//!
//! Every state change in the vault is announced on an [`EventBus`]: grants,
//! revocations, deposits, withdrawals, and the rare withdrawal that had to
//! be reverted because the external payout failed. Subscribers (the node's
//! WebSocket stream, audit tooling, tests) receive them in commit order per
//! owner.
//!
//! Publishing never blocks and never fails. If nobody is listening, the
//! event is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::account::Account;
use crate::config::EVENT_CHANNEL_CAPACITY;

/// A single vault state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEvent {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the change was committed.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    #[serde(flatten)]
    pub kind: VaultEventKind,
}

impl VaultEvent {
    /// Stamps a new event with a fresh id and the current time.
    pub fn new(kind: VaultEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// The kinds of state change the vault reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VaultEventKind {
    /// `owner` authorized `delegate`.
    AccessGranted { owner: Account, delegate: Account },
    /// `owner` withdrew `delegate`'s authorization.
    AccessRevoked { owner: Account, delegate: Account },
    /// `actor` deposited `amount` into `owner`'s balance.
    Deposited {
        actor: Account,
        owner: Account,
        amount: u64,
        balance: u64,
    },
    /// `actor` withdrew `amount` from `owner`'s balance and was paid out.
    Withdrawn {
        actor: Account,
        owner: Account,
        amount: u64,
        balance: u64,
    },
    /// A withdrawal debited the ledger but the payout did not complete, so
    /// the debit was restored.
    WithdrawalReverted {
        actor: Account,
        owner: Account,
        amount: u64,
        balance: u64,
    },
}

/// Cloneable fan-out channel for [`VaultEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<VaultEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all current subscribers.
    pub fn publish(&self, kind: VaultEventKind) {
        // No receivers is the normal state for a library user; not an error.
        let _ = self.sender.send(VaultEvent::new(kind));
    }

    /// Subscribes to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

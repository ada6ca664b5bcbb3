//! # Authorization Registry
//!
//! Tracks, per owner, the set of delegates allowed to deposit into and
//! withdraw from that owner's vault balance. A grant is a directed edge
//! `owner -> delegate`; it is never symmetric and never implied.
//!
//! ## Rules
//!
//! 1. An owner always has access to its own account. No grant entry is
//!    recorded for that, and granting yourself is a no-op.
//! 2. Only the owner may grant or revoke delegates on its own account.
//! 3. Grants are idempotent. Granting an existing delegate changes nothing.
//! 4. Access is evaluated against the live grant set on every check, so a
//!    revocation applies to the very next call.
//!
//! ## Concurrency
//!
//! Grant sets live in a [`DashMap`]. Each owner's set is mutated under its
//! shard write lock and read under the shard read lock, so a reader sees a
//! set either before or after a grant, never halfway through one. Owners
//! in different shards never contend.

use std::collections::BTreeSet;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

use super::events::{EventBus, VaultEventKind};
use crate::account::Account;
use crate::config::VaultConfig;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while changing an owner's delegate set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    /// The caller tried to change a delegate set it does not own.
    #[error("permission denied: {caller} cannot manage delegates of {owner}")]
    PermissionDenied {
        /// The account that made the call.
        caller: Account,
        /// The owner whose delegate set was targeted.
        owner: Account,
    },

    /// The owner already has the maximum number of delegates.
    #[error("delegate limit reached: {owner} already has {limit} delegates")]
    DelegateLimitReached {
        /// The owner whose delegate set is full.
        owner: Account,
        /// The configured per-owner limit.
        limit: usize,
    },
}

// ---------------------------------------------------------------------------
// AuthorizationRegistry
// ---------------------------------------------------------------------------

/// The owner -> delegate-set relation.
#[derive(Debug)]
pub struct AuthorizationRegistry {
    grants: DashMap<Account, BTreeSet<Account>>,
    max_delegates_per_owner: usize,
    events: EventBus,
}

impl AuthorizationRegistry {
    /// Creates an empty registry.
    pub fn new(config: &VaultConfig) -> Self {
        Self {
            grants: DashMap::new(),
            max_delegates_per_owner: config.max_delegates_per_owner,
            events: EventBus::default(),
        }
    }

    /// Publishes grant changes on `events` instead of a private bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Authorizes `delegate` to act on `owner`'s account.
    ///
    /// Returns `true` if the grant is new, `false` if it already existed or
    /// if `delegate == owner`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorizationError::PermissionDenied`] if `caller` is not
    /// `owner`, and [`AuthorizationError::DelegateLimitReached`] if the
    /// owner's delegate set is full.
    pub fn grant_access(
        &self,
        caller: &Account,
        owner: &Account,
        delegate: &Account,
    ) -> Result<bool, AuthorizationError> {
        Self::ensure_owner(caller, owner)?;

        if delegate == owner {
            return Ok(false);
        }

        let mut set = self.grants.entry(*owner).or_default();
        if set.contains(delegate) {
            return Ok(false);
        }
        if set.len() >= self.max_delegates_per_owner {
            drop(set);
            // A zero cap must not leave an empty row behind.
            self.grants.remove_if(owner, |_, set| set.is_empty());
            warn!(%owner, %delegate, limit = self.max_delegates_per_owner, "delegate limit reached");
            return Err(AuthorizationError::DelegateLimitReached {
                owner: *owner,
                limit: self.max_delegates_per_owner,
            });
        }
        set.insert(*delegate);
        // Published under the row guard so events follow commit order.
        self.events.publish(VaultEventKind::AccessGranted {
            owner: *owner,
            delegate: *delegate,
        });
        drop(set);

        debug!(%owner, %delegate, "access granted");
        Ok(true)
    }

    /// Withdraws `delegate`'s authorization on `owner`'s account.
    ///
    /// Returns `true` if a grant was removed, `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorizationError::PermissionDenied`] if `caller` is not
    /// `owner`.
    pub fn revoke_access(
        &self,
        caller: &Account,
        owner: &Account,
        delegate: &Account,
    ) -> Result<bool, AuthorizationError> {
        Self::ensure_owner(caller, owner)?;

        let removed = match self.grants.get_mut(owner) {
            Some(mut set) => {
                let removed = set.remove(delegate);
                if removed {
                    self.events.publish(VaultEventKind::AccessRevoked {
                        owner: *owner,
                        delegate: *delegate,
                    });
                }
                removed
            }
            None => false,
        };
        if removed {
            // Drop the owner's row once its last delegate goes.
            self.grants.remove_if(owner, |_, set| set.is_empty());
            debug!(%owner, %delegate, "access revoked");
        }
        Ok(removed)
    }

    /// Returns `true` if `actor` may act on `owner`'s account: either it is
    /// the owner, or the owner has granted it access.
    pub fn has_access(&self, actor: &Account, owner: &Account) -> bool {
        actor == owner
            || self
                .grants
                .get(owner)
                .is_some_and(|set| set.contains(actor))
    }

    /// Returns `owner`'s delegates in ascending order.
    pub fn delegates_of(&self, owner: &Account) -> Vec<Account> {
        self.grants
            .get(owner)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of owners with at least one delegate.
    pub fn owner_count(&self) -> usize {
        self.grants.len()
    }

    fn ensure_owner(caller: &Account, owner: &Account) -> Result<(), AuthorizationError> {
        if caller != owner {
            warn!(%caller, %owner, "delegate change rejected: caller is not the owner");
            return Err(AuthorizationError::PermissionDenied {
                caller: *caller,
                owner: *owner,
            });
        }
        Ok(())
    }
}

impl Default for AuthorizationRegistry {
    fn default() -> Self {
        Self::new(&VaultConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

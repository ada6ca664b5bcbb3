//! End-to-end tests for the custodial vault.
//!
//! These tests wire the authorization registry, the custodial ledger, and an
//! in-memory token ledger together the way a node does, then drive them
//! through the scenarios the vault has to get right: delegated deposits and
//! withdrawals, rejected strangers, concurrent withdrawals racing for the
//! same balance, and payouts that never complete.
//!
//! Each test builds its own vault. No shared state, no ordering dependencies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use zap_vault::{
    Account, AuthorizationRegistry, CustodialLedger, FundsSide, InMemoryTokenLedger,
    TokenTransfer, TransferError, VaultConfig, VaultError,
};

/// Tokens allocated to every test signer.
const FUNDING: u64 = 600_000;

/// Number of test signers, split evenly into owners and delegates.
const SIGNERS: usize = 20;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

struct Vault {
    registry: Arc<AuthorizationRegistry>,
    tokens: Arc<InMemoryTokenLedger>,
    ledger: Arc<CustodialLedger>,
    signers: Vec<Account>,
}

/// Spins up a vault with funded signers.
fn setup() -> Vault {
    let config = VaultConfig::default();
    let registry = Arc::new(AuthorizationRegistry::new(&config));
    let tokens = Arc::new(InMemoryTokenLedger::new(Account::from_label("vault")));
    let ledger = Arc::new(CustodialLedger::new(
        Arc::clone(&registry),
        tokens.clone(),
        &config,
    ));

    let signers: Vec<Account> = (0..SIGNERS)
        .map(|i| Account::from_label(&format!("signer-{i}")))
        .collect();
    for signer in &signers {
        tokens.allocate(signer, FUNDING).unwrap();
    }

    Vault {
        registry,
        tokens,
        ledger,
        signers,
    }
}

/// Token ledger whose payouts wait for a permit before settling.
struct GatedPayouts {
    inner: InMemoryTokenLedger,
    gate: Semaphore,
}

#[async_trait]
impl TokenTransfer for GatedPayouts {
    async fn debit(&self, account: &Account, amount: u64) -> Result<(), TransferError> {
        self.inner.debit(account, amount).await
    }

    async fn credit(&self, account: &Account, amount: u64) -> Result<(), TransferError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| TransferError::Unavailable(e.to_string()))?;
        permit.forget();
        self.inner.credit(account, amount).await
    }
}

fn gated_vault() -> (Arc<CustodialLedger>, Arc<GatedPayouts>, Account) {
    let config = VaultConfig {
        transfer_timeout: None,
        ..VaultConfig::default()
    };
    let owner = Account::from_label("owner");
    let tokens = Arc::new(GatedPayouts {
        inner: InMemoryTokenLedger::new(Account::from_label("vault")),
        gate: Semaphore::new(0),
    });
    tokens.inner.allocate(&owner, FUNDING).unwrap();

    let ledger = Arc::new(CustodialLedger::new(
        Arc::new(AuthorizationRegistry::new(&config)),
        tokens.clone(),
        &config,
    ));
    (ledger, tokens, owner)
}

/// Polls until `owner`'s balance reaches `expected` or a second passes.
async fn wait_for_balance(ledger: &CustodialLedger, owner: &Account, expected: u64) {
    for _ in 0..1_000 {
        if ledger.balance_of(owner) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("balance of {owner} never reached {expected}");
}

// ---------------------------------------------------------------------------
// 1. Authority of a user
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delegates_gain_access_only_where_granted() {
    let vault = setup();
    let (owners, delegates) = vault.signers.split_at(SIGNERS / 2);

    for (owner, delegate) in owners.iter().zip(delegates) {
        vault.registry.grant_access(owner, owner, delegate).unwrap();
        vault.ledger.deposit(delegate, owner, 1).await.unwrap();
        assert!(vault.registry.has_access(delegate, owner));
    }

    // Owners were never granted anything on the delegates' accounts.
    for (owner, delegate) in owners.iter().zip(delegates) {
        assert!(!vault.registry.has_access(owner, delegate));
        let result = vault.ledger.withdraw(owner, delegate, 1).await;
        assert!(matches!(result, Err(VaultError::PermissionDenied { .. })));
    }

    // A grant does not leak to other owners.
    for (i, delegate) in delegates.iter().enumerate() {
        let other_owner = &owners[(i + 1) % owners.len()];
        assert!(!vault.registry.has_access(delegate, other_owner));
    }
}

#[tokio::test]
async fn every_owner_has_access_to_itself() {
    let vault = setup();
    for signer in &vault.signers {
        assert!(vault.registry.has_access(signer, signer));
    }
    assert_eq!(vault.registry.owner_count(), 0);
}

// ---------------------------------------------------------------------------
// 2. Authorized deposit / withdraw
// ---------------------------------------------------------------------------

#[tokio::test]
async fn authorized_delegates_deposit_and_withdraw() {
    let vault = setup();
    let (owners, delegates) = vault.signers.split_at(SIGNERS / 2);

    for (owner, delegate) in owners.iter().zip(delegates) {
        vault.registry.grant_access(owner, owner, delegate).unwrap();
        vault.ledger.deposit(delegate, owner, 1).await.unwrap();
        assert_eq!(vault.ledger.balance_of(owner), 1);
    }

    for (owner, delegate) in owners.iter().zip(delegates) {
        let remaining = vault.ledger.withdraw(delegate, owner, 1).await.unwrap();
        assert_eq!(remaining, 0);
        assert_eq!(vault.ledger.balance_of(owner), 0);

        let again = vault.ledger.withdraw(delegate, owner, 1).await;
        assert_eq!(
            again.unwrap_err(),
            VaultError::InsufficientFunds {
                side: FundsSide::Ledger,
                available: 0,
                requested: 1,
            }
        );

        // The delegate paid 1 in and received 1 back.
        assert_eq!(vault.tokens.balance_of(delegate), FUNDING);
    }
}

#[tokio::test]
async fn scenario_a_single_unit_round_trip() {
    let vault = setup();
    let (o1, d1) = (vault.signers[0], vault.signers[10]);

    vault.registry.grant_access(&o1, &o1, &d1).unwrap();
    vault.ledger.deposit(&d1, &o1, 1).await.unwrap();
    assert_eq!(vault.ledger.balance_of(&o1), 1);

    vault.ledger.withdraw(&d1, &o1, 1).await.unwrap();
    assert_eq!(vault.ledger.balance_of(&o1), 0);

    let second = vault.ledger.withdraw(&d1, &o1, 1).await;
    assert!(matches!(
        second,
        Err(VaultError::InsufficientFunds {
            side: FundsSide::Ledger,
            ..
        })
    ));
}

#[tokio::test]
async fn scenario_b_ungranted_delegate_is_refused() {
    let vault = setup();
    let (o2, d2) = (vault.signers[1], vault.signers[11]);
    vault.ledger.deposit(&o2, &o2, 5).await.unwrap();

    assert!(!vault.registry.has_access(&d2, &o2));
    let result = vault.ledger.withdraw(&d2, &o2, 1).await;
    assert_eq!(
        result.unwrap_err(),
        VaultError::PermissionDenied {
            actor: d2,
            owner: o2
        }
    );
    assert_eq!(vault.ledger.balance_of(&o2), 5);
    assert_eq!(vault.tokens.balance_of(&d2), FUNDING);
}

#[tokio::test]
async fn deposit_moves_exactly_the_amount() {
    let vault = setup();
    let (owner, delegate) = (vault.signers[2], vault.signers[12]);
    vault.registry.grant_access(&owner, &owner, &delegate).unwrap();

    for amount in [1, 7, 1_000, 59_999] {
        let before_ledger = vault.ledger.balance_of(&owner);
        let before_tokens = vault.tokens.balance_of(&delegate);

        vault.ledger.deposit(&delegate, &owner, amount).await.unwrap();

        assert_eq!(vault.ledger.balance_of(&owner), before_ledger + amount);
        assert_eq!(vault.tokens.balance_of(&delegate), before_tokens - amount);
    }
}

#[tokio::test]
async fn double_grant_is_same_as_single_grant() {
    let vault = setup();
    let (owner, delegate) = (vault.signers[3], vault.signers[13]);

    vault.registry.grant_access(&owner, &owner, &delegate).unwrap();
    let once = vault.registry.delegates_of(&owner);
    vault.registry.grant_access(&owner, &owner, &delegate).unwrap();

    assert_eq!(vault.registry.delegates_of(&owner), once);
    assert!(vault.registry.has_access(&delegate, &owner));
}

// ---------------------------------------------------------------------------
// 3. Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_c_concurrent_withdrawals_cannot_double_spend() {
    let vault = setup();
    let o3 = vault.signers[4];
    vault.ledger.deposit(&o3, &o3, 1).await.unwrap();

    let first = tokio::spawn({
        let ledger = Arc::clone(&vault.ledger);
        async move { ledger.withdraw(&o3, &o3, 1).await }
    });
    let second = tokio::spawn({
        let ledger = Arc::clone(&vault.ledger);
        async move { ledger.withdraw(&o3, &o3, 1).await }
    });

    let results = [first.await.unwrap(), second.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(VaultError::InsufficientFunds {
            side: FundsSide::Ledger,
            ..
        })
    )));
    assert_eq!(vault.ledger.balance_of(&o3), 0);
    assert_eq!(vault.tokens.balance_of(&o3), FUNDING);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_withdrawals_drain_exactly_the_balance() {
    let vault = setup();
    let owner = vault.signers[5];
    let delegates = &vault.signers[10..];
    for d in delegates {
        vault.registry.grant_access(&owner, &owner, d).unwrap();
    }
    vault.ledger.deposit(&owner, &owner, 7).await.unwrap();

    let handles: Vec<_> = delegates
        .iter()
        .copied()
        .map(|d| {
            let ledger = Arc::clone(&vault.ledger);
            tokio::spawn(async move { ledger.withdraw(&d, &owner, 1).await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 7);
    assert_eq!(vault.ledger.balance_of(&owner), 0);
    assert_eq!(vault.tokens.balance_of(&vault.tokens.custodian()), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_owners_proceed_in_parallel() {
    let vault = setup();

    let handles: Vec<_> = vault
        .signers
        .iter()
        .copied()
        .map(|owner| {
            let ledger = Arc::clone(&vault.ledger);
            tokio::spawn(async move {
                for _ in 0..50 {
                    ledger.deposit(&owner, &owner, 10).await?;
                }
                for _ in 0..20 {
                    ledger.withdraw(&owner, &owner, 10).await?;
                }
                Ok::<_, VaultError>(())
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for owner in &vault.signers {
        assert_eq!(vault.ledger.balance_of(owner), 300);
        assert_eq!(vault.tokens.balance_of(owner), FUNDING - 300);
    }
    assert_eq!(
        vault.ledger.total_custodied(),
        u128::from(vault.tokens.balance_of(&vault.tokens.custodian()))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn in_flight_withdrawal_blocks_same_owner_but_not_reads() {
    let (ledger, tokens, owner) = gated_vault();
    ledger.deposit(&owner, &owner, 1).await.unwrap();

    let first = tokio::spawn({
        let ledger = Arc::clone(&ledger);
        async move { ledger.withdraw(&owner, &owner, 1).await }
    });
    wait_for_balance(&ledger, &owner, 0).await;

    let second = tokio::spawn({
        let ledger = Arc::clone(&ledger);
        async move { ledger.withdraw(&owner, &owner, 1).await }
    });

    // Reads are served while the payout is pending.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ledger.balance_of(&owner), 0);
    assert!(!second.is_finished());

    tokens.gate.add_permits(1);
    assert_eq!(first.await.unwrap().unwrap(), 0);
    assert!(matches!(
        second.await.unwrap(),
        Err(VaultError::InsufficientFunds { .. })
    ));
    assert_eq!(tokens.inner.balance_of(&owner), FUNDING);
}

// ---------------------------------------------------------------------------
// 4. Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_withdrawal_restores_the_ledger() {
    let (ledger, tokens, owner) = gated_vault();
    ledger.deposit(&owner, &owner, 10).await.unwrap();

    let handle = tokio::spawn({
        let ledger = Arc::clone(&ledger);
        async move { ledger.withdraw(&owner, &owner, 4).await }
    });
    wait_for_balance(&ledger, &owner, 6).await;

    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());

    assert_eq!(ledger.balance_of(&owner), 10);
    assert_eq!(tokens.inner.balance_of(&owner), FUNDING - 10);

    // The owner's lock was released with the cancelled call.
    tokens.gate.add_permits(1);
    assert_eq!(ledger.withdraw(&owner, &owner, 10).await.unwrap(), 0);
    assert_eq!(tokens.inner.balance_of(&owner), FUNDING);
}

#[tokio::test(start_paused = true)]
async fn timed_out_payout_restores_the_ledger() {
    let config = VaultConfig {
        transfer_timeout: Some(Duration::from_secs(1)),
        ..VaultConfig::default()
    };
    let owner = Account::from_label("owner");
    let tokens = Arc::new(GatedPayouts {
        inner: InMemoryTokenLedger::new(Account::from_label("vault")),
        gate: Semaphore::new(0),
    });
    tokens.inner.allocate(&owner, 100).unwrap();
    let ledger = CustodialLedger::new(
        Arc::new(AuthorizationRegistry::new(&config)),
        tokens.clone(),
        &config,
    );

    ledger.deposit(&owner, &owner, 100).await.unwrap();
    let err = ledger.withdraw(&owner, &owner, 60).await.unwrap_err();

    assert_eq!(err, VaultError::TransferTimeout(Duration::from_secs(1)));
    assert_eq!(ledger.balance_of(&owner), 100);
    assert_eq!(tokens.inner.balance_of(&owner), 0);
}

// ---------------------------------------------------------------------------
// 5. Conservation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn custody_always_matches_ledger() {
    let vault = setup();
    let supply = vault.tokens.total_supply();
    let (owners, delegates) = vault.signers.split_at(SIGNERS / 2);

    for (i, (owner, delegate)) in owners.iter().zip(delegates).enumerate() {
        let amount = (i as u64 + 1) * 100;
        vault.registry.grant_access(owner, owner, delegate).unwrap();
        vault.ledger.deposit(delegate, owner, amount).await.unwrap();
        vault.ledger.deposit(owner, owner, amount).await.unwrap();
        vault.ledger.withdraw(delegate, owner, amount / 2).await.unwrap();

        // Rejected calls must not disturb the books either.
        let _ = vault.ledger.withdraw(owner, delegate, 1).await;
        let _ = vault.ledger.deposit(delegate, owner, FUNDING * 2).await;

        assert_eq!(
            vault.ledger.total_custodied(),
            u128::from(vault.tokens.balance_of(&vault.tokens.custodian()))
        );
    }

    assert_eq!(vault.tokens.total_supply(), supply);
}

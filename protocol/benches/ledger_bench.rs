// Vault benchmarks.
//
// Covers access checks against registries of various sizes, a single
// deposit/withdraw round trip through the in-memory token ledger, and
// concurrent round trips spread over many owners.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use zap_vault::{Account, AuthorizationRegistry, CustodialLedger, InMemoryTokenLedger, VaultConfig};

fn setup_vault(owners: usize) -> (Arc<CustodialLedger>, Vec<Account>) {
    let config = VaultConfig::default();
    let registry = Arc::new(AuthorizationRegistry::new(&config));
    let tokens = Arc::new(InMemoryTokenLedger::new(Account::from_label("vault")));
    let accounts: Vec<Account> = (0..owners).map(|_| Account::random()).collect();
    for account in &accounts {
        tokens.allocate(account, u64::MAX / 2).unwrap();
    }
    let ledger = Arc::new(CustodialLedger::new(registry, tokens, &config));
    (ledger, accounts)
}

fn bench_has_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("vault/has_access");

    for owners in [10, 1_000, 100_000] {
        let registry = AuthorizationRegistry::default();
        let pairs: Vec<(Account, Account)> = (0..owners)
            .map(|_| (Account::random(), Account::random()))
            .collect();
        for (owner, delegate) in &pairs {
            registry.grant_access(owner, owner, delegate).unwrap();
        }
        let (owner, delegate) = pairs[owners / 2];
        let stranger = Account::random();

        group.bench_with_input(BenchmarkId::new("granted", owners), &owners, |b, _| {
            b.iter(|| registry.has_access(&delegate, &owner));
        });
        group.bench_with_input(BenchmarkId::new("denied", owners), &owners, |b, _| {
            b.iter(|| registry.has_access(&stranger, &owner));
        });
    }

    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let (ledger, accounts) = setup_vault(1);
    let owner = accounts[0];

    c.bench_function("vault/deposit_withdraw", |b| {
        b.iter(|| {
            rt.block_on(async {
                ledger.deposit(&owner, &owner, 100).await.unwrap();
                ledger.withdraw(&owner, &owner, 100).await.unwrap();
            })
        });
    });
}

fn bench_parallel_owners(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("vault/parallel_owners");

    for owners in [1, 8, 64] {
        let (ledger, accounts) = setup_vault(owners);
        group.throughput(Throughput::Elements(owners as u64));
        group.bench_with_input(BenchmarkId::from_parameter(owners), &owners, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let handles: Vec<_> = accounts
                        .iter()
                        .copied()
                        .map(|owner| {
                            let ledger = Arc::clone(&ledger);
                            tokio::spawn(async move {
                                ledger.deposit(&owner, &owner, 1).await.unwrap();
                                ledger.withdraw(&owner, &owner, 1).await.unwrap();
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.await.unwrap();
                    }
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_has_access, bench_round_trip, bench_parallel_owners);
criterion_main!(benches);

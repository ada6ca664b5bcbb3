//! Interactive CLI demo of the delegated-access vault.
//!
//! Walks through funding accounts on the token ledger, granting a delegate,
//! delegated deposits and withdrawals, a rejected stranger, a revocation,
//! and a race between two withdrawals for the same balance. The output uses
//! ANSI escape codes for colored terminal rendering.
//!
//! Run with:
//!   cargo run --example demo --release

use std::sync::Arc;
use std::time::Instant;

use zap_vault::{
    Account, AuthorizationRegistry, CustodialLedger, EventBus, InMemoryTokenLedger, VaultConfig,
    VaultEventKind,
};

// ---------------------------------------------------------------------------
// ANSI color constants
// ---------------------------------------------------------------------------

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const BLUE: &str = "\x1b[34m";
const MAGENTA: &str = "\x1b[35m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";
const RED: &str = "\x1b[31m";

const BG_BLUE: &str = "\x1b[44m";

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

fn banner() {
    println!();
    println!(
        "{BG_BLUE}{BOLD}{WHITE}                                                                    {RESET}"
    );
    println!(
        "{BG_BLUE}{BOLD}{WHITE}    ZAP VAULT  --  Delegated Custody Demo                           {RESET}"
    );
    println!(
        "{BG_BLUE}{BOLD}{WHITE}    Version {:<8} |  per-owner locks + compensated payouts      {RESET}",
        zap_vault::config::PROTOCOL_VERSION
    );
    println!(
        "{BG_BLUE}{BOLD}{WHITE}                                                                    {RESET}"
    );
    println!();
}

fn section(num: u32, title: &str) {
    println!();
    println!(
        "{BOLD}{CYAN}===[{YELLOW} Step {num} {CYAN}]=============================================================={RESET}"
    );
    println!("{BOLD}{WHITE}  {title}{RESET}");
    println!(
        "{CYAN}------------------------------------------------------------------------{RESET}"
    );
}

fn success(text: &str) {
    println!("{GREEN}  [OK] {text}{RESET}");
}

fn rejected(text: &str) {
    println!("{RED}  [REJECTED] {text}{RESET}");
}

fn timing(label: &str, elapsed: std::time::Duration) {
    let ms = elapsed.as_secs_f64() * 1000.0;
    println!("{DIM}{MAGENTA}  [{label}: {ms:.3} ms]{RESET}");
}

fn address_display(name: &str, account: &Account, color: &str) {
    let addr = account.to_string();
    let prefix = &addr[..6];
    let suffix = &addr[addr.len() - 6..];
    println!("  {color}{BOLD}{name:<10}{RESET}  {DIM}{prefix}...{suffix}{RESET}");
}

fn balance_row(name: &str, vault: u64, wallet: u64, color: &str) {
    println!(
        "  {color}{BOLD}{name:<10}{RESET}  {WHITE}vault {vault:>8}{RESET}  {DIM}wallet {wallet:>8}{RESET}"
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    banner();

    let config = VaultConfig::default();
    let events = EventBus::default();
    let mut feed = events.subscribe();

    let registry = Arc::new(AuthorizationRegistry::new(&config).with_events(events.clone()));
    let tokens = Arc::new(InMemoryTokenLedger::new(Account::from_label("vault")));
    let ledger = Arc::new(
        CustodialLedger::new(Arc::clone(&registry), tokens.clone(), &config)
            .with_events(events.clone()),
    );

    let alice = Account::from_label("alice");
    let bob = Account::from_label("bob");
    let mallory = Account::from_label("mallory");

    let show_balances = || {
        balance_row("alice", ledger.balance_of(&alice), tokens.balance_of(&alice), BLUE);
        balance_row("bob", ledger.balance_of(&bob), tokens.balance_of(&bob), GREEN);
        balance_row("mallory", ledger.balance_of(&mallory), tokens.balance_of(&mallory), RED);
    };

    // -- Step 1 ------------------------------------------------------------
    section(1, "Fund accounts on the token ledger");
    let cast = [("alice", &alice, BLUE), ("bob", &bob, GREEN), ("mallory", &mallory, RED)];
    for (name, account, color) in cast {
        address_display(name, account, color);
        if let Err(e) = tokens.allocate(account, 1_000) {
            rejected(&e.to_string());
        }
    }
    show_balances();

    // -- Step 2 ------------------------------------------------------------
    section(2, "Alice grants Bob access to the vault balance");
    match registry.grant_access(&alice, &alice, &bob) {
        Ok(_) => success("bob is now a delegate of alice"),
        Err(e) => rejected(&e.to_string()),
    }
    match registry.grant_access(&mallory, &alice, &mallory) {
        Ok(_) => println!("  unexpected: mallory obtained a grant"),
        Err(e) => rejected(&e.to_string()),
    }

    // -- Step 3 ------------------------------------------------------------
    section(3, "Bob deposits on Alice's behalf, then withdraws");
    let started = Instant::now();
    match ledger.deposit(&bob, &alice, 400).await {
        Ok(balance) => success(&format!("deposited 400, alice's vault balance is {balance}")),
        Err(e) => rejected(&e.to_string()),
    }
    match ledger.withdraw(&bob, &alice, 150).await {
        Ok(balance) => success(&format!("withdrew 150 to bob, alice's vault balance is {balance}")),
        Err(e) => rejected(&e.to_string()),
    }
    timing("deposit + withdraw", started.elapsed());
    show_balances();

    // -- Step 4 ------------------------------------------------------------
    section(4, "Mallory tries to withdraw from Alice");
    match ledger.withdraw(&mallory, &alice, 1).await {
        Ok(_) => println!("  unexpected: mallory withdrew"),
        Err(e) => rejected(&e.to_string()),
    }
    match ledger.withdraw(&bob, &alice, 10_000).await {
        Ok(_) => println!("  unexpected: overdraft succeeded"),
        Err(e) => rejected(&e.to_string()),
    }

    // -- Step 5 ------------------------------------------------------------
    section(5, "Two withdrawals race for the last 250");
    let racers: Vec<_> = [alice, bob]
        .into_iter()
        .map(|actor| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { (actor, ledger.withdraw(&actor, &alice, 250).await) })
        })
        .collect();
    for racer in racers {
        match racer.await {
            Ok((actor, Ok(_))) => success(&format!("{actor} won the race")),
            Ok((actor, Err(e))) => rejected(&format!("{actor}: {e}")),
            Err(e) => rejected(&format!("task failed: {e}")),
        }
    }
    show_balances();

    // -- Step 6 ------------------------------------------------------------
    section(6, "Alice revokes Bob");
    if let Ok(true) = registry.revoke_access(&alice, &alice, &bob) {
        success("bob's access revoked");
    }
    match ledger.deposit(&bob, &alice, 1).await {
        Ok(_) => println!("  unexpected: revoked delegate deposited"),
        Err(e) => rejected(&e.to_string()),
    }

    // -- Event log ---------------------------------------------------------
    section(7, "Event log");
    while let Ok(event) = feed.try_recv() {
        let line = match event.kind {
            VaultEventKind::AccessGranted { owner, delegate } => {
                format!("granted   {owner} -> {delegate}")
            }
            VaultEventKind::AccessRevoked { owner, delegate } => {
                format!("revoked   {owner} -> {delegate}")
            }
            VaultEventKind::Deposited { actor, amount, balance, .. } => {
                format!("deposit   {amount:>5} by {actor} (balance {balance})")
            }
            VaultEventKind::Withdrawn { actor, amount, balance, .. } => {
                format!("withdraw  {amount:>5} to {actor} (balance {balance})")
            }
            VaultEventKind::WithdrawalReverted { actor, amount, balance, .. } => {
                format!("reverted  {amount:>5} for {actor} (balance {balance})")
            }
        };
        println!("  {DIM}{}{RESET}  {line}", event.timestamp.format("%H:%M:%S%.3f"));
    }

    println!();
    println!(
        "{BOLD}{WHITE}  custodied: {} | custodian wallet: {}{RESET}",
        ledger.total_custodied(),
        tokens.balance_of(&tokens.custodian())
    );
    println!();
}

// Copyright (c) 2026 Zap Vault Developers. MIT License.
// See LICENSE for details.

//! # Zap Vault Node
//!
//! Entry point for the `zap-vault-node` binary. Parses CLI arguments,
//! initializes logging and metrics, funds the devnet token ledger, and serves
//! the vault over HTTP/WS.
//!
//! Subcommands:
//!
//! - `run`     : start the vault node
//! - `networks`: print the supported network deployment table
//! - `version` : print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use zap_vault::{InMemoryTokenLedger, NetworkRegistry};

use cli::{Commands, VaultNodeCli};
use logging::LogFormat;
use metrics::VaultMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = VaultNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Networks(args) => print_networks(args.networks.as_deref()),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the vault node: API server and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        logging::DEFAULT_FILTER,
        LogFormat::from_str_lossy(&args.log_format),
    );

    let networks = load_networks(args.networks.as_deref())?;
    let deployment = networks
        .deployment(args.chain_id)
        .with_context(|| format!("chain id {} has no contract deployment", args.chain_id))?;
    tracing::info!(
        chain_id = deployment.chain_id,
        network = %deployment.name,
        media_factory = %deployment.addresses.media_factory,
        market = %deployment.addresses.market,
        media = %deployment.addresses.media,
        "resolved contract deployment"
    );

    let config = args.vault_config();
    tracing::info!(
        transfer_timeout = ?config.transfer_timeout,
        max_delegates = config.max_delegates_per_owner,
        "vault configuration"
    );

    // --- Token ledger ---
    let tokens = Arc::new(InMemoryTokenLedger::new(args.custodian()));
    for allocation in &args.allocations {
        let balance = tokens
            .allocate(&allocation.account, allocation.amount)
            .with_context(|| format!("failed to fund {}", allocation.account))?;
        tracing::info!(account = %allocation.account, balance, "devnet allocation");
    }

    let vault_metrics = Arc::new(VaultMetrics::new().context("failed to register metrics")?);

    let app_state = api::AppState::new(
        format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            zap_vault::config::PROTOCOL_VERSION,
        ),
        args.chain_id,
        networks,
        tokens,
        &config,
        Arc::clone(&vault_metrics),
    );
    tracing::info!(custodian = %app_state.tokens.custodian(), "vault ready");

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", api_addr))?;
    tracing::info!("RPC/API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&vault_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    tracing::info!("zap-vault-node stopped");
    Ok(())
}

/// Builds the deployment table: the built-in rows, overridden by `path`.
fn load_networks(path: Option<&Path>) -> Result<NetworkRegistry> {
    let mut networks = NetworkRegistry::with_defaults();
    if let Some(path) = path {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read network table {}", path.display()))?;
        let extra = NetworkRegistry::from_json(&json)
            .with_context(|| format!("failed to parse network table {}", path.display()))?;
        networks.extend(extra);
    }
    Ok(networks)
}

/// Prints the supported deployment table to stdout.
fn print_networks(path: Option<&Path>) -> Result<()> {
    let networks = load_networks(path)?;
    for deployment in networks.deployments() {
        println!(
            "{:>8}  {:<12} media_factory={} market={} media={}",
            deployment.chain_id,
            deployment.name,
            deployment.addresses.media_factory,
            deployment.addresses.market,
            deployment.addresses.media,
        );
    }
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("zap-vault-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol       {}", zap_vault::config::PROTOCOL_VERSION);
    println!("rustc          {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. A handler that cannot
/// be installed never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

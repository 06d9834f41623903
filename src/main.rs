// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use clap::{Parser, Subcommand};
use signaljam::app::config::GlobalSettings;
use signaljam::app::logging::setup_logging;
use signaljam::common::metrics::{ProcessStats, spawn_metrics_server};
use signaljam::domain::error::AppError;
use signaljam::infrastructure::data::record_store::RecordStore;
use signaljam::infrastructure::data::state_store::StateStore;
use signaljam::infrastructure::network::echo::EchoChain;
use signaljam::infrastructure::network::gas::GasOracle;
use signaljam::infrastructure::network::nonce::NonceManager;
use signaljam::infrastructure::network::relay::BundleSender;
use signaljam::infrastructure::network::rpc::FailoverRpc;
use signaljam::services::amplifier::Amplifier;
use signaljam::services::attributor::Attributor;
use signaljam::services::emitter::Emitter;
use alloy::signers::local::PrivateKeySigner;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "signaljam agent")]
struct Cli {
    /// Path to config file (default: config.{toml,yaml,...})
    #[arg(long)]
    config: Option<String>,

    /// Do not submit transactions/bundles, only log
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Metrics port (overrides config)
    #[arg(long)]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    role: Role,
}

/// Each role runs as its own OS process under the supervisor.
#[derive(Subcommand, Debug, Clone, Copy)]
enum Role {
    /// Publish signals on the configured cadence
    Emit,
    /// Bait and capture around our own registered signals
    Amplify,
    /// Attribute correlated transactions and attest yield
    Attribute,
}

impl Role {
    fn name(&self) -> &'static str {
        match self {
            Role::Emit => "emitter",
            Role::Amplify => "amplifier",
            Role::Attribute => "attributor",
        }
    }
}

fn parse_signer(key: &str, label: &str) -> Result<PrivateKeySigner, AppError> {
    PrivateKeySigner::from_str(key.trim())
        .map_err(|e| AppError::Config(format!("Invalid {label}: {e}")))
}

/// Clear the emission lock on SIGINT/SIGTERM so a killed emitter never
/// wedges its successors.
fn install_lock_cleanup(state: StateStore) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!("SIGTERM handler unavailable: {}", e);
                        let _ = ctrl_c.await;
                        state.release_emission_lock();
                        std::process::exit(0);
                    }
                };
            tokio::select! {
                _ = ctrl_c => {},
                _ = term.recv() => {},
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        tracing::info!("Shutdown signal received, releasing emission lock");
        state.release_emission_lock();
        std::process::exit(0);
    });
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    let settings = GlobalSettings::load_with_path(cli.config.as_deref())?;
    setup_logging(if settings.debug { "debug" } else { "info" }, false);

    let signer = parse_signer(&settings.private_key, "private_key")?;
    if signer.address() != settings.wallet_address {
        return Err(AppError::Config(format!(
            "wallet_address {} does not match private_key address {}",
            settings.wallet_address,
            signer.address()
        )));
    }
    let mirror_signer = parse_signer(&settings.mirror_private_key, "mirror_private_key")?;
    if mirror_signer.address() == signer.address() {
        return Err(AppError::Config(
            "mirror_private_key must be a distinct identity".into(),
        ));
    }

    let rpc = Arc::new(FailoverRpc::new(&settings.rpc_urls)?);
    let data_dir = settings.data_dir();
    std::fs::create_dir_all(&data_dir)
        .map_err(|e| AppError::Initialization(format!("Data dir unavailable: {e}")))?;
    let store = RecordStore::new(&data_dir);
    let state = StateStore::new(&data_dir);
    let gas = GasOracle::new(rpc.clone());
    let echo = Arc::new(EchoChain::new(if settings.enable_echo {
        settings.echo_endpoints.clone()
    } else {
        Vec::new()
    }));

    let stats = Arc::new(ProcessStats::default());
    let metrics_port = cli.metrics_port.unwrap_or(settings.metrics_port);
    spawn_metrics_server(metrics_port, cli.role.name(), stats.clone()).await;
    {
        // Mirror the failover counter into the exported stats.
        let rpc = rpc.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            loop {
                stats
                    .rpc_failovers
                    .store(rpc.failover_count(), std::sync::atomic::Ordering::Relaxed);
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            }
        });
    }

    tracing::info!(
        role = cli.role.name(),
        chain_id = settings.chain_id,
        endpoints = rpc.endpoint_count(),
        data_dir = %data_dir.display(),
        dry_run = cli.dry_run,
        "signaljam starting"
    );

    match cli.role {
        Role::Emit => {
            install_lock_cleanup(state.clone());
            let emitter = Emitter {
                rpc: rpc.clone(),
                store,
                state,
                nonce: NonceManager::new(rpc.clone(), signer.address()),
                gas,
                signer,
                echo,
                stats,
                chain_id: settings.chain_id,
                dmap: settings.dmap_address,
                category_id: settings.category_id,
                interval: settings.detect_interval(),
                dry_run: cli.dry_run,
            };
            emitter.run().await
        }
        Role::Amplify => {
            let relay_url = settings.relay_url()?;
            let bundles = BundleSender::new(
                rpc.clone(),
                relay_url,
                mirror_signer.clone(),
                cli.dry_run,
            );
            let amplifier = Amplifier::new(
                rpc,
                store,
                gas,
                bundles,
                signer,
                mirror_signer,
                echo,
                stats,
                settings.chain_id,
                settings.dmap_address,
                settings.vault_address,
                settings.wallet_address,
                settings.max_gas_gwei,
                settings.honeypot_address,
                cli.dry_run,
            );
            amplifier.run().await
        }
        Role::Attribute => {
            let attributor = Attributor::new(
                rpc,
                store,
                state,
                gas,
                signer,
                stats,
                settings.chain_id,
                settings.vault_address,
                cli.dry_run,
            );
            attributor.run().await
        }
    }
}

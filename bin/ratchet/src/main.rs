//! ratchet is a CLI tool that applies ledgered, idempotent deployment
//! migrations for upgradeable contracts across multiple networks.

mod cli;
mod migrations;
mod status;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use cli::{Cli, Command};
use ratchet_orchestrate::{
    MigrationLedger, NetworkRegistry, Orchestrator, RunStatus, SignerConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let registry = NetworkRegistry::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let ledger = MigrationLedger::open(cli.state_dir.join("ledger"))?;
    let deployments_dir = cli.state_dir.join("deployments");

    match cli.command {
        Command::Migrate {
            networks,
            account_index,
            treasury,
        } => {
            let treasury = treasury
                .parse()
                .context("invalid treasury address")?;
            let signer_config = SignerConfig::from_env(account_index)?;
            let (plan, proxies) = migrations::build(&cli.artifacts_dir, treasury)?;

            std::fs::create_dir_all(&deployments_dir).with_context(|| {
                format!("failed to create {}", deployments_dir.display())
            })?;

            let orchestrator = Arc::new(Orchestrator::new(
                registry,
                signer_config,
                plan,
                ledger,
                proxies,
                deployments_dir,
            ));

            // Ctrl+C cancels between steps; an in-flight step always
            // finishes, since submitted transactions cannot be recalled.
            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Ctrl+C received, stopping after the in-flight step...");
                    let _ = cancel_tx.send(true);
                }
            });

            let reports = orchestrator.run_networks(&networks, cancel_rx).await;

            let mut any_failed = false;
            for report in &reports {
                println!("{report}");
                any_failed |= report.status == RunStatus::Failed;
            }
            if any_failed {
                std::process::exit(1);
            }
        }
        Command::Status { networks } => {
            let table = status::render(&registry, &ledger, &deployments_dir, &networks)?;
            println!("{table}");
        }
    }

    Ok(())
}

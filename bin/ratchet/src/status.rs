//! Offline status table: migration cursor and deployed addresses per network.

use std::path::Path;

use anyhow::Result;
use comfy_table::Table;
use ratchet_orchestrate::{DeploymentStore, MigrationLedger, NetworkRegistry};

/// Render the status table for the selected networks (all when empty).
pub fn render(
    registry: &NetworkRegistry,
    ledger: &MigrationLedger,
    deployments_dir: &Path,
    networks: &[String],
) -> Result<Table> {
    let ids: Vec<String> = if networks.is_empty() {
        registry.names().into_iter().map(str::to_string).collect()
    } else {
        networks.to_vec()
    };

    let mut table = Table::new();
    table.set_header(vec![
        "network",
        "chain id",
        "last applied",
        "contract",
        "proxy",
        "logic",
    ]);

    for id in &ids {
        let profile = registry.resolve(id)?;
        let last_applied = ledger
            .last_applied(id)?
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());

        let store_path = deployments_dir.join(format!("{id}.deployments.json"));
        let artifacts = if store_path.exists() {
            DeploymentStore::open(store_path)?.artifacts()
        } else {
            vec![]
        };

        if artifacts.is_empty() {
            table.add_row(vec![
                id.clone(),
                profile.chain_id.to_string(),
                last_applied,
                "-".to_string(),
                "-".to_string(),
                "-".to_string(),
            ]);
            continue;
        }

        for artifact in artifacts {
            table.add_row(vec![
                id.clone(),
                profile.chain_id.to_string(),
                last_applied.clone(),
                artifact.contract.clone(),
                artifact
                    .proxy
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                artifact.address.to_string(),
            ]);
        }
    }

    Ok(table)
}

//! The project's migration plan.
//!
//! Steps are registered explicitly, in order. Step 0 deploys the NFT
//! collection behind an upgrade proxy; step 1 wires the treasury address
//! into it. Both steps check on-chain state before acting, so a re-run
//! after a crash or a transient failure converges without duplicate
//! transactions.

use std::path::Path;

use alloy_primitives::{Address, Bytes};
use alloy_sol_types::SolValue;
use anyhow::{Context, Result};
use ratchet_orchestrate::{
    ContractArtifact, FnStep, MigrationPlan, MigrationStep, ProxyManager, TransactionRequest,
    selector,
};

/// Logical name of the collection contract, as recorded in the store.
pub const COLLECTION_CONTRACT: &str = "NFTCollection";

/// Build the plan and the proxy manager from compiled artifacts.
pub fn build(artifacts_dir: &Path, treasury: Address) -> Result<(MigrationPlan, ProxyManager)> {
    let proxy_artifact = ContractArtifact::load(&artifacts_dir.join("UpgradeProxy.json"))
        .context("failed to load proxy artifact")?;
    let collection = ContractArtifact::load(&artifacts_dir.join("NFTCollection.json"))
        .context("failed to load collection artifact")?;

    let steps: Vec<Box<dyn MigrationStep>> = vec![
        deploy_collection_step(collection),
        set_treasury_step(treasury),
    ];
    let plan = MigrationPlan::new(steps).context("invalid migration plan")?;

    Ok((plan, ProxyManager::new(proxy_artifact)))
}

/// Step 0: deploy the collection logic behind a proxy, initialized with the
/// deployer as owner. The proxy manager skips the deployment when the store
/// already holds a live proxy for the contract.
fn deploy_collection_step(collection: ContractArtifact) -> Box<dyn MigrationStep> {
    Box::new(FnStep::new(0, "deploy collection proxy", move |ctx| {
        let collection = collection.clone();
        Box::pin(async move {
            let owner = ctx.connection.sender();
            let deployed = ctx
                .proxies
                .deploy_new(
                    ctx.connection,
                    ctx.store,
                    &collection,
                    Bytes::from(owner.abi_encode()),
                )
                .await?;
            Ok(vec![deployed])
        })
    }))
}

/// Step 1: point the collection at the treasury. Reads the current value
/// first and sends nothing when it already matches.
fn set_treasury_step(treasury: Address) -> Box<dyn MigrationStep> {
    Box::new(FnStep::new(1, "set treasury address", move |ctx| {
        Box::pin(async move {
            let recorded = ctx.store.artifact(COLLECTION_CONTRACT).ok_or_else(|| {
                ratchet_orchestrate::OrchestrateError::Configuration(format!(
                    "{COLLECTION_CONTRACT} has not been deployed on {}",
                    ctx.connection.profile().id
                ))
            })?;
            let proxy = recorded.proxy.ok_or_else(|| {
                ratchet_orchestrate::OrchestrateError::Configuration(format!(
                    "{COLLECTION_CONTRACT} is recorded without a proxy"
                ))
            })?;

            let current = ctx
                .connection
                .call(proxy, Bytes::from(selector("treasury()").to_vec()))
                .await?;
            if decode_address(&current) == Some(treasury) {
                tracing::info!(
                    network = %ctx.connection.profile().id,
                    %treasury,
                    "Treasury already set, skipping"
                );
                return Ok(vec![]);
            }

            let mut calldata = selector("setTreasury(address)").to_vec();
            calldata.extend_from_slice(&treasury.abi_encode());
            ctx.connection
                .send_and_confirm(TransactionRequest::call(proxy, Bytes::from(calldata)))
                .await?;

            tracing::info!(
                network = %ctx.connection.profile().id,
                %treasury,
                "Treasury set"
            );
            Ok(vec![])
        })
    }))
}

/// Decode a single ABI-encoded address return value.
fn decode_address(data: &Bytes) -> Option<Address> {
    if data.len() != 32 {
        return None;
    }
    Some(Address::from_slice(&data[12..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_artifacts(dir: &Path) {
        std::fs::write(
            dir.join("UpgradeProxy.json"),
            r#"{"contractName": "UpgradeProxy", "bytecode": "0x608060", "abi": []}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("NFTCollection.json"),
            r#"{
                "contractName": "NFTCollection",
                "bytecode": "0x6080aa",
                "abi": [],
                "initializer": "initialize(address)"
            }"#,
        )
        .unwrap();
    }

    #[test]
    fn test_build_plan_from_artifacts() {
        let dir = tempdir::TempDir::new("ratchet-migrations").unwrap();
        write_artifacts(dir.path());

        let (plan, _proxies) = build(dir.path(), Address::repeat_byte(0xaa)).unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_build_fails_without_artifacts() {
        let dir = tempdir::TempDir::new("ratchet-migrations").unwrap();
        assert!(build(dir.path(), Address::repeat_byte(0xaa)).is_err());
    }

    #[test]
    fn test_decode_address() {
        let encoded = Bytes::from(Address::repeat_byte(0x77).abi_encode());
        assert_eq!(decode_address(&encoded), Some(Address::repeat_byte(0x77)));

        assert_eq!(decode_address(&Bytes::new()), None);
        assert_eq!(decode_address(&Bytes::from(vec![0u8; 20])), None);
    }
}

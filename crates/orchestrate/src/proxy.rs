//! Proxy deployment manager.
//!
//! Deploys logic contracts behind an upgrade proxy and repoints existing
//! proxies at new logic. The proxy contract itself is an external artifact
//! with the conventional `(logic, admin, initData)` constructor; its revert
//! reasons surface through the error taxonomy, never as silent halves: a
//! deployment is recorded only once both contracts are live and bound.

use alloy_primitives::{Address, Bytes};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

use crate::artifact::{ContractArtifact, DeployedArtifact, DeploymentStore, selector};
use crate::connection::{Connection, TransactionRequest};
use crate::error::{OrchestrateError, Result};

/// Signature of the repoint function every managed proxy exposes.
const UPGRADE_TO_SIGNATURE: &str = "upgradeTo(address)";

/// Relation between a proxy, its current logic and its admin.
///
/// The admin is the only account permitted to change the logic pointer.
/// The initializer signature recorded at first deployment is the statically
/// checkable compatibility surface for upgrades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyBinding {
    pub proxy: Address,
    pub logic: Address,
    pub admin: Address,
    #[serde(default)]
    pub initializer: Option<String>,
}

/// Deploys and upgrades proxied contracts.
pub struct ProxyManager {
    proxy_artifact: ContractArtifact,
}

impl ProxyManager {
    /// The proxy artifact is the compiled upgrade-proxy contract shared by
    /// every managed deployment.
    pub fn new(proxy_artifact: ContractArtifact) -> Self {
        Self { proxy_artifact }
    }

    /// Deploy `artifact` behind a fresh proxy and record the binding.
    ///
    /// Re-running after a crash converges instead of redeploying: a fully
    /// recorded artifact whose proxy still has code on chain is returned
    /// as-is. On any revert nothing is recorded: a proxy without working
    /// logic must never appear in the store as a completed deployment.
    pub async fn deploy_new(
        &self,
        connection: &Connection,
        store: &DeploymentStore,
        artifact: &ContractArtifact,
        init_args: Bytes,
    ) -> Result<DeployedArtifact> {
        if let Some(existing) = store.artifact(&artifact.name)
            && let Some(proxy) = existing.proxy
        {
            let code = connection.get_code(proxy).await?;
            if !code.is_empty() {
                tracing::info!(
                    network = %connection.profile().id,
                    contract = %artifact.name,
                    proxy = %proxy,
                    "Already deployed, skipping"
                );
                return Ok(existing);
            }
            tracing::warn!(
                network = %connection.profile().id,
                contract = %artifact.name,
                proxy = %proxy,
                "Recorded proxy has no code on chain, redeploying"
            );
        }

        if artifact.initializer.is_none() && !init_args.is_empty() {
            return Err(OrchestrateError::Configuration(format!(
                "{} declares no initializer but initializer arguments were supplied",
                artifact.name
            )));
        }

        tracing::info!(
            network = %connection.profile().id,
            contract = %artifact.name,
            "Deploying logic contract"
        );
        let logic = self
            .deploy_contract(connection, &artifact.name, artifact.bytecode.clone())
            .await?;

        let admin = connection.sender();
        let init_data = match artifact.initializer_selector() {
            Some(sel) => {
                let mut data = sel.to_vec();
                data.extend_from_slice(&init_args);
                Bytes::from(data)
            }
            None => Bytes::new(),
        };

        // Proxy constructor: (logic, admin, initData). The initializer runs
        // in the proxy's storage within the same transaction, so deploy and
        // initialize cannot be torn apart by a crash.
        let mut proxy_code = self.proxy_artifact.bytecode.to_vec();
        proxy_code.extend_from_slice(&(logic, admin, init_data).abi_encode_params());

        tracing::info!(
            network = %connection.profile().id,
            contract = %artifact.name,
            logic = %logic,
            "Deploying proxy"
        );
        let proxy = self
            .deploy_contract(connection, "proxy", Bytes::from(proxy_code))
            .await?;

        let deployed = DeployedArtifact {
            contract: artifact.name.clone(),
            address: logic,
            proxy: Some(proxy),
            abi_source: artifact
                .source
                .as_ref()
                .map(|p| p.display().to_string()),
            constructor_args: init_args,
            logic_history: vec![],
        };
        let binding = ProxyBinding {
            proxy,
            logic,
            admin,
            initializer: artifact.initializer.clone(),
        };
        store.record_proxy_deployment(deployed.clone(), binding)?;

        tracing::info!(
            network = %connection.profile().id,
            contract = %artifact.name,
            proxy = %proxy,
            logic = %logic,
            "Deployed behind proxy"
        );
        Ok(deployed)
    }

    /// Deploy new logic and repoint an existing proxy at it.
    ///
    /// Only the recorded admin may upgrade, and the new logic must declare
    /// the same initializer the proxy was deployed with. The repoint is a
    /// single `upgradeTo` transaction; the proxy address never changes.
    pub async fn upgrade(
        &self,
        connection: &Connection,
        store: &DeploymentStore,
        proxy: Address,
        new_artifact: &ContractArtifact,
    ) -> Result<DeployedArtifact> {
        let binding = store.binding(proxy).ok_or_else(|| {
            OrchestrateError::Configuration(format!("no binding recorded for proxy {proxy}"))
        })?;

        let caller = connection.sender();
        if caller != binding.admin {
            return Err(OrchestrateError::Unauthorized {
                proxy,
                caller,
                admin: binding.admin,
            });
        }

        let expected = binding.initializer.as_deref().map(selector);
        let actual = new_artifact.initializer_selector();
        if expected != actual {
            return Err(OrchestrateError::IncompatibleUpgrade {
                expected: describe_initializer(binding.initializer.as_deref()),
                actual: describe_initializer(new_artifact.initializer.as_deref()),
            });
        }

        tracing::info!(
            network = %connection.profile().id,
            contract = %new_artifact.name,
            proxy = %proxy,
            "Deploying replacement logic"
        );
        let new_logic = self
            .deploy_contract(connection, &new_artifact.name, new_artifact.bytecode.clone())
            .await?;

        let mut calldata = selector(UPGRADE_TO_SIGNATURE).to_vec();
        calldata.extend_from_slice(&new_logic.abi_encode());

        tracing::info!(
            network = %connection.profile().id,
            proxy = %proxy,
            new_logic = %new_logic,
            "Repointing proxy"
        );
        connection
            .send_and_confirm(TransactionRequest::call(proxy, Bytes::from(calldata)))
            .await?;

        store.apply_upgrade(proxy, new_logic)
    }

    async fn deploy_contract(
        &self,
        connection: &Connection,
        what: &str,
        code: Bytes,
    ) -> Result<Address> {
        let receipt = connection
            .send_and_confirm(TransactionRequest::create(code))
            .await?;
        receipt.contract_address.ok_or_else(|| {
            OrchestrateError::DeploymentReverted(format!(
                "{what}: receipt carries no contract address"
            ))
        })
    }
}

fn describe_initializer(signature: Option<&str>) -> String {
    match signature {
        Some(sig) => format!("{sig} [{}]", hex::encode(selector(sig))),
        None => "none".to_string(),
    }
}

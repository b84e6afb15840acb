//! Contract artifacts and the deployed-artifact store.
//!
//! Compiled artifacts are produced by an external build step and consumed
//! here as opaque `(bytecode, abi, initializer)` tuples. The
//! [`DeploymentStore`] is the durable record of what has been deployed
//! where; writes are all-or-nothing (temp file + rename) so a crash can
//! never leave a half-recorded artifact behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use alloy_primitives::{Address, Bytes, keccak256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OrchestrateError, Result};
use crate::proxy::ProxyBinding;

/// A compiled contract, as emitted by the build step.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractArtifact {
    /// Logical contract name.
    #[serde(alias = "contractName")]
    pub name: String,
    /// Deployable init code.
    pub bytecode: Bytes,
    /// Full ABI, kept opaque.
    pub abi: Value,
    /// Initializer signature, e.g. `initialize(address,address)`, for
    /// contracts initialized through a proxy.
    #[serde(default)]
    pub initializer: Option<String>,
    /// Where the artifact was loaded from.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl ContractArtifact {
    /// Load an artifact JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestrateError::Artifact(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut artifact: Self = serde_json::from_str(&content).map_err(|e| {
            OrchestrateError::Artifact(format!("failed to parse {}: {e}", path.display()))
        })?;
        if artifact.bytecode.is_empty() {
            return Err(OrchestrateError::Artifact(format!(
                "{} has empty bytecode",
                path.display()
            )));
        }
        artifact.source = Some(path.to_path_buf());
        Ok(artifact)
    }

    /// 4-byte selector of the initializer, if the contract declares one.
    pub fn initializer_selector(&self) -> Option<[u8; 4]> {
        self.initializer.as_deref().map(selector)
    }
}

/// 4-byte function selector of a canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Record of one deployed contract.
///
/// For proxied contracts `proxy` is the stable, user-facing address;
/// `address` is the current logic implementation and moves on every
/// upgrade, with prior implementations retained in `logic_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedArtifact {
    pub contract: String,
    pub address: Address,
    #[serde(default)]
    pub proxy: Option<Address>,
    /// ABI reference: the artifact file this deployment was built from.
    #[serde(default)]
    pub abi_source: Option<String>,
    /// Initializer/constructor arguments used at first deployment.
    #[serde(default)]
    pub constructor_args: Bytes,
    /// Superseded logic addresses, oldest first.
    #[serde(default)]
    pub logic_history: Vec<Address>,
}

/// On-disk document of the store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    artifacts: HashMap<String, DeployedArtifact>,
    #[serde(default)]
    bindings: HashMap<Address, ProxyBinding>,
}

/// Durable record of deployed artifacts and proxy bindings for one network.
///
/// Interior-mutable so migration steps can share it by reference; steps run
/// strictly sequentially, the mutex only guards against torn reads from
/// reporting code.
pub struct DeploymentStore {
    path: Option<PathBuf>,
    document: Mutex<StoreDocument>,
}

impl DeploymentStore {
    /// Open (or create) the store file for a network.
    pub fn open(path: PathBuf) -> Result<Self> {
        let document = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                OrchestrateError::Ledger(format!("failed to read {}: {e}", path.display()))
            })?;
            serde_json::from_str(&content).map_err(|e| {
                OrchestrateError::Ledger(format!("corrupt store {}: {e}", path.display()))
            })?
        } else {
            StoreDocument::default()
        };

        Ok(Self {
            path: Some(path),
            document: Mutex::new(document),
        })
    }

    /// Volatile store, used by tests and dry runs.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            document: Mutex::new(StoreDocument::default()),
        }
    }

    /// Look up a deployment by logical contract name.
    pub fn artifact(&self, contract: &str) -> Option<DeployedArtifact> {
        self.document.lock().unwrap().artifacts.get(contract).cloned()
    }

    /// Look up the binding for a proxy address.
    pub fn binding(&self, proxy: Address) -> Option<ProxyBinding> {
        self.document.lock().unwrap().bindings.get(&proxy).cloned()
    }

    /// All recorded deployments, sorted by contract name.
    pub fn artifacts(&self) -> Vec<DeployedArtifact> {
        let document = self.document.lock().unwrap();
        let mut artifacts: Vec<DeployedArtifact> = document.artifacts.values().cloned().collect();
        artifacts.sort_by(|a, b| a.contract.cmp(&b.contract));
        artifacts
    }

    /// Record a plain (unproxied) deployment.
    pub fn record_artifact(&self, artifact: DeployedArtifact) -> Result<()> {
        let mut document = self.document.lock().unwrap();
        document.artifacts.insert(artifact.contract.clone(), artifact);
        self.persist(&document)
    }

    /// Record a proxied deployment and its binding in one durable write.
    pub fn record_proxy_deployment(
        &self,
        artifact: DeployedArtifact,
        binding: ProxyBinding,
    ) -> Result<()> {
        let mut document = self.document.lock().unwrap();
        document.artifacts.insert(artifact.contract.clone(), artifact);
        document.bindings.insert(binding.proxy, binding);
        self.persist(&document)
    }

    /// Repoint a recorded proxy at new logic, retaining the old address in
    /// the artifact's history. One durable write covers both updates.
    pub fn apply_upgrade(&self, proxy: Address, new_logic: Address) -> Result<DeployedArtifact> {
        let mut document = self.document.lock().unwrap();

        let binding = document.bindings.get_mut(&proxy).ok_or_else(|| {
            OrchestrateError::Configuration(format!("no binding recorded for proxy {proxy}"))
        })?;
        let old_logic = binding.logic;
        binding.logic = new_logic;

        let artifact = document
            .artifacts
            .values_mut()
            .find(|a| a.proxy == Some(proxy))
            .ok_or_else(|| {
                OrchestrateError::Configuration(format!("no artifact recorded for proxy {proxy}"))
            })?;
        artifact.logic_history.push(old_logic);
        artifact.address = new_logic;
        let updated = artifact.clone();

        self.persist(&document)?;
        Ok(updated)
    }

    fn persist(&self, document: &StoreDocument) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(document)
            .map_err(|e| OrchestrateError::Ledger(format!("failed to serialize store: {e}")))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| {
            OrchestrateError::Ledger(format!("failed to write {}: {e}", tmp.display()))
        })?;
        std::fs::rename(&tmp, path).map_err(|e| {
            OrchestrateError::Ledger(format!("failed to commit {}: {e}", path.display()))
        })?;
        Ok(())
    }
}

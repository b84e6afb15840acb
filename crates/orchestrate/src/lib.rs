//! ratchet-orchestrate - Deployment orchestration for upgradeable contracts.
//!
//! This crate resolves per-network connection and signing configuration,
//! applies a versioned sequence of migration steps with idempotent re-runs,
//! and deploys contracts behind upgrade proxies so logic can evolve without
//! changing the address holders interact with.

mod artifact;
mod connection;
mod error;
mod executor;
mod ledger;
mod network;
mod proxy;
mod rpc;
mod signer;
mod step;

#[cfg(test)]
pub(crate) mod test_support;

pub use artifact::{ContractArtifact, DeployedArtifact, DeploymentStore, selector};
pub use connection::{Connection, TransactionRequest, TxReceipt, connect};
pub use error::{OrchestrateError, Result};
pub use executor::{
    MigrationRunner, Orchestrator, RetryPolicy, RunReport, RunState, RunStatus,
};
pub use ledger::{MigrationLedger, MigrationRecord};
pub use network::{FeePolicy, NetworkProfile, NetworkRegistry, NetworkRegistryBuilder};
pub use proxy::{ProxyBinding, ProxyManager};
pub use rpc::{HttpTransport, Transport};
pub use signer::{PRIVATE_KEYS_ENV, SignerConfig};
pub use step::{FnStep, MigrationPlan, MigrationStep, StepContext};

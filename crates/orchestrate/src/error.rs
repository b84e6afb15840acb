//! Error taxonomy for the orchestration library.
//!
//! The executor's retry policy is driven by [`OrchestrateError::is_transient`]:
//! connectivity losses and confirmation timeouts are retried with backoff,
//! everything else halts the run at the failing step.

use alloy_primitives::{Address, B256};

/// Errors produced while resolving networks, connecting, migrating and
/// deploying proxies.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrateError {
    /// Invalid static configuration: malformed profiles, bad migration plans,
    /// sequence regressions.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The requested network id is not present in the registry.
    #[error("unknown network: {id}")]
    UnknownNetwork { id: String },

    /// Key material is missing or malformed.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// The endpoint could not be reached within the request timeout.
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The chain id reported by the endpoint differs from the profile.
    #[error("chain id mismatch: profile declares {expected}, endpoint reports {actual}")]
    ChainIdMismatch { expected: u64, actual: u64 },

    /// A transaction did not reach the required confirmation depth within
    /// the profile's block budget. Reported, never auto-resubmitted: the
    /// transaction may still be mined.
    #[error("transaction {tx} not confirmed after {waited_blocks} blocks")]
    ConfirmationTimeout { tx: B256, waited_blocks: u64 },

    /// The connection's sender is not the recorded admin of the proxy.
    #[error("{caller} is not the admin of proxy {proxy} (admin is {admin})")]
    Unauthorized {
        proxy: Address,
        caller: Address,
        admin: Address,
    },

    /// The replacement logic declares an initializer incompatible with the
    /// one the proxy was deployed with.
    #[error("incompatible upgrade: proxy initializer is {expected}, new logic declares {actual}")]
    IncompatibleUpgrade { expected: String, actual: String },

    /// A deployment or initialization transaction reverted.
    #[error("deployment reverted: {0}")]
    DeploymentReverted(String),

    /// The migration ledger could not be read or durably written.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// The endpoint answered, but with a JSON-RPC error or an unparseable
    /// response.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// A compiled contract artifact could not be read or parsed.
    #[error("artifact error: {0}")]
    Artifact(String),
}

impl OrchestrateError {
    /// Whether the executor should retry the failing step.
    ///
    /// Only connectivity losses and confirmation timeouts qualify; every
    /// other variant is a fact about configuration or chain state that a
    /// retry cannot change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrchestrateError::NetworkUnreachable(_) | OrchestrateError::ConfirmationTimeout { .. }
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = OrchestrateError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(OrchestrateError::NetworkUnreachable("connect refused".into()).is_transient());
        assert!(
            OrchestrateError::ConfirmationTimeout {
                tx: B256::ZERO,
                waited_blocks: 50,
            }
            .is_transient()
        );

        assert!(!OrchestrateError::Configuration("bad plan".into()).is_transient());
        assert!(
            !OrchestrateError::ChainIdMismatch {
                expected: 137,
                actual: 80001,
            }
            .is_transient()
        );
        assert!(!OrchestrateError::DeploymentReverted("initializer failed".into()).is_transient());
        assert!(
            !OrchestrateError::UnknownNetwork {
                id: "unknown-chain".into(),
            }
            .is_transient()
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = OrchestrateError::ChainIdMismatch {
            expected: 137,
            actual: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("137"));
        assert!(msg.contains('1'));

        let err = OrchestrateError::UnknownNetwork {
            id: "unknown-chain".into(),
        };
        assert_eq!(err.to_string(), "unknown network: unknown-chain");
    }
}

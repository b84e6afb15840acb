//! Network profile registry.
//!
//! Profiles are loaded once at startup (TOML file layered with
//! `RATCHET_`-prefixed environment variables) into an immutable
//! [`NetworkRegistry`]. Resolution is a pure lookup: no I/O happens until a
//! connection is established against a resolved profile.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{OrchestrateError, Result};

/// Default confirmation depth required before a transaction counts as final.
pub const DEFAULT_CONFIRMATIONS: u64 = 1;
/// Default number of blocks to wait for confirmations before giving up.
pub const DEFAULT_TIMEOUT_BLOCKS: u64 = 50;
/// Default interval between confirmation polls, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

fn default_confirmations() -> u64 {
    DEFAULT_CONFIRMATIONS
}

fn default_timeout_blocks() -> u64 {
    DEFAULT_TIMEOUT_BLOCKS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// How transaction fees are priced on a network.
///
/// Profiles either pin a legacy `gas_price` or declare EIP-1559 fee caps;
/// the connection fills whichever the step left unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeePolicy {
    /// Dynamic-fee transactions with explicit caps.
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
    /// Fixed gas price, pre-EIP-1559 style.
    Legacy { gas_price: u128 },
}

/// Connection parameters for one named network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    /// Registry identifier. Filled from the TOML table key at load time.
    #[serde(skip)]
    pub id: String,
    /// JSON-RPC endpoint.
    pub endpoint: Url,
    /// Chain id the endpoint must report at connection time.
    pub chain_id: u64,
    /// Gas limit applied to transactions that do not set their own.
    pub gas_limit: u64,
    /// Fee policy applied to transactions that do not set their own.
    #[serde(flatten)]
    pub fee: FeePolicy,
    /// Confirmation depth required by `send_and_confirm`.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Blocks to wait for confirmations before reporting a timeout.
    #[serde(default = "default_timeout_blocks")]
    pub timeout_blocks: u64,
    /// Interval between confirmation polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl NetworkProfile {
    /// Interval between confirmation polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// On-disk shape of the profile configuration.
#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    networks: HashMap<String, NetworkProfile>,
}

/// Process-wide, read-only mapping from network id to profile.
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
    profiles: HashMap<String, NetworkProfile>,
}

impl NetworkRegistry {
    /// Load profiles from a TOML file layered with `RATCHET_`-prefixed
    /// environment variables (`RATCHET_NETWORKS__POLYGON__ENDPOINT=...`).
    pub fn load(path: &Path) -> Result<Self> {
        let file: RegistryFile = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RATCHET_").split("__"))
            .extract()
            .map_err(|e| OrchestrateError::Configuration(format!("invalid profile config: {e}")))?;

        if file.networks.is_empty() {
            return Err(OrchestrateError::Configuration(format!(
                "no network profiles configured in {}",
                path.display()
            )));
        }

        let mut builder = Self::builder();
        for (id, mut profile) in file.networks {
            profile.id = id;
            builder = builder.profile(profile)?;
        }
        Ok(builder.build())
    }

    /// Start an empty registry, mainly for tests and embedding.
    pub fn builder() -> NetworkRegistryBuilder {
        NetworkRegistryBuilder {
            profiles: HashMap::new(),
        }
    }

    /// Resolve a network id to its profile. Pure lookup, no I/O.
    pub fn resolve(&self, network_id: &str) -> Result<&NetworkProfile> {
        self.profiles
            .get(network_id)
            .ok_or_else(|| OrchestrateError::UnknownNetwork {
                id: network_id.to_string(),
            })
    }

    /// All configured network ids, sorted for stable output.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Builder enforcing the unique-identifier invariant.
#[derive(Debug)]
pub struct NetworkRegistryBuilder {
    profiles: HashMap<String, NetworkProfile>,
}

impl NetworkRegistryBuilder {
    /// Add a profile, rejecting duplicate or empty identifiers.
    pub fn profile(mut self, profile: NetworkProfile) -> Result<Self> {
        if profile.id.is_empty() {
            return Err(OrchestrateError::Configuration(
                "network profile has an empty identifier".to_string(),
            ));
        }
        if self.profiles.contains_key(&profile.id) {
            return Err(OrchestrateError::Configuration(format!(
                "duplicate network profile: {}",
                profile.id
            )));
        }
        self.profiles.insert(profile.id.clone(), profile);
        Ok(self)
    }

    pub fn build(self) -> NetworkRegistry {
        NetworkRegistry {
            profiles: self.profiles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_profile(id: &str) -> NetworkProfile {
        NetworkProfile {
            id: id.to_string(),
            endpoint: "http://127.0.0.1:8545".parse().unwrap(),
            chain_id: 1337,
            gas_limit: 6_721_975,
            fee: FeePolicy::Legacy {
                gas_price: 20_000_000_000,
            },
            confirmations: DEFAULT_CONFIRMATIONS,
            timeout_blocks: DEFAULT_TIMEOUT_BLOCKS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    #[test]
    fn test_resolve_known_network() {
        let registry = NetworkRegistry::builder()
            .profile(dev_profile("development"))
            .unwrap()
            .build();

        let profile = registry.resolve("development").unwrap();
        assert_eq!(profile.chain_id, 1337);
        assert_eq!(profile.endpoint.as_str(), "http://127.0.0.1:8545/");
    }

    #[test]
    fn test_resolve_unknown_network() {
        let registry = NetworkRegistry::builder()
            .profile(dev_profile("development"))
            .unwrap()
            .build();

        let err = registry.resolve("unknown-chain").unwrap_err();
        assert!(matches!(
            err,
            OrchestrateError::UnknownNetwork { ref id } if id == "unknown-chain"
        ));
    }

    #[test]
    fn test_duplicate_profile_rejected() {
        let result = NetworkRegistry::builder()
            .profile(dev_profile("development"))
            .unwrap()
            .profile(dev_profile("development"));

        assert!(matches!(result, Err(OrchestrateError::Configuration(_))));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempdir::TempDir::new("ratchet-registry").unwrap();
        let config_path = dir.path().join("Ratchet.toml");
        std::fs::write(
            &config_path,
            r#"
[networks.development]
endpoint = "http://127.0.0.1:8545"
chain_id = 1337
gas_limit = 6721975
gas_price = 20000000000

[networks.polygon]
endpoint = "https://polygon-rpc.com/"
chain_id = 137
gas_limit = 6000000
gas_price = 35000000000
confirmations = 2
timeout_blocks = 200

[networks.mumbai]
endpoint = "https://matic-mumbai.chainstacklabs.com"
chain_id = 80001
gas_limit = 5000000
max_fee_per_gas = 5000000000
max_priority_fee_per_gas = 1500000000
"#,
        )
        .unwrap();

        let registry = NetworkRegistry::load(&config_path).unwrap();
        assert_eq!(registry.names(), vec!["development", "mumbai", "polygon"]);

        let polygon = registry.resolve("polygon").unwrap();
        assert_eq!(polygon.id, "polygon");
        assert_eq!(polygon.chain_id, 137);
        assert_eq!(polygon.confirmations, 2);
        assert_eq!(polygon.timeout_blocks, 200);
        assert_eq!(
            polygon.fee,
            FeePolicy::Legacy {
                gas_price: 35_000_000_000
            }
        );

        let mumbai = registry.resolve("mumbai").unwrap();
        assert_eq!(
            mumbai.fee,
            FeePolicy::Eip1559 {
                max_fee_per_gas: 5_000_000_000,
                max_priority_fee_per_gas: 1_500_000_000,
            }
        );
        // Unspecified knobs fall back to defaults.
        assert_eq!(mumbai.confirmations, DEFAULT_CONFIRMATIONS);
        assert_eq!(mumbai.poll_interval(), Duration::from_millis(2_000));
    }

    #[test]
    fn test_load_rejects_empty_config() {
        let dir = tempdir::TempDir::new("ratchet-registry").unwrap();
        let config_path = dir.path().join("Ratchet.toml");
        std::fs::write(&config_path, "").unwrap();

        let err = NetworkRegistry::load(&config_path).unwrap_err();
        assert!(matches!(err, OrchestrateError::Configuration(_)));
    }
}

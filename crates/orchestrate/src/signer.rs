//! Signer provisioning.
//!
//! Key material enters the process through the environment (one or more
//! comma-separated private keys, HD-wallet style) and is held only for the
//! lifetime of the process. It is never logged or persisted: `Debug` is
//! redacted and the type has no serde implementation.

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;

use crate::error::{OrchestrateError, Result};

/// Environment variable holding the comma-separated private keys.
pub const PRIVATE_KEYS_ENV: &str = "RATCHET_PRIVATE_KEYS";

/// Ordered private-key entries plus the account-selection policy.
#[derive(Clone)]
pub struct SignerConfig {
    keys: Vec<String>,
    account_index: usize,
}

impl SignerConfig {
    /// Build from explicit key strings.
    pub fn new(keys: Vec<String>, account_index: usize) -> Self {
        Self {
            keys,
            account_index,
        }
    }

    /// Read keys from [`PRIVATE_KEYS_ENV`], comma separated.
    pub fn from_env(account_index: usize) -> Result<Self> {
        let raw = std::env::var(PRIVATE_KEYS_ENV).map_err(|_| {
            OrchestrateError::Authentication(format!("{PRIVATE_KEYS_ENV} is not set"))
        })?;
        Ok(Self::from_key_list(&raw, account_index))
    }

    /// Parse a comma-separated key list.
    pub fn from_key_list(raw: &str, account_index: usize) -> Self {
        let keys = raw
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            keys,
            account_index,
        }
    }

    /// Number of configured accounts.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Build the signer for the selected account.
    ///
    /// Fails with [`OrchestrateError::Authentication`] when no keys are
    /// configured, the index is out of range, or the selected key does not
    /// parse as a secp256k1 private key.
    pub fn signer(&self) -> Result<PrivateKeySigner> {
        if self.keys.is_empty() {
            return Err(OrchestrateError::Authentication(
                "no private keys configured".to_string(),
            ));
        }
        let key = self.keys.get(self.account_index).ok_or_else(|| {
            OrchestrateError::Authentication(format!(
                "account index {} out of range ({} keys configured)",
                self.account_index,
                self.keys.len()
            ))
        })?;

        key.parse::<PrivateKeySigner>().map_err(|_| {
            OrchestrateError::Authentication(format!(
                "private key at index {} is malformed",
                self.account_index
            ))
        })
    }

    /// Address of the selected account.
    pub fn address(&self) -> Result<Address> {
        Ok(self.signer()?.address())
    }
}

// Key material must never leak through Debug output.
impl std::fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerConfig")
            .field("keys", &format!("[redacted; {}]", self.keys.len()))
            .field("account_index", &self.account_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known anvil/hardhat development keys.
    const DEV_KEY_0: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_KEY_1: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    #[test]
    fn test_parse_key_list() {
        let config = SignerConfig::from_key_list(&format!("{DEV_KEY_0}, {DEV_KEY_1}"), 1);
        assert_eq!(config.len(), 2);

        let address = config.address().unwrap();
        assert_eq!(
            address.to_string(),
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
        );
    }

    #[test]
    fn test_address_derivation() {
        let config = SignerConfig::from_key_list(DEV_KEY_0, 0);
        assert_eq!(
            config.address().unwrap().to_string(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
    }

    #[test]
    fn test_empty_key_material_rejected() {
        let config = SignerConfig::from_key_list("", 0);
        assert!(config.is_empty());
        assert!(matches!(
            config.signer(),
            Err(OrchestrateError::Authentication(_))
        ));
    }

    #[test]
    fn test_malformed_key_rejected() {
        let config = SignerConfig::from_key_list("0xnot-a-key", 0);
        assert!(matches!(
            config.signer(),
            Err(OrchestrateError::Authentication(_))
        ));
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let config = SignerConfig::from_key_list(DEV_KEY_0, 3);
        assert!(matches!(
            config.signer(),
            Err(OrchestrateError::Authentication(_))
        ));
    }

    #[test]
    fn test_debug_is_redacted() {
        let config = SignerConfig::from_key_list(&format!("{DEV_KEY_0},{DEV_KEY_1}"), 0);
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("ac0974"));
        assert!(rendered.contains("[redacted; 2]"));
    }
}

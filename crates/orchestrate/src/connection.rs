//! Signer-backed network connection.
//!
//! [`connect`] resolves a profile into a live [`Connection`]: it builds the
//! HTTP transport, verifies the endpoint's chain id against the profile and
//! binds the selected signing account. Everything a migration step does on
//! chain goes through this type.

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, B256, Bytes, TxKind, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{OrchestrateError, Result};
use crate::network::{FeePolicy, NetworkProfile};
use crate::rpc::{HttpTransport, Transport, parse_hex_u64};
use crate::signer::SignerConfig;

/// An outgoing transaction, before gas and nonce are filled from the
/// profile and the chain.
#[derive(Debug, Clone, Default)]
pub struct TransactionRequest {
    /// Recipient; `None` deploys a contract.
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    /// Overrides the profile's gas limit when set.
    pub gas_limit: Option<u64>,
    /// Overrides the pending-nonce lookup when set.
    pub nonce: Option<u64>,
}

impl TransactionRequest {
    /// A contract-creation transaction carrying `code` as init code.
    pub fn create(code: Bytes) -> Self {
        Self {
            data: code,
            ..Default::default()
        }
    }

    /// A call transaction to `to` with the given calldata.
    pub fn call(to: Address, data: Bytes) -> Self {
        Self {
            to: Some(to),
            data,
            ..Default::default()
        }
    }
}

/// Receipt subset the orchestrator cares about.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: B256,
    /// `0x1` on success, `0x0` on revert.
    pub status: Option<String>,
    /// Set for contract-creation transactions.
    pub contract_address: Option<Address>,
    /// Hex block number; absent while pending.
    pub block_number: Option<String>,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        // Pre-Byzantium receipts carry no status field; treat them as success.
        self.status.as_deref().map(|s| s != "0x0").unwrap_or(true)
    }

    pub fn block_number(&self) -> Result<Option<u64>> {
        self.block_number
            .as_ref()
            .map(|raw| parse_hex_u64(&Value::String(raw.clone()), "receipt block number"))
            .transpose()
    }
}

/// A send-capable connection to one network.
pub struct Connection {
    transport: std::sync::Arc<dyn Transport>,
    signer: PrivateKeySigner,
    profile: NetworkProfile,
    chain_id: u64,
    // Hashes of transactions submitted through this connection, drained by
    // the executor into migration records.
    submitted: std::sync::Mutex<Vec<B256>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("profile", &self.profile)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

/// Resolve a profile and signer configuration into a live connection.
pub async fn connect(profile: &NetworkProfile, signer_config: &SignerConfig) -> Result<Connection> {
    let signer = signer_config.signer()?;
    let transport = HttpTransport::new(profile.endpoint.clone())?;
    Connection::establish(std::sync::Arc::new(transport), signer, profile.clone()).await
}

impl Connection {
    /// Build a connection over an explicit transport.
    ///
    /// This is the seam for alternate transports (tests, embedded nodes);
    /// [`connect`] is the HTTP front door. The handshake queries the live
    /// chain id and refuses to proceed on a mismatch, since deploying
    /// against the wrong chain is never recoverable.
    pub async fn establish(
        transport: std::sync::Arc<dyn Transport>,
        signer: PrivateKeySigner,
        profile: NetworkProfile,
    ) -> Result<Self> {
        let result = transport.request("eth_chainId", vec![]).await?;
        let chain_id = parse_hex_u64(&result, "chain id")?;

        if chain_id != profile.chain_id {
            return Err(OrchestrateError::ChainIdMismatch {
                expected: profile.chain_id,
                actual: chain_id,
            });
        }

        tracing::info!(
            network = %profile.id,
            chain_id,
            sender = %signer.address(),
            "Connected"
        );

        Ok(Self {
            transport,
            signer,
            profile,
            chain_id,
            submitted: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Address of the signing account.
    pub fn sender(&self) -> Address {
        self.signer.address()
    }

    pub fn profile(&self) -> &NetworkProfile {
        &self.profile
    }

    /// Current head block number.
    pub async fn block_number(&self) -> Result<u64> {
        let result = self.transport.request("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&result, "block number")
    }

    /// Pending-state nonce of the signing account.
    pub async fn pending_nonce(&self) -> Result<u64> {
        let result = self
            .transport
            .request(
                "eth_getTransactionCount",
                vec![json!(self.sender()), json!("pending")],
            )
            .await?;
        parse_hex_u64(&result, "transaction count")
    }

    /// Read-only contract call.
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let result = self
            .transport
            .request(
                "eth_call",
                vec![
                    json!({ "from": self.sender(), "to": to, "data": data }),
                    json!("latest"),
                ],
            )
            .await?;
        parse_bytes(&result, "call result")
    }

    /// Deployed code at an address; empty when nothing lives there.
    pub async fn get_code(&self, address: Address) -> Result<Bytes> {
        let result = self
            .transport
            .request("eth_getCode", vec![json!(address), json!("latest")])
            .await?;
        parse_bytes(&result, "code")
    }

    /// Sign and submit a transaction, returning its hash.
    ///
    /// Gas and fees come from the profile unless the request overrides them;
    /// the nonce is the account's pending nonce unless pinned.
    pub async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256> {
        let nonce = match tx.nonce {
            Some(nonce) => nonce,
            None => self.pending_nonce().await?,
        };
        let gas_limit = tx.gas_limit.unwrap_or(self.profile.gas_limit);
        let to = match tx.to {
            Some(address) => TxKind::Call(address),
            None => TxKind::Create,
        };

        let raw = match self.profile.fee {
            FeePolicy::Legacy { gas_price } => {
                let tx = TxLegacy {
                    chain_id: Some(self.chain_id),
                    nonce,
                    gas_price,
                    gas_limit,
                    to,
                    value: tx.value,
                    input: tx.data,
                };
                let signature = self.sign(tx.signature_hash()).await?;
                TxEnvelope::Legacy(tx.into_signed(signature)).encoded_2718()
            }
            FeePolicy::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let tx = TxEip1559 {
                    chain_id: self.chain_id,
                    nonce,
                    gas_limit,
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                    to,
                    value: tx.value,
                    access_list: Default::default(),
                    input: tx.data,
                };
                let signature = self.sign(tx.signature_hash()).await?;
                TxEnvelope::Eip1559(tx.into_signed(signature)).encoded_2718()
            }
        };

        let result = self
            .transport
            .request(
                "eth_sendRawTransaction",
                vec![json!(format!("0x{}", hex::encode(&raw)))],
            )
            .await?;
        let tx_hash = parse_b256(&result, "transaction hash")?;
        self.submitted.lock().unwrap().push(tx_hash);
        Ok(tx_hash)
    }

    /// Drain the hashes of transactions submitted since the last drain.
    pub fn take_submitted(&self) -> Vec<B256> {
        std::mem::take(&mut self.submitted.lock().unwrap())
    }

    /// Wait until `tx_hash` has at least `confirmations` blocks mined on top
    /// of its inclusion block.
    ///
    /// Gives up with [`OrchestrateError::ConfirmationTimeout`] once the head
    /// has advanced `timeout_blocks` past where the wait started. The
    /// transaction is *not* resubmitted: it may still be mined, and sending
    /// it again could execute it twice.
    pub async fn wait_for_confirmations(
        &self,
        tx_hash: B256,
        confirmations: u64,
    ) -> Result<TxReceipt> {
        let start_block = self.block_number().await?;

        loop {
            let head = self.block_number().await?;

            if let Some(receipt) = self.receipt(tx_hash).await?
                && let Some(mined_at) = receipt.block_number()?
                && head.saturating_sub(mined_at) >= confirmations
            {
                return Ok(receipt);
            }

            let waited = head.saturating_sub(start_block);
            if waited >= self.profile.timeout_blocks {
                return Err(OrchestrateError::ConfirmationTimeout {
                    tx: tx_hash,
                    waited_blocks: waited,
                });
            }

            tokio::time::sleep(self.profile.poll_interval()).await;
        }
    }

    /// Send, wait for the profile's confirmation depth, and verify the
    /// transaction did not revert.
    pub async fn send_and_confirm(&self, tx: TransactionRequest) -> Result<TxReceipt> {
        let tx_hash = self.send_transaction(tx).await?;
        tracing::debug!(network = %self.profile.id, tx = %tx_hash, "Transaction submitted");

        let receipt = self
            .wait_for_confirmations(tx_hash, self.profile.confirmations)
            .await?;

        if !receipt.succeeded() {
            return Err(OrchestrateError::DeploymentReverted(format!(
                "transaction {tx_hash} reverted"
            )));
        }
        Ok(receipt)
    }

    async fn sign(&self, hash: B256) -> Result<alloy_primitives::Signature> {
        self.signer
            .sign_hash(&hash)
            .await
            .map_err(|e| OrchestrateError::Authentication(format!("signing failed: {e}")))
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>> {
        let result = self
            .transport
            .request("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| OrchestrateError::Rpc(format!("malformed receipt: {e}")))
    }
}

fn parse_bytes(value: &Value, what: &str) -> Result<Bytes> {
    let raw = value
        .as_str()
        .ok_or_else(|| OrchestrateError::Rpc(format!("{what}: expected hex string")))?;
    raw.parse()
        .map_err(|e| OrchestrateError::Rpc(format!("{what}: invalid hex: {e}")))
}

fn parse_b256(value: &Value, what: &str) -> Result<B256> {
    let raw = value
        .as_str()
        .ok_or_else(|| OrchestrateError::Rpc(format!("{what}: expected hex string")))?;
    raw.parse()
        .map_err(|e| OrchestrateError::Rpc(format!("{what}: invalid hash: {e}")))
}

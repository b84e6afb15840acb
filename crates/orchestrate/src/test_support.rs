//! Scripted transport double for tests.
//!
//! `MockTransport` answers JSON-RPC requests from a per-method script queue,
//! falling back to defaults that mimic a healthy development chain: the head
//! advances on every `eth_blockNumber` query, sends are acknowledged with a
//! deterministic hash, and receipts come back successful.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use alloy_primitives::{Address, keccak256};
use serde_json::{Value, json};

use crate::error::{OrchestrateError, Result};
use crate::network::{FeePolicy, NetworkProfile};
use crate::rpc::Transport;

/// A development-shaped profile with fast polling for tests.
pub fn test_profile(id: &str, chain_id: u64) -> NetworkProfile {
    NetworkProfile {
        id: id.to_string(),
        endpoint: "http://127.0.0.1:8545".parse().unwrap(),
        chain_id,
        gas_limit: 6_721_975,
        fee: FeePolicy::Legacy {
            gas_price: 20_000_000_000,
        },
        confirmations: 1,
        timeout_blocks: 10,
        poll_interval_ms: 1,
    }
}

/// Well-known anvil development key (account 0).
pub const DEV_KEY_0: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

#[derive(Default)]
struct MockState {
    block_number: u64,
    nonce: u64,
    next_contract: u64,
    // First receipt query for a hash pins its inclusion block.
    receipt_blocks: HashMap<String, u64>,
    scripted: HashMap<String, VecDeque<Result<Value>>>,
    calls: Vec<(String, Vec<Value>)>,
}

pub struct MockTransport {
    chain_id: u64,
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Queue an explicit response for the next call of `method`.
    pub fn push_response(&self, method: &str, response: Result<Value>) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(method.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue `times` consecutive `NetworkUnreachable` failures for `method`.
    pub fn fail_unreachable(&self, method: &str, times: usize) {
        for _ in 0..times {
            self.push_response(
                method,
                Err(OrchestrateError::NetworkUnreachable(format!(
                    "{method}: connection refused"
                ))),
            );
        }
    }

    /// Number of `eth_sendRawTransaction` requests seen so far.
    pub fn sent_transactions(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(method, _)| method == "eth_sendRawTransaction")
            .count()
    }

    fn default_response(&self, state: &mut MockState, method: &str, params: &[Value]) -> Result<Value> {
        match method {
            "eth_chainId" => Ok(json!(format!("0x{:x}", self.chain_id))),
            "eth_blockNumber" => {
                state.block_number += 1;
                Ok(json!(format!("0x{:x}", state.block_number)))
            }
            "eth_getTransactionCount" => {
                let nonce = state.nonce;
                state.nonce += 1;
                Ok(json!(format!("0x{nonce:x}")))
            }
            "eth_sendRawTransaction" => {
                let raw = params
                    .first()
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(json!(keccak256(raw.as_bytes()).to_string()))
            }
            "eth_getTransactionReceipt" => {
                let tx_hash = params
                    .first()
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let head = state.block_number;
                let mined_at = *state.receipt_blocks.entry(tx_hash).or_insert(head);
                state.next_contract += 1;
                let contract = Address::from_word(keccak256(state.next_contract.to_be_bytes()));
                Ok(json!({
                    "transactionHash": params.first().cloned().unwrap_or(Value::Null),
                    "status": "0x1",
                    "blockNumber": format!("0x{mined_at:x}"),
                    "contractAddress": contract.to_string(),
                }))
            }
            "eth_getCode" => Ok(json!("0x6080604052")),
            "eth_call" => Ok(json!("0x")),
            other => Err(OrchestrateError::Rpc(format!(
                "mock transport has no default for {other}"
            ))),
        }
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((method.to_string(), params.clone()));

        if let Some(queue) = state.scripted.get_mut(method)
            && let Some(response) = queue.pop_front()
        {
            return response;
        }

        self.default_response(&mut state, method, &params)
    }
}

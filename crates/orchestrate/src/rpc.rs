//! JSON-RPC transport.
//!
//! The rest of the crate talks to a network through the [`Transport`]
//! capability only; this module provides the HTTP implementation. Tests
//! substitute a scripted in-memory transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;

use crate::error::{OrchestrateError, Result};

/// Default timeout for RPC requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimal JSON-RPC capability: one request, one result.
///
/// Implementations must not retry on their own. Resubmitting a possibly
/// mined transaction risks double execution, so retry decisions belong to
/// the executor, which knows whether the operation is idempotent.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value>;
}

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| OrchestrateError::Rpc(format!("failed to create HTTP client: {e}")))
}

/// HTTP JSON-RPC transport backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    url: url::Url,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: url::Url) -> Result<Self> {
        Ok(Self {
            client: create_client(DEFAULT_REQUEST_TIMEOUT)?,
            url,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .post(self.url.clone())
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": id
            }))
            .send()
            .await
            .map_err(|e| classify_reqwest_error(method, e))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| OrchestrateError::Rpc(format!("failed to parse {method} response: {e}")))?;

        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown");
            return Err(OrchestrateError::Rpc(format!("{method}: {message}")));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| OrchestrateError::Rpc(format!("{method}: no result in response")))
    }
}

/// Connectivity failures are transient; everything else is a protocol error.
fn classify_reqwest_error(method: &str, err: reqwest::Error) -> OrchestrateError {
    if err.is_timeout() || err.is_connect() {
        OrchestrateError::NetworkUnreachable(format!("{method}: {err}"))
    } else {
        OrchestrateError::Rpc(format!("{method}: {err}"))
    }
}

/// Parse a `0x`-prefixed quantity from a JSON-RPC result.
pub(crate) fn parse_hex_u64(value: &Value, what: &str) -> Result<u64> {
    let raw = value
        .as_str()
        .ok_or_else(|| OrchestrateError::Rpc(format!("{what}: expected hex string")))?;
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| OrchestrateError::Rpc(format!("{what}: invalid hex quantity: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(
            parse_hex_u64(&Value::String("0x539".to_string()), "chain id").unwrap(),
            1337
        );
        assert_eq!(
            parse_hex_u64(&Value::String("0x0".to_string()), "nonce").unwrap(),
            0
        );

        let err = parse_hex_u64(&Value::Null, "chain id").unwrap_err();
        assert!(matches!(err, OrchestrateError::Rpc(_)));

        let err = parse_hex_u64(&Value::String("0xzz".to_string()), "nonce").unwrap_err();
        assert!(matches!(err, OrchestrateError::Rpc(_)));
    }
}

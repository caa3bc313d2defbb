//! JSON-RPC health battery for a single endpoint.
//!
//! The battery is fixed and ordered: client version, chain id, balance of the target
//! account, latest block number. Every call is captured on its own; one failing call
//! never aborts the rest.

mod jsonrpc;

pub use jsonrpc::{parse_quantity, RpcErrorObject, RpcRequest, RpcResponse};

use reqwest::Client;
use rpcdiag_core::{methods, Account, Endpoint, RetryPolicy, RpcMethodResult, RpcValue};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decode {
    Text,
    Quantity,
}

#[derive(Debug, Error)]
enum CallError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {0} without a JSON-RPC body")]
    Status(reqwest::StatusCode),
    #[error("malformed JSON-RPC response: {0}")]
    Malformed(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("response has no result")]
    MissingResult,
}

impl CallError {
    fn is_transient(&self) -> bool {
        match self {
            CallError::Transport(e) => probes::is_transient(e),
            CallError::Status(s) => s.is_server_error(),
            _ => false,
        }
    }

    fn describe(&self) -> String {
        match self {
            CallError::Transport(e) => error_chain(e),
            other => other.to_string(),
        }
    }
}

fn error_chain(e: &reqwest::Error) -> String {
    let mut out = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}

pub struct RpcChecker {
    client: Client,
    timeout: Duration,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl RpcChecker {
    pub fn new(client: Client, timeout: Duration, retry: RetryPolicy) -> Self {
        RpcChecker { client, timeout, retry, next_id: AtomicU64::new(1) }
    }

    /// Run the battery against `endpoint`. Results come back in battery order.
    pub async fn check(&self, endpoint: &Endpoint, account: &Account, expected_chain_id: u64) -> Vec<RpcMethodResult> {
        let battery: [(&str, Value, Decode); 4] = [
            (methods::CLIENT_VERSION, json!([]), Decode::Text),
            (methods::CHAIN_ID, json!([]), Decode::Quantity),
            (methods::GET_BALANCE, json!([account.to_hex(), "latest"]), Decode::Quantity),
            (methods::BLOCK_NUMBER, json!([]), Decode::Quantity),
        ];
        let mut out = Vec::with_capacity(battery.len());
        for (method, params, decode) in &battery {
            let r = self.call(&endpoint.url, method, params, *decode).await;
            if *method == methods::CHAIN_ID {
                if let Some(RpcValue::Quantity(id)) = &r.value {
                    if *id != u128::from(expected_chain_id) {
                        warn!(endpoint = %endpoint.url, observed = %id, expected = expected_chain_id, "chain id mismatch");
                    }
                }
            }
            out.push(r);
        }
        out
    }

    async fn call(&self, url: &str, method: &str, params: &Value, decode: Decode) -> RpcMethodResult {
        let started = Instant::now();
        let res = self
            .retry
            .run(|| self.post(url, method, params), |r| matches!(r, Err(e) if e.is_transient()))
            .await;
        let latency = started.elapsed();
        let decoded = res.map_err(|e| e.describe()).and_then(|v| match decode {
            Decode::Text => Ok(RpcValue::Text(v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))),
            Decode::Quantity => parse_quantity(&v).map(RpcValue::Quantity),
        });
        match decoded {
            Ok(value) => {
                debug!(url, method, latency_ms = latency.as_millis() as u64, %value, "rpc ok");
                RpcMethodResult::ok(method, latency, value)
            }
            Err(error) => {
                debug!(url, method, latency_ms = latency.as_millis() as u64, %error, "rpc failed");
                RpcMethodResult::failed(method, latency, error)
            }
        }
    }

    async fn post(&self, url: &str, method: &str, params: &Value) -> Result<Value, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = RpcRequest::new(id, method, params);
        let resp = self.client.post(url).timeout(self.timeout).json(&req).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        let parsed: RpcResponse = match serde_json::from_slice(&body) {
            Ok(p) => p,
            Err(_) if !status.is_success() => return Err(CallError::Status(status)),
            Err(e) => return Err(CallError::Malformed(e.to_string())),
        };
        if let Some(err) = parsed.error {
            return Err(CallError::Rpc { code: err.code, message: err.message });
        }
        parsed.result.ok_or(CallError::MissingResult)
    }
}

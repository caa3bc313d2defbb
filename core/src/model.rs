//! Result types shared by probes, the RPC checker, the orchestrator and the diagnosis engine.

use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// JSON-RPC method names of the health battery.
pub mod methods {
    pub const CLIENT_VERSION: &str = "web3_clientVersion";
    pub const CHAIN_ID: &str = "eth_chainId";
    pub const GET_BALANCE: &str = "eth_getBalance";
    pub const BLOCK_NUMBER: &str = "eth_blockNumber";

    /// Methods whose failure makes an endpoint unhealthy.
    pub const REQUIRED: &[&str] = &[CHAIN_ID, GET_BALANCE, BLOCK_NUMBER];
}

/// One JSON-RPC server under test. Identity is the URL string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub url: String,
    pub hostname: String,
    pub port: u16,
}

impl Endpoint {
    pub fn is_https(&self) -> bool {
        self.url.get(..8).map_or(false, |p| p.eq_ignore_ascii_case("https://"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Dns,
    Tls,
    Http,
    Rpc,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Dns => "dns",
            Layer::Tls => "tls",
            Layer::Http => "http",
            Layer::Rpc => "rpc",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    Failed,
}

/// Result of a single layer-specific probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub target: String,
    pub layer: Layer,
    pub outcome: Outcome,
    #[serde(rename = "latency_ms", serialize_with = "duration_ms")]
    pub latency: Duration,
    pub detail: String,
}

impl ProbeResult {
    pub fn ok(target: impl Into<String>, layer: Layer, latency: Duration, detail: impl Into<String>) -> Self {
        ProbeResult { target: target.into(), layer, outcome: Outcome::Ok, latency, detail: detail.into() }
    }

    pub fn failed(target: impl Into<String>, layer: Layer, latency: Duration, detail: impl Into<String>) -> Self {
        ProbeResult { target: target.into(), layer, outcome: Outcome::Failed, latency, detail: detail.into() }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Ok
    }
}

/// Decoded JSON-RPC result. Quantities are serialized as decimal strings since
/// wei balances do not fit a JSON number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RpcValue {
    Text(String),
    Quantity(#[serde(serialize_with = "decimal")] u128),
}

impl fmt::Display for RpcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcValue::Text(s) => f.write_str(s),
            RpcValue::Quantity(q) => write!(f, "{}", q),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcMethodResult {
    pub method: String,
    pub outcome: Outcome,
    #[serde(rename = "latency_ms", serialize_with = "duration_ms")]
    pub latency: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<RpcValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcMethodResult {
    pub fn ok(method: &str, latency: Duration, value: RpcValue) -> Self {
        RpcMethodResult { method: method.to_string(), outcome: Outcome::Ok, latency, value: Some(value), error: None }
    }

    pub fn failed(method: &str, latency: Duration, error: impl Into<String>) -> Self {
        RpcMethodResult { method: method.to_string(), outcome: Outcome::Failed, latency, value: None, error: Some(error.into()) }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Ok
    }
}

/// Everything observed for one endpoint during a run. Each slot is written once by
/// the task probing that endpoint; `None` means the layer was never reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointReport {
    pub endpoint: Endpoint,
    pub expected_chain_id: u64,
    pub dns: Option<ProbeResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_public: Option<ProbeResult>,
    pub tls: Option<ProbeResult>,
    pub http: Option<ProbeResult>,
    pub rpc: Vec<RpcMethodResult>,
    pub complete: bool,
}

impl EndpointReport {
    pub fn new(endpoint: Endpoint, expected_chain_id: u64) -> Self {
        EndpointReport {
            endpoint,
            expected_chain_id,
            dns: None,
            dns_public: None,
            tls: None,
            http: None,
            rpc: Vec::new(),
            complete: false,
        }
    }

    pub fn rpc_result(&self, method: &str) -> Option<&RpcMethodResult> {
        self.rpc.iter().find(|r| r.method == method)
    }

    /// DNS and TLS succeeded and every required RPC method returned a result.
    /// A chain id mismatch does not affect health.
    pub fn healthy(&self) -> bool {
        slot_ok(&self.dns)
            && slot_ok(&self.tls)
            && methods::REQUIRED.iter().all(|m| self.rpc_result(m).map_or(false, |r| r.is_ok()))
    }

    /// Required methods that were attempted and failed, in battery order.
    pub fn failed_required(&self) -> Vec<&RpcMethodResult> {
        self.rpc
            .iter()
            .filter(|r| !r.is_ok() && methods::REQUIRED.contains(&r.method.as_str()))
            .collect()
    }

    /// Chain id reported by `eth_chainId`, if that call succeeded.
    pub fn chain_id(&self) -> Option<u128> {
        match self.rpc_result(methods::CHAIN_ID)?.value {
            Some(RpcValue::Quantity(q)) => Some(q),
            _ => None,
        }
    }

    pub fn chain_mismatch(&self) -> bool {
        self.chain_id().map_or(false, |id| id != u128::from(self.expected_chain_id))
    }

    /// Mean latency of the RPC calls that succeeded.
    pub fn latency(&self) -> Option<Duration> {
        let ok: Vec<Duration> = self.rpc.iter().filter(|r| r.is_ok()).map(|r| r.latency).collect();
        if ok.is_empty() {
            return None;
        }
        Some(ok.iter().sum::<Duration>() / ok.len() as u32)
    }
}

fn slot_ok(slot: &Option<ProbeResult>) -> bool {
    slot.as_ref().map_or(false, ProbeResult::is_ok)
}

/// Local system facts captured once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvironmentSnapshot {
    /// Names of the proxy variables that are set. Values are never recorded.
    pub proxy_vars: Vec<String>,
    pub no_proxy: bool,
    pub dns_server_count: usize,
    pub default_route: Option<String>,
    pub firewall: Option<String>,
    pub os: String,
}

impl EnvironmentSnapshot {
    pub fn has_proxy(&self) -> bool {
        !self.proxy_vars.is_empty()
    }
}

pub fn duration_ms<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis().min(u128::from(u64::MAX)) as u64)
}

fn decimal<S: Serializer>(v: &u128, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&v.to_string())
}

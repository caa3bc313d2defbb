//! Layer-specific connectivity probes: DNS, TLS handshake and plain HTTP reachability.
//!
//! Probes never return errors. Every failure (timeout, refusal, certificate problem,
//! resolution error) is folded into a [`ProbeResult`] with `outcome = failed`.

mod dns;
mod http;
mod tls;

pub use dns::{resolve, resolve_via, DEFAULT_PUBLIC_RESOLVER};
pub use http::{baseline, http_client, is_transient, reach, DEFAULT_BASELINE_URL};
pub use tls::handshake;

use anyhow::{anyhow, Result};
use rpcdiag_core::{Layer, ProbeResult};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TLS_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Await `fut` for at most `limit`, naming the operation in the timeout error.
pub(crate) async fn within<T, E, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<anyhow::Error>,
{
    match timeout(limit, fut).await {
        Ok(r) => r.map_err(Into::into),
        Err(_) => Err(anyhow!("{} timed out after {} ms", what, limit.as_millis())),
    }
}

pub(crate) fn finish(target: &str, layer: Layer, started: Instant, res: Result<String>) -> ProbeResult {
    let latency = started.elapsed();
    match res {
        Ok(detail) => {
            debug!(target_host = target, %layer, latency_ms = latency.as_millis() as u64, %detail, "probe ok");
            ProbeResult::ok(target, layer, latency, detail)
        }
        Err(e) => {
            let detail = format!("{:#}", e);
            debug!(target_host = target, %layer, latency_ms = latency.as_millis() as u64, %detail, "probe failed");
            ProbeResult::failed(target, layer, latency, detail)
        }
    }
}

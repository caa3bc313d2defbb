//! Runs one diagnostic pass: bounded fan-out over endpoints, one task per endpoint
//! walking DNS, TLS, HTTP and the RPC battery, with the baseline probe and the
//! environment snapshot captured alongside.

use anyhow::Result;
use diagnosis::{diagnose_with, DiagnosisReport, RunContext};
use reqwest::Client;
use rpc_health::RpcChecker;
use rpcdiag_core::{
    parse_account, parse_endpoints, Account, Endpoint, EndpointReport, EnvironmentSnapshot, InputError, Layer, ProbeResult,
    RetryPolicy,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Endpoints probed at the same time.
    pub concurrency: usize,
    pub dns_timeout: Duration,
    pub tls_timeout: Duration,
    pub http_timeout: Duration,
    pub rpc_timeout: Duration,
    pub retry: RetryPolicy,
    /// Health URL probed once per run; `None` skips the baseline.
    pub baseline_url: Option<String>,
    /// Resolver asked directly to cross-check the system resolver; `None` skips it.
    pub public_resolver: Option<SocketAddr>,
    pub user_agent: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            concurrency: DEFAULT_CONCURRENCY,
            dns_timeout: probes::DEFAULT_DNS_TIMEOUT,
            tls_timeout: probes::DEFAULT_TLS_TIMEOUT,
            http_timeout: probes::DEFAULT_HTTP_TIMEOUT,
            rpc_timeout: rpc_health::DEFAULT_RPC_TIMEOUT,
            retry: RetryPolicy::default(),
            baseline_url: Some(probes::DEFAULT_BASELINE_URL.to_string()),
            public_resolver: probes::DEFAULT_PUBLIC_RESOLVER.parse().ok(),
            user_agent: format!("rpcdiag/{}", rpcdiag_core::version()),
        }
    }
}

/// Everything a run observed, before diagnosis.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// One report per endpoint, in input order.
    pub reports: Vec<EndpointReport>,
    pub snapshot: EnvironmentSnapshot,
    pub baseline: Option<ProbeResult>,
    pub incomplete: bool,
}

impl RunOutcome {
    pub fn diagnose(&self) -> DiagnosisReport {
        let ctx = RunContext { baseline: self.baseline.clone(), incomplete: self.incomplete };
        diagnose_with(&self.reports, &self.snapshot, &ctx)
    }
}

struct Inner {
    config: RunConfig,
    client: Client,
    checker: RpcChecker,
}

/// Shared probing state for runs: one HTTP client and one RPC checker.
#[derive(Clone)]
pub struct Diagnostic {
    inner: Arc<Inner>,
}

impl Diagnostic {
    pub fn new(config: RunConfig) -> Result<Self> {
        let client = probes::http_client(&config.user_agent)?;
        let checker = RpcChecker::new(client.clone(), config.rpc_timeout, config.retry);
        Ok(Diagnostic { inner: Arc::new(Inner { config, client, checker }) })
    }

    /// Validate raw input, then run. Nothing touches the network if validation fails.
    pub async fn run_urls<S: AsRef<str>>(
        &self,
        urls: &[S],
        account: &str,
        expected_chain_id: u64,
        cancel: &CancellationToken,
    ) -> std::result::Result<RunOutcome, InputError> {
        let endpoints = parse_endpoints(urls.iter().map(|u| u.as_ref()))?;
        let account = parse_account(account)?;
        Ok(self.run(&endpoints, &account, expected_chain_id, cancel).await)
    }

    /// Probe every endpoint. Never fails: failures are recorded in the reports, and a
    /// cancelled run returns whatever finished with `incomplete` set.
    pub async fn run(
        &self,
        endpoints: &[Endpoint],
        account: &Account,
        expected_chain_id: u64,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let cfg = &self.inner.config;
        let started = Instant::now();
        info!(endpoints = endpoints.len(), concurrency = cfg.concurrency, expected_chain_id, "run started");

        let sem = Arc::new(Semaphore::new(cfg.concurrency.clamp(1, Semaphore::MAX_PERMITS)));
        let handles: Vec<JoinHandle<EndpointReport>> = endpoints
            .iter()
            .cloned()
            .map(|endpoint| {
                let inner = self.inner.clone();
                let sem = sem.clone();
                let cancel = cancel.clone();
                let account = *account;
                tokio::spawn(async move {
                    let _permit = match until_cancelled(&cancel, sem.acquire_owned()).await {
                        Some(Ok(p)) => p,
                        _ => return EndpointReport::new(endpoint, expected_chain_id),
                    };
                    probe_endpoint(&inner, endpoint, &account, expected_chain_id, &cancel).await
                })
            })
            .collect();

        let fan_in = async {
            let mut reports = Vec::with_capacity(handles.len());
            for (handle, endpoint) in handles.into_iter().zip(endpoints) {
                match handle.await {
                    Ok(r) => reports.push(r),
                    Err(e) => {
                        warn!(endpoint = %endpoint.url, error = %e, "endpoint task failed");
                        reports.push(EndpointReport::new(endpoint.clone(), expected_chain_id));
                    }
                }
            }
            reports
        };
        let baseline = async {
            match &cfg.baseline_url {
                Some(url) => {
                    until_cancelled(cancel, probes::baseline(&self.inner.client, url, cfg.http_timeout, &cfg.retry)).await
                }
                None => None,
            }
        };
        let (reports, baseline, snapshot) = tokio::join!(fan_in, baseline, environment::snapshot());

        let incomplete = reports.iter().any(|r| !r.complete);
        let healthy = reports.iter().filter(|r| r.healthy()).count();
        info!(
            healthy,
            total = reports.len(),
            incomplete,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        RunOutcome { reports, snapshot, baseline, incomplete }
    }
}

/// Await `fut` unless `cancel` fires first.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

fn record(endpoint: &Endpoint, p: ProbeResult) -> Option<ProbeResult> {
    if !p.is_ok() {
        warn!(endpoint = %endpoint.url, layer = %p.layer, detail = %p.detail, "layer failed");
    }
    Some(p)
}

/// Walk every layer for one endpoint. Later layers run even when earlier ones fail, so
/// the report shows exactly where the stack breaks. Returns early, with `complete`
/// unset, when the run is cancelled.
async fn probe_endpoint(
    inner: &Inner,
    endpoint: Endpoint,
    account: &Account,
    expected_chain_id: u64,
    cancel: &CancellationToken,
) -> EndpointReport {
    let cfg = &inner.config;
    let mut report = EndpointReport::new(endpoint.clone(), expected_chain_id);
    let host = endpoint.hostname.as_str();
    debug!(endpoint = %endpoint.url, "probing");

    let dns = async {
        let public = async {
            match cfg.public_resolver {
                Some(server) => Some(probes::resolve_via(host, server, cfg.dns_timeout).await),
                None => None,
            }
        };
        tokio::join!(probes::resolve(host, cfg.dns_timeout), public)
    };
    let Some((dns, public)) = until_cancelled(cancel, dns).await else { return report };
    report.dns = record(&endpoint, dns);
    report.dns_public = public;

    let tls = async {
        if endpoint.is_https() {
            probes::handshake(host, endpoint.port, cfg.tls_timeout).await
        } else {
            let target = format!("{}:{}", host, endpoint.port);
            ProbeResult::ok(target, Layer::Tls, Duration::ZERO, "skipped: plain http endpoint")
        }
    };
    let Some(tls) = until_cancelled(cancel, tls).await else { return report };
    report.tls = record(&endpoint, tls);

    let http = probes::reach(&inner.client, &endpoint.url, cfg.http_timeout, &cfg.retry);
    let Some(http) = until_cancelled(cancel, http).await else { return report };
    report.http = record(&endpoint, http);

    let rpc = inner.checker.check(&endpoint, account, expected_chain_id);
    let Some(rpc) = until_cancelled(cancel, rpc).await else { return report };
    for failed in rpc.iter().filter(|m| !m.is_ok()) {
        warn!(endpoint = %endpoint.url, method = %failed.method, error = failed.error.as_deref().unwrap_or(""), "rpc call failed");
    }
    report.rpc = rpc;
    report.complete = true;
    report
}

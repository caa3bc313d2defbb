//! Diagnosis and recommendation engine.
//!
//! Classifies every endpoint report into a root cause, deduplicates the causes into
//! report-level findings, ranks the endpoints and derives a numbered remediation plan.
//! All of it is a pure function of the reports, the environment snapshot and the run
//! context: no clock, no randomness.

mod remedies;
mod render;

pub use remedies::remedies;

use rpcdiag_core::{EndpointReport, EnvironmentSnapshot, ProbeResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// The single failure layer assigned to an endpoint. Declaration order is the
/// classification precedence and the order findings are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RootCause {
    DnsResolution,
    TlsHandshake,
    TransportBlocked,
    RpcApplicationError,
    WrongNetwork,
    ProbeIncomplete,
}

impl RootCause {
    pub const ALL: [RootCause; 6] = [
        RootCause::DnsResolution,
        RootCause::TlsHandshake,
        RootCause::TransportBlocked,
        RootCause::RpcApplicationError,
        RootCause::WrongNetwork,
        RootCause::ProbeIncomplete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RootCause::DnsResolution => "dns-resolution",
            RootCause::TlsHandshake => "tls-handshake",
            RootCause::TransportBlocked => "transport-blocked",
            RootCause::RpcApplicationError => "rpc-application-error",
            RootCause::WrongNetwork => "wrong-network",
            RootCause::ProbeIncomplete => "probe-incomplete",
        }
    }
}

impl fmt::Display for RootCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Findings about the run as a whole rather than a particular endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunIssue {
    NoInternet,
    ProxyDetected,
    IncompleteRun,
}

impl RunIssue {
    pub const ALL: [RunIssue; 3] = [RunIssue::NoInternet, RunIssue::ProxyDetected, RunIssue::IncompleteRun];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunIssue::NoInternet => "no-internet",
            RunIssue::ProxyDetected => "proxy-detected",
            RunIssue::IncompleteRun => "incomplete-run",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum FindingKind {
    Endpoint(RootCause),
    Run(RunIssue),
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::Endpoint(c) => c.as_str(),
            FindingKind::Run(i) => i.as_str(),
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deduplicated statement about one root cause, listing every affected endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub summary: String,
    pub endpoints: Vec<String>,
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub step: usize,
    pub kind: FindingKind,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedEndpoint {
    pub rank: usize,
    pub url: String,
    pub healthy: bool,
    pub root_cause: Option<RootCause>,
    pub latency_ms: Option<u64>,
    pub chain_id: Option<u64>,
    pub report: EndpointReport,
}

/// Run-level facts that are not part of any endpoint report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunContext {
    pub baseline: Option<ProbeResult>,
    pub incomplete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosisReport {
    /// Set when the run was cancelled. An incomplete report is not a clean
    /// "all endpoints unhealthy" result.
    pub incomplete: bool,
    pub healthy_count: usize,
    pub expected_chain_id: Option<u64>,
    /// First ranked endpoint with no root cause at all: healthy, reachable over HTTP
    /// and serving the expected chain.
    pub suggested_endpoint: Option<String>,
    pub endpoints: Vec<RankedEndpoint>,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<Recommendation>,
    pub baseline: Option<ProbeResult>,
    pub environment: EnvironmentSnapshot,
}

impl DiagnosisReport {
    pub fn any_healthy(&self) -> bool {
        self.healthy_count > 0
    }

    /// Process exit status: 0 if at least one endpoint is healthy.
    pub fn exit_code(&self) -> u8 {
        if self.any_healthy() { 0 } else { 1 }
    }

    /// Human-readable rendering: ranked endpoints, issues, numbered remediation steps.
    pub fn render_text(&self) -> String {
        self.to_string()
    }
}

fn failed(slot: &Option<ProbeResult>) -> bool {
    matches!(slot, Some(p) if !p.is_ok())
}

/// Classify one endpoint. `None` means healthy on the expected chain.
pub fn classify(report: &EndpointReport) -> Option<RootCause> {
    if failed(&report.dns) {
        return Some(RootCause::DnsResolution);
    }
    if failed(&report.tls) {
        return Some(RootCause::TlsHandshake);
    }
    if failed(&report.http) {
        return Some(RootCause::TransportBlocked);
    }
    if !report.failed_required().is_empty() {
        return Some(RootCause::RpcApplicationError);
    }
    if !report.healthy() {
        return Some(RootCause::ProbeIncomplete);
    }
    if report.chain_mismatch() {
        return Some(RootCause::WrongNetwork);
    }
    None
}

/// Indices of `reports` ordered healthy first, then by ascending latency. Endpoints
/// without a latency sort last; the sort is stable so ties keep input order.
pub fn rank(reports: &[EndpointReport]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..reports.len()).collect();
    order.sort_by_key(|&i| (!reports[i].healthy(), reports[i].latency().unwrap_or(Duration::MAX)));
    order
}

pub fn diagnose(reports: &[EndpointReport], snapshot: &EnvironmentSnapshot) -> DiagnosisReport {
    diagnose_with(reports, snapshot, &RunContext::default())
}

pub fn diagnose_with(reports: &[EndpointReport], snapshot: &EnvironmentSnapshot, ctx: &RunContext) -> DiagnosisReport {
    let causes: Vec<Option<RootCause>> = reports.iter().map(classify).collect();

    let endpoints: Vec<RankedEndpoint> = rank(reports)
        .into_iter()
        .enumerate()
        .map(|(pos, i)| {
            let r = &reports[i];
            RankedEndpoint {
                rank: pos + 1,
                url: r.endpoint.url.clone(),
                healthy: r.healthy(),
                root_cause: causes[i],
                latency_ms: r.latency().map(|d| d.as_millis() as u64),
                chain_id: r.chain_id().and_then(|c| u64::try_from(c).ok()),
                report: r.clone(),
            }
        })
        .collect();

    let mut grouped: BTreeMap<RootCause, Vec<&EndpointReport>> = BTreeMap::new();
    for (r, cause) in reports.iter().zip(&causes) {
        if let Some(c) = cause {
            grouped.entry(*c).or_default().push(r);
        }
    }

    let mut plan: Vec<(Finding, Vec<String>)> = Vec::new();
    if let Some(b) = ctx.baseline.as_ref().filter(|b| !b.is_ok()) {
        plan.push((
            Finding {
                kind: FindingKind::Run(RunIssue::NoInternet),
                summary: format!("Baseline connectivity check to {} failed", b.target),
                endpoints: Vec::new(),
                hints: vec![b.detail.clone()],
            },
            Vec::new(),
        ));
    }
    for (cause, affected) in &grouped {
        plan.push(endpoint_finding(*cause, affected, snapshot));
    }
    if snapshot.has_proxy() && reports.iter().any(|r| !r.healthy()) {
        plan.push((
            Finding {
                kind: FindingKind::Run(RunIssue::ProxyDetected),
                summary: format!("Proxy detected ({})", snapshot.proxy_vars.join(", ")),
                endpoints: Vec::new(),
                hints: vec!["A proxy may interfere with RPC calls".to_string()],
            },
            Vec::new(),
        ));
    }
    if ctx.incomplete {
        plan.push((
            Finding {
                kind: FindingKind::Run(RunIssue::IncompleteRun),
                summary: "Run was cancelled before every probe finished".to_string(),
                endpoints: reports.iter().filter(|r| !r.complete).map(|r| r.endpoint.url.clone()).collect(),
                hints: Vec::new(),
            },
            Vec::new(),
        ));
    }

    let mut recommendations = Vec::new();
    for (finding, extra) in &plan {
        let steps = extra.iter().cloned().chain(remedies(finding.kind).iter().map(|s| s.to_string()));
        for text in steps {
            recommendations.push(Recommendation { step: recommendations.len() + 1, kind: finding.kind, text });
        }
    }
    let findings: Vec<Finding> = plan.into_iter().map(|(f, _)| f).collect();

    let healthy_count = endpoints.iter().filter(|e| e.healthy).count();
    let suggested_endpoint = endpoints
        .iter()
        .find(|e| e.healthy && e.root_cause.is_none())
        .map(|e| e.url.clone());
    debug!(healthy_count, findings = findings.len(), incomplete = ctx.incomplete, "diagnosis complete");

    DiagnosisReport {
        incomplete: ctx.incomplete,
        healthy_count,
        expected_chain_id: reports.first().map(|r| r.expected_chain_id),
        suggested_endpoint,
        endpoints,
        findings,
        recommendations,
        baseline: ctx.baseline.clone(),
        environment: snapshot.clone(),
    }
}

/// Build the finding for one root cause, plus remediation steps that depend on the
/// affected endpoints or the environment. Those come before the fixed table entries.
fn endpoint_finding(cause: RootCause, affected: &[&EndpointReport], snapshot: &EnvironmentSnapshot) -> (Finding, Vec<String>) {
    let urls: Vec<String> = affected.iter().map(|r| r.endpoint.url.clone()).collect();
    let n = affected.len();
    let mut hints = Vec::new();
    let mut extra = Vec::new();
    let detail_of = |slot: &Option<ProbeResult>| slot.as_ref().map(|p| format!("{}: {}", p.target, p.detail));

    let summary = match cause {
        RootCause::DnsResolution => {
            hints.extend(affected.iter().filter_map(|r| detail_of(&r.dns)));
            let public_ok: Vec<&str> = affected
                .iter()
                .filter(|r| r.dns_public.as_ref().map_or(false, |p| p.is_ok()))
                .map(|r| r.endpoint.hostname.as_str())
                .collect();
            if !public_ok.is_empty() {
                hints.push(format!("A public resolver answered for {}: the local resolver is failing", public_ok.join(", ")));
                extra.push(format!(
                    "Fix the local DNS configuration first: {} resolve through a public resolver but not locally",
                    public_ok.join(", ")
                ));
            }
            format!("DNS resolution failed for {} endpoint(s): {}", n, hostnames(affected))
        }
        RootCause::TlsHandshake => {
            hints.extend(affected.iter().filter_map(|r| detail_of(&r.tls)));
            if snapshot.has_proxy() {
                hints.push(format!(
                    "Proxy variables are set ({}): the proxy may be intercepting TLS",
                    snapshot.proxy_vars.join(", ")
                ));
                extra.push(format!("Unset {} and retry to rule out proxy interference", snapshot.proxy_vars.join(", ")));
            } else {
                hints.push("No proxy is configured: check the system clock and CA trust store".to_string());
            }
            format!("TLS handshake failed for {} endpoint(s): {}", n, hostnames(affected))
        }
        RootCause::TransportBlocked => {
            hints.extend(affected.iter().filter_map(|r| detail_of(&r.http)));
            hints.push("DNS and TLS succeed but HTTP does not: a firewall or the ISP may be blocking requests".to_string());
            if let Some(fw) = &snapshot.firewall {
                hints.push(format!("Firewall: {}", fw));
            }
            format!("HTTP requests fail for {} endpoint(s) although TLS succeeds", n)
        }
        RootCause::RpcApplicationError => {
            for r in affected {
                for m in r.failed_required() {
                    hints.push(format!(
                        "{}: {} failed ({})",
                        r.endpoint.url,
                        m.method,
                        m.error.as_deref().unwrap_or("unknown error")
                    ));
                }
            }
            format!("JSON-RPC calls fail on {} endpoint(s)", n)
        }
        RootCause::WrongNetwork => {
            for r in affected {
                let observed = r.chain_id().map(|c| c.to_string()).unwrap_or_default();
                hints.push(format!("{} reports chain id {}, expected {}", r.endpoint.url, observed, r.expected_chain_id));
                extra.push(format!(
                    "Endpoint {} serves chain id {} but chain id {} is expected: select the network with chain id {} or use an endpoint that serves it",
                    r.endpoint.url, observed, r.expected_chain_id, r.expected_chain_id
                ));
            }
            format!("{} endpoint(s) serve a different chain than expected", n)
        }
        RootCause::ProbeIncomplete => format!("Probing did not finish for {} endpoint(s)", n),
    };

    (Finding { kind: FindingKind::Endpoint(cause), summary, endpoints: urls, hints }, extra)
}

fn hostnames(affected: &[&EndpointReport]) -> String {
    let mut hosts: Vec<&str> = Vec::new();
    for r in affected {
        if !hosts.contains(&r.endpoint.hostname.as_str()) {
            hosts.push(&r.endpoint.hostname);
        }
    }
    hosts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpcdiag_core::{methods, Endpoint, Layer, RpcMethodResult, RpcValue};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn report(url: &str, chain: u128, rpc_ms: u64) -> EndpointReport {
        let ep = Endpoint::parse(url).unwrap();
        let host = ep.hostname.clone();
        let mut r = EndpointReport::new(ep, 943);
        r.dns = Some(ProbeResult::ok(&host, Layer::Dns, ms(2), "10.0.0.1"));
        r.tls = Some(ProbeResult::ok(format!("{}:443", host), Layer::Tls, ms(15), "TLS 1.3"));
        r.http = Some(ProbeResult::ok(url, Layer::Http, ms(20), "HTTP 405 Method Not Allowed"));
        r.rpc = vec![
            RpcMethodResult::ok(methods::CLIENT_VERSION, ms(rpc_ms), RpcValue::Text("Geth".into())),
            RpcMethodResult::ok(methods::CHAIN_ID, ms(rpc_ms), RpcValue::Quantity(chain)),
            RpcMethodResult::ok(methods::GET_BALANCE, ms(rpc_ms), RpcValue::Quantity(0)),
            RpcMethodResult::ok(methods::BLOCK_NUMBER, ms(rpc_ms), RpcValue::Quantity(100)),
        ];
        r.complete = true;
        r
    }

    fn dns_failed(url: &str) -> EndpointReport {
        let mut r = report(url, 943, 10);
        let host = r.endpoint.hostname.clone();
        r.dns = Some(ProbeResult::failed(&host, Layer::Dns, ms(5), "failed to lookup address information"));
        r.tls = Some(ProbeResult::failed(format!("{}:443", host), Layer::Tls, ms(5), "tcp connect: dns error"));
        r.http = Some(ProbeResult::failed(url, Layer::Http, ms(5), "error sending request"));
        r.rpc = methods::REQUIRED
            .iter()
            .chain(std::iter::once(&methods::CLIENT_VERSION))
            .map(|m| RpcMethodResult::failed(m, ms(5), "error sending request"))
            .collect();
        r
    }

    #[test]
    fn all_healthy_ranked_by_latency_without_findings() {
        let reports = vec![
            report("https://a.example", 943, 300),
            report("https://b.example", 943, 100),
            report("https://c.example", 943, 200),
        ];
        let d = diagnose(&reports, &EnvironmentSnapshot::default());
        let urls: Vec<&str> = d.endpoints.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["https://b.example", "https://c.example", "https://a.example"]);
        assert_eq!(d.healthy_count, 3);
        assert!(d.findings.is_empty());
        assert!(d.recommendations.is_empty());
        assert_eq!(d.exit_code(), 0);
        assert_eq!(d.suggested_endpoint.as_deref(), Some("https://b.example"));
        assert_eq!(d.endpoints[0].rank, 1);
    }

    #[test]
    fn wrong_chain_is_healthy_with_one_finding() {
        let reports = vec![report("https://rpc.v4.testnet.pulsechain.com", 1, 50)];
        let d = diagnose(&reports, &EnvironmentSnapshot::default());
        assert!(d.endpoints[0].healthy);
        assert_eq!(d.endpoints[0].root_cause, Some(RootCause::WrongNetwork));
        assert_eq!(d.findings.len(), 1);
        assert_eq!(d.findings[0].kind, FindingKind::Endpoint(RootCause::WrongNetwork));
        let text = &d.recommendations[0].text;
        assert!(text.contains("https://rpc.v4.testnet.pulsechain.com"));
        assert!(text.contains("chain id 1 "));
        assert!(text.contains("943"));
        assert_eq!(d.exit_code(), 0);
        assert_eq!(d.suggested_endpoint, None);
    }

    #[test]
    fn dns_failure_everywhere_is_one_finding() {
        let reports = vec![dns_failed("https://a.example"), dns_failed("https://b.example"), dns_failed("https://c.example")];
        let d = diagnose(&reports, &EnvironmentSnapshot::default());
        assert_eq!(d.healthy_count, 0);
        assert_eq!(d.findings.len(), 1);
        assert_eq!(d.findings[0].kind, FindingKind::Endpoint(RootCause::DnsResolution));
        assert_eq!(d.findings[0].endpoints.len(), 3);
        assert_ne!(d.exit_code(), 0);
        for e in &d.endpoints {
            assert_eq!(e.root_cause, Some(RootCause::DnsResolution));
            assert!(e.report.rpc.iter().all(|m| !m.is_ok()));
        }
        let steps: Vec<usize> = d.recommendations.iter().map(|r| r.step).collect();
        assert_eq!(steps, (1..=d.recommendations.len()).collect::<Vec<_>>());
    }

    #[test]
    fn public_resolver_answer_points_at_local_resolver() {
        let mut r = dns_failed("https://a.example");
        r.dns_public = Some(ProbeResult::ok("a.example", Layer::Dns, ms(9), "10.0.0.1 (via 1.1.1.1:53)"));
        let d = diagnose(&[r], &EnvironmentSnapshot::default());
        assert!(d.findings[0].hints.iter().any(|h| h.contains("local resolver")));
        assert!(d.recommendations[0].text.starts_with("Fix the local DNS configuration"));
    }

    #[test]
    fn classification_precedence() {
        let mut tls = report("https://a.example", 943, 10);
        tls.tls = Some(ProbeResult::failed("a.example:443", Layer::Tls, ms(3), "invalid peer certificate: Expired"));
        assert_eq!(classify(&tls), Some(RootCause::TlsHandshake));

        let mut blocked = report("https://a.example", 943, 10);
        blocked.http = Some(ProbeResult::failed("https://a.example", Layer::Http, ms(3), "connection reset"));
        assert_eq!(classify(&blocked), Some(RootCause::TransportBlocked));

        let mut rpc = report("https://a.example", 1, 10);
        rpc.rpc[3] = RpcMethodResult::failed(methods::BLOCK_NUMBER, ms(3), "rpc error -32601: method not found");
        assert_eq!(classify(&rpc), Some(RootCause::RpcApplicationError));

        let mut partial = EndpointReport::new(Endpoint::parse("https://a.example").unwrap(), 943);
        partial.dns = Some(ProbeResult::ok("a.example", Layer::Dns, ms(1), "10.0.0.1"));
        assert_eq!(classify(&partial), Some(RootCause::ProbeIncomplete));

        assert_eq!(classify(&report("https://a.example", 943, 10)), None);
    }

    #[test]
    fn blocked_endpoint_is_never_suggested() {
        let mut blocked = report("https://fast.example", 943, 10);
        blocked.http = Some(ProbeResult::failed("https://fast.example", Layer::Http, ms(3), "connection reset"));
        let clean = report("https://slow.example", 943, 400);
        let d = diagnose(&[blocked.clone(), clean], &EnvironmentSnapshot::default());
        assert!(d.endpoints[0].healthy);
        assert_eq!(d.endpoints[0].root_cause, Some(RootCause::TransportBlocked));
        assert_eq!(d.suggested_endpoint.as_deref(), Some("https://slow.example"));

        let alone = diagnose(&[blocked], &EnvironmentSnapshot::default());
        assert_eq!(alone.suggested_endpoint, None);
    }

    #[test]
    fn tls_hint_depends_on_proxy() {
        let mut r = report("https://a.example", 943, 10);
        r.tls = Some(ProbeResult::failed("a.example:443", Layer::Tls, ms(3), "handshake: UnknownIssuer"));
        let plain = diagnose(std::slice::from_ref(&r), &EnvironmentSnapshot::default());
        assert!(plain.findings[0].hints.iter().any(|h| h.contains("clock")));

        let proxied = EnvironmentSnapshot { proxy_vars: vec!["HTTPS_PROXY".into()], ..Default::default() };
        let d = diagnose(std::slice::from_ref(&r), &proxied);
        assert!(d.findings[0].hints.iter().any(|h| h.contains("intercepting TLS")));
        assert_eq!(d.findings[1].kind, FindingKind::Run(RunIssue::ProxyDetected));
    }

    #[test]
    fn ranking_is_a_stable_permutation() {
        let reports = vec![
            dns_failed("https://a.example"),
            report("https://b.example", 943, 100),
            dns_failed("https://c.example"),
            report("https://d.example", 943, 100),
        ];
        assert_eq!(rank(&reports), vec![1, 3, 0, 2]);
        let d = diagnose(&reports, &EnvironmentSnapshot::default());
        let mut urls: Vec<&str> = d.endpoints.iter().map(|e| e.url.as_str()).collect();
        urls.sort_unstable();
        assert_eq!(urls, vec!["https://a.example", "https://b.example", "https://c.example", "https://d.example"]);
    }

    #[test]
    fn diagnose_is_deterministic() {
        let reports = vec![dns_failed("https://a.example"), report("https://b.example", 1, 80)];
        let snap = EnvironmentSnapshot { proxy_vars: vec!["HTTP_PROXY".into()], dns_server_count: 2, ..Default::default() };
        let a = serde_json::to_string(&diagnose(&reports, &snap)).unwrap();
        let b = serde_json::to_string(&diagnose(&reports, &snap)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn run_level_findings() {
        let reports = vec![report("https://a.example", 943, 10)];
        let ctx = RunContext {
            baseline: Some(ProbeResult::failed("https://httpbin.org/ip", Layer::Http, ms(10), "timed out")),
            incomplete: true,
        };
        let d = diagnose_with(&reports, &EnvironmentSnapshot::default(), &ctx);
        let kinds: Vec<FindingKind> = d.findings.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![FindingKind::Run(RunIssue::NoInternet), FindingKind::Run(RunIssue::IncompleteRun)]);
        assert!(d.incomplete);
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["findings"][0]["kind"], "no-internet");
    }
}

use crate::{DiagnosisReport, RankedEndpoint};
use rpcdiag_core::{methods, ProbeResult};
use std::fmt;

fn slot(p: &Option<ProbeResult>) -> &'static str {
    match p {
        Some(p) if p.is_ok() => "ok",
        Some(_) => "FAIL",
        None => "-",
    }
}

fn endpoint_line(f: &mut fmt::Formatter<'_>, e: &RankedEndpoint) -> fmt::Result {
    let status = match (e.healthy, e.root_cause) {
        (true, None) => "healthy".to_string(),
        (true, Some(c)) => format!("healthy, {}", c),
        (false, Some(c)) => format!("unhealthy, {}", c),
        (false, None) => "unhealthy".to_string(),
    };
    let latency = e.latency_ms.map_or_else(|| "-".to_string(), |ms| format!("{} ms", ms));
    writeln!(f, "{:>3}. {} [{}] latency {}", e.rank, e.url, status, latency)?;

    let r = &e.report;
    let rpc_ok = r.rpc.iter().filter(|m| m.is_ok()).count();
    write!(
        f,
        "     dns {} | tls {} | http {} | rpc {}/{}",
        slot(&r.dns),
        slot(&r.tls),
        slot(&r.http),
        rpc_ok,
        r.rpc.len()
    )?;
    if let Some(id) = r.chain_id() {
        write!(f, " | chain {}", id)?;
    }
    if let Some(v) = r.rpc_result(methods::CLIENT_VERSION).and_then(|m| m.value.as_ref()) {
        write!(f, " | {}", v)?;
    }
    writeln!(f)
}

impl fmt::Display for DiagnosisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.incomplete {
            writeln!(f, "WARNING: run was cancelled, results are partial")?;
            writeln!(f)?;
        }

        writeln!(f, "endpoints ({} healthy of {}):", self.healthy_count, self.endpoints.len())?;
        for e in &self.endpoints {
            endpoint_line(f, e)?;
        }

        if let Some(b) = &self.baseline {
            let state = if b.is_ok() { "ok" } else { "FAIL" };
            writeln!(f, "\nbaseline {} {} ({})", b.target, state, b.detail)?;
        }

        if self.findings.is_empty() {
            writeln!(f, "\nno issues found")?;
        } else {
            writeln!(f, "\nissues ({}):", self.findings.len())?;
            for finding in &self.findings {
                writeln!(f, "  [{}] {}", finding.kind, finding.summary)?;
                for hint in &finding.hints {
                    writeln!(f, "      - {}", hint)?;
                }
            }
        }

        if !self.recommendations.is_empty() {
            writeln!(f, "\nrecommended steps:")?;
            for r in &self.recommendations {
                writeln!(f, "  {}. {}", r.step, r.text)?;
            }
        }

        let env = &self.environment;
        writeln!(f, "\nenvironment:")?;
        writeln!(f, "  os: {}", env.os)?;
        writeln!(f, "  dns servers: {}", env.dns_server_count)?;
        writeln!(f, "  default route: {}", env.default_route.as_deref().unwrap_or("unknown"))?;
        if let Some(fw) = &env.firewall {
            writeln!(f, "  firewall: {}", fw)?;
        }
        if env.has_proxy() {
            writeln!(f, "  proxy variables: {}", env.proxy_vars.join(", "))?;
        }
        if env.no_proxy {
            writeln!(f, "  NO_PROXY is set")?;
        }

        if let Some(url) = &self.suggested_endpoint {
            writeln!(f, "\nwallet configuration:")?;
            writeln!(f, "  rpc url:  {}", url)?;
            if let Some(id) = self.expected_chain_id {
                writeln!(f, "  chain id: {}", id)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{diagnose, diagnose_with, RunContext};
    use rpcdiag_core::{methods, Endpoint, EndpointReport, EnvironmentSnapshot, Layer, ProbeResult, RpcMethodResult, RpcValue};
    use std::time::Duration;

    fn healthy(url: &str, chain: u128) -> EndpointReport {
        let ms = Duration::from_millis(42);
        let mut r = EndpointReport::new(Endpoint::parse(url).unwrap(), 943);
        r.dns = Some(ProbeResult::ok("h", Layer::Dns, ms, "10.0.0.1"));
        r.tls = Some(ProbeResult::ok("h:443", Layer::Tls, ms, "TLS 1.3"));
        r.http = Some(ProbeResult::ok(url, Layer::Http, ms, "HTTP 405 Method Not Allowed"));
        r.rpc = vec![
            RpcMethodResult::ok(methods::CLIENT_VERSION, ms, RpcValue::Text("Geth/v1.13".into())),
            RpcMethodResult::ok(methods::CHAIN_ID, ms, RpcValue::Quantity(chain)),
            RpcMethodResult::ok(methods::GET_BALANCE, ms, RpcValue::Quantity(0)),
            RpcMethodResult::ok(methods::BLOCK_NUMBER, ms, RpcValue::Quantity(7)),
        ];
        r.complete = true;
        r
    }

    #[test]
    fn healthy_run_shows_wallet_configuration() {
        let d = diagnose(&[healthy("https://rpc.example.org", 943)], &EnvironmentSnapshot::default());
        let text = d.render_text();
        assert!(text.contains("endpoints (1 healthy of 1):"));
        assert!(text.contains("  1. https://rpc.example.org [healthy] latency 42 ms"));
        assert!(text.contains("chain 943 | Geth/v1.13"));
        assert!(text.contains("no issues found"));
        assert!(text.contains("rpc url:  https://rpc.example.org"));
        assert!(!text.contains("recommended steps"));
    }

    #[test]
    fn issues_and_numbered_steps() {
        let ctx = RunContext { baseline: None, incomplete: true };
        let d = diagnose_with(&[healthy("https://rpc.example.org", 1)], &EnvironmentSnapshot::default(), &ctx);
        let text = d.render_text();
        assert!(text.starts_with("WARNING: run was cancelled"));
        assert!(text.contains("[wrong-network]"));
        assert!(text.contains("[incomplete-run]"));
        assert!(text.contains("  1. Endpoint https://rpc.example.org serves chain id 1"));
        assert!(text.contains(&format!("  {}. ", d.recommendations.len())));
        assert!(!text.contains("wallet configuration"));
    }
}

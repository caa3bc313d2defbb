use anyhow::Result;
use clap::ValueEnum;
use diagnosis::{DiagnosisReport, RankedEndpoint};
use rpcdiag_core::ProbeResult;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Jsonl,
}

impl OutputFormat {
    pub fn from_name(s: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(s, true).ok()
    }
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

/// Run metadata wrapped around a report. The report itself carries no clock data.
#[derive(Debug, Serialize)]
pub struct RunEnvelope<'a> {
    pub run_id: String,
    pub version: &'static str,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    pub report: &'a DiagnosisReport,
}

#[derive(Serialize)]
struct EndpointLine<'a> {
    run_id: &'a str,
    record: &'static str,
    #[serde(flatten)]
    endpoint: &'a RankedEndpoint,
}

#[derive(Serialize)]
struct SummaryLine<'a> {
    run_id: &'a str,
    record: &'static str,
    started_at: &'a str,
    ended_at: &'a str,
    duration_ms: u64,
    incomplete: bool,
    healthy_count: usize,
    total: usize,
    suggested_endpoint: Option<&'a str>,
    expected_chain_id: Option<u64>,
    findings: &'a [diagnosis::Finding],
    recommendations: &'a [diagnosis::Recommendation],
    baseline: Option<&'a ProbeResult>,
    environment: &'a rpcdiag_core::EnvironmentSnapshot,
}

pub fn render(format: OutputFormat, env: &RunEnvelope<'_>) -> Result<String> {
    let out = match format {
        OutputFormat::Text => env.report.render_text(),
        OutputFormat::Json => serde_json::to_string_pretty(env)?,
        OutputFormat::Jsonl => {
            let r = env.report;
            let mut lines = Vec::with_capacity(r.endpoints.len() + 1);
            for e in &r.endpoints {
                lines.push(serde_json::to_string(&EndpointLine { run_id: &env.run_id, record: "endpoint", endpoint: e })?);
            }
            let summary = SummaryLine {
                run_id: &env.run_id,
                record: "summary",
                started_at: &env.started_at,
                ended_at: &env.ended_at,
                duration_ms: env.duration_ms,
                incomplete: r.incomplete,
                healthy_count: r.healthy_count,
                total: r.endpoints.len(),
                suggested_endpoint: r.suggested_endpoint.as_deref(),
                expected_chain_id: r.expected_chain_id,
                findings: &r.findings,
                recommendations: &r.recommendations,
                baseline: r.baseline.as_ref(),
                environment: &r.environment,
            };
            lines.push(serde_json::to_string(&summary)?);
            lines.join("\n")
        }
    };
    Ok(out)
}

/// Write `content` to `path`, or stdout when no path is given.
pub fn emit(path: Option<&Path>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            let file = OpenOptions::new().create(true).truncate(true).write(true).open(p)?;
            let mut w = BufWriter::new(file);
            writeln!(w, "{}", content.trim_end())?;
            w.flush()?;
        }
        None => println!("{}", content.trim_end()),
    }
    Ok(())
}

fn slot(p: &Option<ProbeResult>) -> &'static str {
    match p {
        Some(p) if p.is_ok() => "ok",
        Some(_) => "failed",
        None => "",
    }
}

/// Ranked endpoint table as CSV.
pub fn write_csv<W: Write>(w: W, report: &DiagnosisReport) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(w);
    wtr.write_record(["rank", "url", "healthy", "root_cause", "latency_ms", "chain_id", "dns", "tls", "http", "rpc_ok"])?;
    for e in &report.endpoints {
        let r = &e.report;
        let rank = e.rank.to_string();
        let latency = e.latency_ms.map(|v| v.to_string()).unwrap_or_default();
        let chain = e.chain_id.map(|v| v.to_string()).unwrap_or_default();
        let rpc_ok = format!("{}/{}", r.rpc.iter().filter(|m| m.is_ok()).count(), r.rpc.len());
        wtr.write_record([
            rank.as_str(),
            e.url.as_str(),
            if e.healthy { "true" } else { "false" },
            e.root_cause.map_or("", |c| c.as_str()),
            latency.as_str(),
            chain.as_str(),
            slot(&r.dns),
            slot(&r.tls),
            slot(&r.http),
            rpc_ok.as_str(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use orchestrator::{Diagnostic, RunConfig};
use rpcdiag_core::{parse_account, parse_endpoints, Account, Endpoint, InputError, RetryPolicy};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod config;
mod logging;
mod output;

use config::DiagnoseConfig;
use output::{OutputFormat, RunEnvelope};

/// Exit status for invalid input. 0 and 1 come from the report.
const EXIT_INPUT_ERROR: u8 = 2;
const MAX_CONCURRENCY: usize = 1024;

#[derive(Debug, Parser)]
#[command(name = "rpcdiag", version, about = "Multi-layer JSON-RPC endpoint diagnostics")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./rpcdiag.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// More logging on stderr (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Probe endpoints layer by layer and print a diagnosis
    Diagnose(DiagnoseArgs),
}

#[derive(Debug, Clone, Default, Args)]
struct DiagnoseArgs {
    /// Endpoint URLs (http or https)
    endpoints: Vec<String>,
    /// File with newline-delimited endpoint URLs (comments with # and blanks ignored)
    #[arg(long, value_name = "FILE")]
    endpoints_file: Option<PathBuf>,
    /// Account address queried with eth_getBalance (0x + 40 hex digits)
    #[arg(long)]
    account: Option<String>,
    /// Chain id the endpoints are expected to serve
    #[arg(long)]
    chain_id: Option<u64>,
    /// Endpoints probed concurrently [default: 4]
    #[arg(long)]
    concurrency: Option<usize>,
    /// DNS timeout in milliseconds [default: 5000]
    #[arg(long)]
    dns_timeout_ms: Option<u64>,
    /// TLS handshake timeout in milliseconds [default: 10000]
    #[arg(long)]
    tls_timeout_ms: Option<u64>,
    /// HTTP reachability timeout in milliseconds [default: 10000]
    #[arg(long)]
    http_timeout_ms: Option<u64>,
    /// Timeout per JSON-RPC call in milliseconds [default: 15000]
    #[arg(long)]
    rpc_timeout_ms: Option<u64>,
    /// Retries for transient failures [default: 1]
    #[arg(long)]
    retries: Option<u32>,
    /// Base delay between retries in milliseconds [default: 250]
    #[arg(long)]
    retry_delay_ms: Option<u64>,
    /// Baseline connectivity URL [default: https://httpbin.org/ip]
    #[arg(long)]
    baseline_url: Option<String>,
    /// Skip the baseline connectivity probe
    #[arg(long, default_value_t = false)]
    no_baseline: bool,
    /// Public resolver for the DNS cross-check [default: 1.1.1.1:53]
    #[arg(long)]
    public_resolver: Option<String>,
    /// Skip the public resolver cross-check
    #[arg(long, default_value_t = false)]
    no_public_dns: bool,
    /// Output format [default: text]
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
    /// Output file. Stdout if omitted.
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,
    /// Also write the ranked endpoint table as CSV
    #[arg(long, value_name = "FILE")]
    csv: Option<PathBuf>,
}

/// Fully resolved inputs for one run.
#[derive(Debug)]
struct Plan {
    endpoints: Vec<Endpoint>,
    account: Account,
    chain_id: u64,
    run: RunConfig,
    format: OutputFormat,
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Endpoint URLs from a file, one per line.
fn read_endpoints_file(path: &Path) -> std::result::Result<Vec<String>, InputError> {
    let unreadable = |e: std::io::Error| InputError::EndpointsFile { path: path.display().to_string(), reason: e.to_string() };
    let fh = File::open(path).map_err(unreadable)?;
    let mut urls = Vec::new();
    for line in BufReader::new(fh).lines() {
        let line = line.map_err(unreadable)?;
        let t = line.trim();
        if t.is_empty() || t.starts_with('#') { continue; }
        urls.push(t.to_string());
    }
    Ok(urls)
}

/// Merge command line and config file. The command line wins; config fills the rest.
/// Everything here is validated before any network activity.
fn plan(args: DiagnoseArgs, cfg: DiagnoseConfig) -> std::result::Result<Plan, InputError> {
    let mut urls = args.endpoints;
    if let Some(path) = &args.endpoints_file {
        urls.extend(read_endpoints_file(path)?);
    }
    if urls.is_empty() {
        urls = cfg.endpoints.unwrap_or_default();
    }
    let endpoints = parse_endpoints(&urls)?;
    let account = args.account.or(cfg.account).ok_or(InputError::Missing { field: "account" })?;
    let account = parse_account(&account)?;
    let chain_id = args.chain_id.or(cfg.chain_id).ok_or(InputError::Missing { field: "chain_id" })?;

    let defaults = RunConfig::default();
    let retry = RetryPolicy {
        retries: args.retries.or(cfg.retries).unwrap_or(defaults.retry.retries),
        base_delay: args.retry_delay_ms.or(cfg.retry_delay_ms).map(ms).unwrap_or(defaults.retry.base_delay),
    };
    let baseline_url = if args.no_baseline {
        None
    } else {
        args.baseline_url.or(cfg.baseline_url).or(defaults.baseline_url)
    };
    let public_resolver = if args.no_public_dns {
        None
    } else {
        match args.public_resolver.or(cfg.public_resolver) {
            Some(s) => Some(
                s.parse::<SocketAddr>().map_err(|e| InputError::InvalidSetting {
                    field: "public_resolver",
                    reason: format!("`{}`: {} (expected ip:port)", s, e),
                })?,
            ),
            None => defaults.public_resolver,
        }
    };
    let format = match args.format {
        Some(f) => f,
        None => match cfg.format {
            Some(name) => OutputFormat::from_name(&name).ok_or_else(|| InputError::InvalidSetting {
                field: "format",
                reason: format!("unknown format `{}` (expected text, json or jsonl)", name),
            })?,
            None => OutputFormat::Text,
        },
    };

    let run = RunConfig {
        concurrency: args.concurrency.or(cfg.concurrency).unwrap_or(defaults.concurrency).clamp(1, MAX_CONCURRENCY),
        dns_timeout: args.dns_timeout_ms.or(cfg.dns_timeout_ms).map(ms).unwrap_or(defaults.dns_timeout),
        tls_timeout: args.tls_timeout_ms.or(cfg.tls_timeout_ms).map(ms).unwrap_or(defaults.tls_timeout),
        http_timeout: args.http_timeout_ms.or(cfg.http_timeout_ms).map(ms).unwrap_or(defaults.http_timeout),
        rpc_timeout: args.rpc_timeout_ms.or(cfg.rpc_timeout_ms).map(ms).unwrap_or(defaults.rpc_timeout),
        retry,
        baseline_url,
        public_resolver,
        user_agent: format!("rpcdiag/{}", env!("CARGO_PKG_VERSION")),
    };
    Ok(Plan { endpoints, account, chain_id, run, format })
}

/// Exit status for `diagnose`: invalid input maps to 2 before any probing starts.
fn diagnose_command(args: DiagnoseArgs, cfg: DiagnoseConfig) -> Result<u8> {
    let out = args.out.clone();
    let csv_path = args.csv.clone();
    match plan(args, cfg) {
        Ok(p) => diagnose(p, out.as_deref(), csv_path.as_deref()),
        Err(e) => {
            eprintln!("error: {}", e);
            Ok(EXIT_INPUT_ERROR)
        }
    }
}

fn diagnose(plan: Plan, out: Option<&Path>, csv_path: Option<&Path>) -> Result<u8> {
    let rt = tokio::runtime::Runtime::new()?;
    let diag = Diagnostic::new(plan.run)?;
    let cancel = CancellationToken::new();

    let start = Instant::now();
    let started_at = output::now_rfc3339();
    let outcome = rt.block_on(async {
        let ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, finishing with partial results");
                ctrl_c.cancel();
            }
        });
        diag.run(&plan.endpoints, &plan.account, plan.chain_id, &cancel).await
    });
    let ended_at = output::now_rfc3339();
    let report = outcome.diagnose();

    let envelope = RunEnvelope {
        run_id: uuid::Uuid::now_v7().to_string(),
        version: env!("CARGO_PKG_VERSION"),
        started_at,
        ended_at,
        duration_ms: start.elapsed().as_millis() as u64,
        report: &report,
    };
    info!(run_id = %envelope.run_id, healthy = report.healthy_count, "writing report");
    output::emit(out, &output::render(plan.format, &envelope)?)?;
    if let Some(path) = csv_path {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        output::write_csv(file, &report)?;
    }
    Ok(report.exit_code())
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let loaded_cfg = match config::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return Ok(ExitCode::from(EXIT_INPUT_ERROR));
        }
    };
    match cli.command {
        Commands::Version => {
            println!("rpcdiag {} (core {})", env!("CARGO_PKG_VERSION"), rpcdiag_core::version());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Diagnose(args) => {
            let status = diagnose_command(args, loaded_cfg.diagnose.unwrap_or_default())?;
            Ok(ExitCode::from(status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO: &str = "0x0000000000000000000000000000000000000000";

    fn args(urls: &[&str]) -> DiagnoseArgs {
        DiagnoseArgs {
            endpoints: urls.iter().map(|s| s.to_string()).collect(),
            account: Some(ZERO.into()),
            chain_id: Some(943),
            ..Default::default()
        }
    }

    #[test]
    fn cli_parses_diagnose() {
        let cli = Cli::try_parse_from([
            "rpcdiag", "-vv", "diagnose", "https://a.example", "https://b.example", "--account", ZERO, "--chain-id", "943",
            "--format", "jsonl", "--concurrency", "2",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Diagnose(a) => {
                assert_eq!(a.endpoints.len(), 2);
                assert_eq!(a.chain_id, Some(943));
                assert_eq!(a.format, Some(OutputFormat::Jsonl));
                assert_eq!(a.concurrency, Some(2));
            }
            Commands::Version => panic!("expected diagnose"),
        }
    }

    #[test]
    fn defaults_apply_without_config() {
        let p = plan(args(&["https://a.example"]), DiagnoseConfig::default()).unwrap();
        assert_eq!(p.run.concurrency, 4);
        assert_eq!(p.run.dns_timeout, Duration::from_secs(5));
        assert_eq!(p.run.rpc_timeout, Duration::from_secs(15));
        assert_eq!(p.run.retry, RetryPolicy::default());
        assert_eq!(p.run.baseline_url.as_deref(), Some("https://httpbin.org/ip"));
        assert_eq!(p.run.public_resolver, "1.1.1.1:53".parse().ok());
        assert_eq!(p.format, OutputFormat::Text);
        assert_eq!(p.account.to_hex(), ZERO);
    }

    #[test]
    fn command_line_wins_over_config() {
        let cfg = DiagnoseConfig {
            endpoints: Some(vec!["https://from-config.example".into()]),
            concurrency: Some(8),
            rpc_timeout_ms: Some(3000),
            format: Some("json".into()),
            ..Default::default()
        };
        let mut a = args(&["https://cli.example"]);
        a.concurrency = Some(2);
        a.no_baseline = true;
        let p = plan(a, cfg).unwrap();
        assert_eq!(p.endpoints.len(), 1);
        assert_eq!(p.endpoints[0].url, "https://cli.example");
        assert_eq!(p.run.concurrency, 2);
        assert_eq!(p.run.rpc_timeout, Duration::from_millis(3000));
        assert_eq!(p.run.baseline_url, None);
        assert_eq!(p.format, OutputFormat::Json);
    }

    #[test]
    fn config_supplies_endpoints_and_account() {
        let cfg = DiagnoseConfig {
            endpoints: Some(vec!["https://rpc.pulsechain.com".into()]),
            account: Some(ZERO.into()),
            chain_id: Some(369),
            ..Default::default()
        };
        let p = plan(DiagnoseArgs::default(), cfg).unwrap();
        assert_eq!(p.chain_id, 369);
        assert_eq!(p.endpoints[0].hostname, "rpc.pulsechain.com");
    }

    #[test]
    fn invalid_input_is_an_input_error() {
        let mut a = args(&["https://a.example"]);
        a.account = Some("0x123".into());
        assert!(matches!(plan(a, DiagnoseConfig::default()).unwrap_err(), InputError::InvalidAccount { .. }));

        let e = plan(args(&[]), DiagnoseConfig::default()).unwrap_err();
        assert_eq!(e, InputError::EmptyEndpoints);

        let mut a = args(&["https://a.example"]);
        a.chain_id = None;
        let e = plan(a, DiagnoseConfig::default()).unwrap_err();
        assert_eq!(e, InputError::Missing { field: "chain_id" });

        let e = plan(args(&["ftp://a.example"]), DiagnoseConfig::default()).unwrap_err();
        assert!(matches!(e, InputError::InvalidEndpoint { .. }));
    }

    #[test]
    fn bad_settings_are_input_errors() {
        let mut a = args(&["https://a.example"]);
        a.public_resolver = Some("1.1.1.1".into());
        let e = plan(a, DiagnoseConfig::default()).unwrap_err();
        assert!(matches!(e, InputError::InvalidSetting { field: "public_resolver", .. }));
        assert!(e.to_string().contains("expected ip:port"));

        let cfg = DiagnoseConfig { format: Some("xml".into()), ..Default::default() };
        let e = plan(args(&["https://a.example"]), cfg).unwrap_err();
        assert!(matches!(e, InputError::InvalidSetting { field: "format", .. }));
    }

    #[test]
    fn input_problems_exit_with_two() {
        let mut a = args(&["https://a.example"]);
        a.public_resolver = Some("1.1.1.1".into());
        assert_eq!(diagnose_command(a, DiagnoseConfig::default()).unwrap(), EXIT_INPUT_ERROR);

        let mut a = args(&[]);
        a.endpoints_file = Some(PathBuf::from("/nonexistent/endpoints.txt"));
        assert_eq!(diagnose_command(a, DiagnoseConfig::default()).unwrap(), EXIT_INPUT_ERROR);

        let cfg = DiagnoseConfig { format: Some("xml".into()), ..Default::default() };
        assert_eq!(diagnose_command(args(&["https://a.example"]), cfg).unwrap(), EXIT_INPUT_ERROR);

        assert_eq!(diagnose_command(args(&[]), DiagnoseConfig::default()).unwrap(), EXIT_INPUT_ERROR);
    }

    #[test]
    fn missing_endpoints_file_is_an_input_error() {
        let mut a = args(&[]);
        a.endpoints_file = Some(PathBuf::from("/nonexistent/endpoints.txt"));
        let e = plan(a, DiagnoseConfig::default()).unwrap_err();
        assert!(matches!(e, InputError::EndpointsFile { .. }));
        assert!(e.to_string().contains("/nonexistent/endpoints.txt"));
    }

    #[test]
    fn concurrency_is_clamped() {
        let mut a = args(&["https://a.example"]);
        a.concurrency = Some(usize::MAX);
        assert_eq!(plan(a, DiagnoseConfig::default()).unwrap().run.concurrency, MAX_CONCURRENCY);
        let mut a = args(&["https://a.example"]);
        a.concurrency = Some(0);
        assert_eq!(plan(a, DiagnoseConfig::default()).unwrap().run.concurrency, 1);
    }

    #[test]
    fn endpoints_file_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoints.txt");
        std::fs::write(&path, "# mainnet\nhttps://a.example\n\n  https://b.example  \n").unwrap();
        let mut a = args(&[]);
        a.endpoints_file = Some(path);
        let p = plan(a, DiagnoseConfig::default()).unwrap();
        let urls: Vec<&str> = p.endpoints.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.example", "https://b.example"]);
    }
}

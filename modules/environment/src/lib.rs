//! Best-effort capture of local facts that explain cross-endpoint failure patterns:
//! proxy variables, resolver configuration, default route, firewall and OS.

use rpcdiag_core::EnvironmentSnapshot;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

pub const PROXY_VARS: &[&str] = &["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy", "ALL_PROXY", "all_proxy"];
pub const NO_PROXY_VARS: &[&str] = &["NO_PROXY", "no_proxy"];

const RESOLV_CONF: &str = "/etc/resolv.conf";
const OS_RELEASE: &str = "/etc/os-release";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Capture the snapshot. Missing files, commands or variables leave neutral fields.
pub async fn snapshot() -> EnvironmentSnapshot {
    let env = |k: &str| std::env::var(k).ok();
    let (default_route, firewall, resolv, os_release) = tokio::join!(
        command_stdout("ip", &["route", "show", "default"]),
        command_stdout("ufw", &["status"]),
        read_optional(Path::new(RESOLV_CONF)),
        read_optional(Path::new(OS_RELEASE)),
    );
    let snap = EnvironmentSnapshot {
        proxy_vars: set_vars(PROXY_VARS, env),
        no_proxy: !set_vars(NO_PROXY_VARS, env).is_empty(),
        dns_server_count: resolv.as_deref().map_or(0, count_nameservers),
        default_route: default_route.as_deref().and_then(summarize_route),
        firewall: firewall.as_deref().and_then(first_line),
        os: os_release
            .as_deref()
            .and_then(pretty_name)
            .unwrap_or_else(|| format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)),
    };
    debug!(?snap, "environment snapshot");
    snap
}

/// Names (never values) of the variables in `names` that are set and non-empty.
fn set_vars(names: &[&str], lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    names
        .iter()
        .filter(|n| lookup(**n).map_or(false, |v| !v.trim().is_empty()))
        .map(|n| n.to_string())
        .collect()
}

pub fn count_nameservers(resolv_conf: &str) -> usize {
    resolv_conf
        .lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#') && !l.starts_with(';'))
        .filter(|l| l.split_whitespace().next() == Some("nameserver"))
        .count()
}

/// First default route, cut to `default via <gw> dev <iface>`.
fn summarize_route(output: &str) -> Option<String> {
    let line = first_line(output)?;
    Some(line.split_whitespace().take(5).collect::<Vec<_>>().join(" "))
}

fn first_line(output: &str) -> Option<String> {
    output.lines().map(str::trim).find(|l| !l.is_empty()).map(str::to_string)
}

fn pretty_name(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find_map(|l| l.strip_prefix("PRETTY_NAME="))
        .map(|v| v.trim().trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

async fn read_optional(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path).await.ok()
}

async fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();
    match timeout(COMMAND_TIMEOUT, child).await {
        Ok(Ok(out)) if out.status.success() => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
        Ok(Ok(out)) => {
            debug!(program, status = ?out.status, "command exited unsuccessfully");
            None
        }
        Ok(Err(e)) => {
            debug!(program, error = %e, "command unavailable");
            None
        }
        Err(_) => {
            debug!(program, "command timed out");
            None
        }
    }
}

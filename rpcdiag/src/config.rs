use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

const DEFAULT_CONFIG: &str = "rpcdiag.yaml";

/// Settings for `diagnose`. Every field is optional and only fills values the
/// command line left unset.
#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DiagnoseConfig {
    pub endpoints: Option<Vec<String>>,
    pub account: Option<String>,
    pub chain_id: Option<u64>,
    pub concurrency: Option<usize>,
    pub dns_timeout_ms: Option<u64>,
    pub tls_timeout_ms: Option<u64>,
    pub http_timeout_ms: Option<u64>,
    pub rpc_timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub baseline_url: Option<String>,
    pub public_resolver: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub diagnose: Option<DiagnoseConfig>,
}

/// Load `path`, or `./rpcdiag.yaml` when no path is given and that file exists.
/// An explicit path that cannot be read or parsed is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if p.exists() { p.to_path_buf() } else { return Ok(Config::default()); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&s).with_context(|| format!("parsing config {}", path.display()))
}

pub fn parse_config(s: &str) -> Result<Config> {
    if s.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(s)?)
}

//! Validation of run inputs. Everything here runs before any network activity.

use crate::model::Endpoint;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::{Host, Url};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("no endpoints given: provide at least one endpoint URL")]
    EmptyEndpoints,
    #[error("invalid endpoint `{url}`: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("invalid account `{value}`: {reason}")]
    InvalidAccount { value: String, reason: String },
    #[error("missing required input `{field}`")]
    Missing { field: &'static str },
    #[error("cannot read endpoints file `{path}`: {reason}")]
    EndpointsFile { path: String, reason: String },
    #[error("invalid setting `{field}`: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

/// A 20-byte account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Account([u8; 20]);

impl Account {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase `0x`-prefixed form used on the wire.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Account {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_account(s)
    }
}

impl Serialize for Account {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

/// Parse `0x` followed by exactly 40 hex digits (either case).
pub fn parse_account(raw: &str) -> Result<Account, InputError> {
    let invalid = |reason: String| InputError::InvalidAccount { value: raw.to_string(), reason };
    let t = raw.trim();
    let digits = t
        .strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .ok_or_else(|| invalid("missing 0x prefix".into()))?;
    if digits.len() != 40 {
        return Err(invalid(format!("expected 40 hex digits, got {}", digits.len())));
    }
    let mut out = [0u8; 20];
    hex::decode_to_slice(digits, &mut out).map_err(|e| invalid(e.to_string()))?;
    Ok(Account(out))
}

impl Endpoint {
    /// Parse an `http`/`https` URL into an endpoint. The port defaults from the scheme.
    pub fn parse(raw: &str) -> Result<Self, InputError> {
        let raw = raw.trim();
        let invalid = |reason: String| InputError::InvalidEndpoint { url: raw.to_string(), reason };
        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(format!("unsupported scheme `{}`", other))),
        }
        let hostname = match url.host() {
            Some(Host::Domain(d)) => d.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(invalid("missing host".into())),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("cannot determine port".into()))?;
        Ok(Endpoint { url: raw.to_string(), hostname, port })
    }
}

/// Parse endpoint URLs in order. An empty list is rejected.
pub fn parse_endpoints<I, S>(raw: I) -> Result<Vec<Endpoint>, InputError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let endpoints = raw
        .into_iter()
        .map(|s| Endpoint::parse(s.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    if endpoints.is_empty() {
        return Err(InputError::EmptyEndpoints);
    }
    Ok(endpoints)
}

//! TLS handshake probe with certificate subject/issuer extraction.

use crate::{finish, within};
use anyhow::{anyhow, Context, Result};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ProtocolVersion, RootCertStore};
use rpcdiag_core::{Layer, ProbeResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// Connect to `hostname:port` and complete a TLS handshake against the webpki roots.
/// The timeout bounds connect and handshake together.
pub async fn handshake(hostname: &str, port: u16, limit: Duration) -> ProbeResult {
    let started = Instant::now();
    let target = format!("{}:{}", hostname, port);
    let res = within(limit, "tls handshake", negotiate(hostname, port)).await;
    finish(&target, Layer::Tls, started, res)
}

fn client_config() -> Result<ClientConfig> {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let mut config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

fn server_name(host: &str) -> Result<ServerName<'static>> {
    match host.parse::<std::net::IpAddr>() {
        Ok(ip) => Ok(ServerName::IpAddress(ip.into())),
        Err(_) => ServerName::try_from(host.to_owned()).map_err(|_| anyhow!("invalid server name: {}", host)),
    }
}

async fn negotiate(host: &str, port: u16) -> Result<String> {
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("tcp connect to {}:{}", host, port))?;
    let connector = TlsConnector::from(Arc::new(client_config()?));
    let tls = connector.connect(server_name(host)?, stream).await.context("handshake")?;
    let conn = tls.get_ref().1;

    let version = match conn.protocol_version() {
        Some(ProtocolVersion::TLSv1_3) => "TLS 1.3".to_string(),
        Some(ProtocolVersion::TLSv1_2) => "TLS 1.2".to_string(),
        Some(other) => format!("{:?}", other),
        None => "unknown".to_string(),
    };
    let mut detail = version;
    if let Some(alpn) = conn.alpn_protocol() {
        detail.push_str(&format!(", alpn={}", String::from_utf8_lossy(alpn)));
    }
    if let Some((subj, iss)) = conn.peer_certificates().and_then(|c| c.first()).and_then(|c| common_names(c.as_ref())) {
        detail.push_str(&format!(", cert_cn={} / issuer_cn={}", subj, iss));
    }
    Ok(detail)
}

fn common_names(der: &[u8]) -> Option<(String, String)> {
    use x509_parser::prelude::*;
    let (_, x509) = X509Certificate::from_der(der).ok()?;
    let subj = x509.subject().iter_common_name().next().and_then(|cn| cn.as_str().ok()).unwrap_or("");
    let iss = x509.issuer().iter_common_name().next().and_then(|cn| cn.as_str().ok()).unwrap_or("");
    if subj.is_empty() && iss.is_empty() {
        return None;
    }
    Some((subj.to_string(), iss.to_string()))
}

//! Name resolution through the system resolver, plus a raw A-record query against a
//! public resolver to tell a broken local resolver apart from a name that does not exist.

use crate::{finish, within};
use anyhow::{anyhow, bail, Context, Result};
use rpcdiag_core::{Layer, ProbeResult};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::{lookup_host, UdpSocket};

pub const DEFAULT_PUBLIC_RESOLVER: &str = "1.1.1.1:53";

/// Resolve `hostname` with the system resolver.
pub async fn resolve(hostname: &str, limit: Duration) -> ProbeResult {
    let started = Instant::now();
    let res = within(limit, "dns lookup", system_lookup(hostname)).await;
    finish(hostname, Layer::Dns, started, res)
}

/// Resolve `hostname` by asking `server` directly over UDP.
pub async fn resolve_via(hostname: &str, server: SocketAddr, limit: Duration) -> ProbeResult {
    let started = Instant::now();
    let res = within(limit, "public resolver query", query_a(hostname, server))
        .await
        .map(|ips| format!("{} (via {})", ips, server));
    finish(hostname, Layer::Dns, started, res)
}

async fn system_lookup(hostname: &str) -> Result<String> {
    let mut ips: Vec<IpAddr> = Vec::new();
    for sa in lookup_host((hostname, 0u16)).await? {
        if !ips.contains(&sa.ip()) { ips.push(sa.ip()); }
    }
    if ips.is_empty() {
        bail!("no addresses for {}", hostname);
    }
    Ok(join(&ips))
}

async fn query_a(hostname: &str, server: SocketAddr) -> Result<String> {
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Ok(ip.to_string());
    }
    let bind = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let sock = UdpSocket::bind(bind).await?;
    sock.connect(server).await.with_context(|| format!("connect to {}", server))?;
    let id: u16 = rand::random();
    let q = build_query(id, hostname)?;
    sock.send(&q).await?;
    let mut buf = [0u8; 1500];
    let n = sock.recv(&mut buf).await?;
    let ips = parse_a_records(id, &buf[..n])?;
    Ok(join(&ips))
}

fn join<T: ToString>(ips: &[T]) -> String {
    ips.iter().map(|ip| ip.to_string()).collect::<Vec<_>>().join(", ")
}

fn build_query(id: u16, hostname: &str) -> Result<Vec<u8>> {
    let mut q = Vec::new();
    q.extend_from_slice(&id.to_be_bytes());
    q.extend_from_slice(&0x0100u16.to_be_bytes()); // RD
    q.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    q.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    q.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    q.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    for label in hostname.trim_end_matches('.').split('.') {
        if label.is_empty() || label.len() > 63 {
            bail!("invalid dns label {:?} in {}", label, hostname);
        }
        q.push(label.len() as u8);
        q.extend_from_slice(label.as_bytes());
    }
    q.push(0); // end name
    q.extend_from_slice(&1u16.to_be_bytes()); // QTYPE A
    q.extend_from_slice(&1u16.to_be_bytes()); // QCLASS IN
    Ok(q)
}

fn be16(data: &[u8], pos: usize) -> Result<u16> {
    match data.get(pos..pos + 2) {
        Some(b) => Ok(u16::from_be_bytes([b[0], b[1]])),
        None => Err(anyhow!("truncated dns reply")),
    }
}

/// Skip an encoded name (labels or a compression pointer), returning the next offset.
fn skip_name(data: &[u8], mut pos: usize) -> Result<usize> {
    loop {
        let len = *data.get(pos).ok_or_else(|| anyhow!("truncated dns name"))? as usize;
        if len & 0xC0 == 0xC0 {
            return if pos + 1 < data.len() { Ok(pos + 2) } else { Err(anyhow!("truncated dns name")) };
        }
        if len == 0 {
            return Ok(pos + 1);
        }
        pos += 1 + len;
    }
}

fn parse_a_records(id: u16, data: &[u8]) -> Result<Vec<Ipv4Addr>> {
    if data.len() < 12 {
        bail!("short dns reply ({} bytes)", data.len());
    }
    if be16(data, 0)? != id {
        bail!("dns reply id mismatch");
    }
    let flags = be16(data, 2)?;
    if flags & 0x8000 == 0 {
        bail!("dns reply is not a response");
    }
    match flags & 0x000F {
        0 => {}
        3 => bail!("NXDOMAIN"),
        2 => bail!("SERVFAIL"),
        rcode => bail!("resolver returned rcode {}", rcode),
    }
    let qdcount = be16(data, 4)?;
    let ancount = be16(data, 6)?;
    let mut pos = 12;
    for _ in 0..qdcount {
        pos = skip_name(data, pos)? + 4;
    }
    let mut out = Vec::new();
    for _ in 0..ancount {
        pos = skip_name(data, pos)?;
        let rtype = be16(data, pos)?;
        let rdlen = be16(data, pos + 8)? as usize;
        pos += 10;
        let rdata = data.get(pos..pos + rdlen).ok_or_else(|| anyhow!("truncated dns record"))?;
        if rtype == 1 && rdlen == 4 {
            out.push(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]));
        }
        pos += rdlen;
    }
    if out.is_empty() {
        bail!("no A records in answer");
    }
    Ok(out)
}

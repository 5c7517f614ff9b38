//! TCP connectivity and name resolution checks.
//!
//! Typical use is checking private endpoints from inside a VNet: the name
//! must resolve to a private address in the expected range, and the port
//! must accept a connection.

use crate::models::{is_private, Cidr};
use crate::output::CsvRow;
use futures::stream::{self, StreamExt};
use std::error::Error;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    /// Resolved address must fall inside this block.
    pub expected: Option<Cidr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Ok,
    DnsFailed,
    UnexpectedAddress,
    ConnectFailed,
    Timeout,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Ok => "ok",
            ProbeStatus::DnsFailed => "dns-failed",
            ProbeStatus::UnexpectedAddress => "unexpected-address",
            ProbeStatus::ConnectFailed => "connect-failed",
            ProbeStatus::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub target: Target,
    pub address: Option<Ipv4Addr>,
    pub private: Option<bool>,
    pub status: ProbeStatus,
    pub latency_ms: Option<u128>,
    pub detail: String,
}

impl CsvRow for ProbeResult {
    fn header() -> Vec<&'static str> {
        vec!["host", "port", "address", "private", "expected", "status", "latency_ms", "detail"]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.target.host.clone(),
            self.target.port.to_string(),
            self.address.map(|a| a.to_string()).unwrap_or_default(),
            self.private.map(|p| p.to_string()).unwrap_or_default(),
            self.target.expected.map(|c| c.to_string()).unwrap_or_default(),
            self.status.as_str().to_string(),
            self.latency_ms.map(|l| l.to_string()).unwrap_or_default(),
            self.detail.clone(),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub timeout: Duration,
    pub concurrency: usize,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        ProbeOptions {
            timeout: Duration::from_secs(5),
            concurrency: 16,
        }
    }
}

/// Parse target lines: `host:port [expected-cidr]`.
///
/// Blank lines and `#` comments are skipped. Errors carry the line number.
pub fn parse_targets(text: &str) -> Result<Vec<Target>, Box<dyn Error>> {
    let mut targets = Vec::new();
    for (n, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let endpoint = parts.next().unwrap_or_default();
        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| format!("line {}: expected host:port, got '{endpoint}'", n + 1))?;
        let port: u16 = port
            .parse()
            .map_err(|_| format!("line {}: invalid port '{port}'", n + 1))?;
        if host.is_empty() {
            return Err(format!("line {}: empty host", n + 1).into());
        }
        let expected = match parts.next() {
            Some(c) => Some(Cidr::new(c).map_err(|e| format!("line {}: {e}", n + 1))?),
            None => None,
        };
        if let Some(extra) = parts.next() {
            return Err(format!("line {}: unexpected '{extra}'", n + 1).into());
        }
        targets.push(Target {
            host: host.to_string(),
            port,
            expected,
        });
    }
    Ok(targets)
}

/// Probe all targets concurrently; results keep input order.
pub async fn probe_all(targets: &[Target], opts: &ProbeOptions) -> Vec<ProbeResult> {
    log::info!(
        "#Start probing {} target(s), concurrency={} timeout={:?}",
        targets.len(),
        opts.concurrency,
        opts.timeout
    );
    let mut results: Vec<(usize, ProbeResult)> = stream::iter(targets.iter().enumerate())
        .map(|(i, t)| async move { (i, probe(t, opts.timeout).await) })
        .buffer_unordered(opts.concurrency.max(1))
        .collect()
        .await;
    results.sort_by_key(|(i, _)| *i);
    results.into_iter().map(|(_, r)| r).collect()
}

/// Resolve, classify and connect to one target.
pub async fn probe(target: &Target, limit: Duration) -> ProbeResult {
    let mut result = ProbeResult {
        target: target.clone(),
        address: None,
        private: None,
        status: ProbeStatus::DnsFailed,
        latency_ms: None,
        detail: String::new(),
    };

    let addr = match resolve_v4(&target.host, target.port, limit).await {
        Ok(addr) => addr,
        Err(e) => {
            result.detail = e.to_string();
            log::warn!("{}: {}", target.host, result.detail);
            return result;
        }
    };
    let ip = *addr.ip();
    result.address = Some(ip);
    result.private = Some(is_private(ip));

    if let Some(expected) = target.expected {
        if !expected.contains(ip) {
            result.status = ProbeStatus::UnexpectedAddress;
            result.detail = format!("{ip} not in {expected}");
            log::warn!("{}: {}", target.host, result.detail);
            return result;
        }
    }

    let started = Instant::now();
    match timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => {
            result.status = ProbeStatus::Ok;
            result.latency_ms = Some(started.elapsed().as_millis());
            log::debug!("{}:{} ok in {:?}ms", target.host, target.port, result.latency_ms);
        }
        Ok(Err(e)) => {
            result.status = ProbeStatus::ConnectFailed;
            result.detail = e.to_string();
        }
        Err(_) => {
            result.status = ProbeStatus::Timeout;
            result.detail = format!("no connection within {}ms", limit.as_millis());
        }
    }
    result
}

async fn resolve_v4(
    host: &str,
    port: u16,
    limit: Duration,
) -> Result<SocketAddrV4, Box<dyn Error>> {
    let mut addrs = timeout(limit, tokio::net::lookup_host((host, port)))
        .await
        .map_err(|_| format!("resolution timed out after {}ms", limit.as_millis()))?
        .map_err(|e| format!("resolution failed: {e}"))?;
    addrs
        .find_map(|a| match a {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| format!("no IPv4 address for {host}").into())
}

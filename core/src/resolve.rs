//! Forward DNS helpers shared by the probes.

use crate::error::{DiagError, Result};
use std::net::IpAddr;
use tokio::net::lookup_host;

/// Resolve a host (name or literal) to its distinct addresses, in resolver order.
pub async fn resolve_all(host: &str) -> Result<Vec<IpAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    let iter = lookup_host((host, 0u16)).await.map_err(|e| DiagError::DnsResolution {
        host: host.to_string(),
        message: e.to_string(),
    })?;
    let mut ips: Vec<IpAddr> = Vec::new();
    for sa in iter {
        if !ips.contains(&sa.ip()) { ips.push(sa.ip()); }
    }
    if ips.is_empty() {
        return Err(DiagError::DnsResolution { host: host.to_string(), message: "no addresses".into() });
    }
    Ok(ips)
}

/// First IPv4 address if there is one, otherwise the first address.
pub async fn resolve_prefer_v4(host: &str) -> Result<IpAddr> {
    let ips = resolve_all(host).await?;
    Ok(ips.iter().copied().find(IpAddr::is_ipv4).unwrap_or(ips[0]))
}

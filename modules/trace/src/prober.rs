use async_trait::async_trait;
use netdiag_core::Deadline;
use ping::icmp::{self, Echo};
use std::net::IpAddr;

/// Sends one TTL-limited echo and reports who answered.
#[async_trait]
pub trait HopProber: Send + Sync {
    async fn echo(&self, target: IpAddr, ttl: u32, payload: &[u8], sequence: u16, deadline: Deadline) -> Echo;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IcmpHopProber;

#[async_trait]
impl HopProber for IcmpHopProber {
    async fn echo(&self, target: IpAddr, ttl: u32, payload: &[u8], sequence: u16, deadline: Deadline) -> Echo {
        icmp::echo(target, ttl, payload, sequence, deadline).await
    }
}

/// Best-effort PTR lookup on a blocking thread. A resolver that just echoes
/// the address back counts as no name.
pub async fn reverse_name(ip: IpAddr) -> Option<String> {
    let name = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip)).await.ok()?.ok()?;
    (name != ip.to_string()).then_some(name)
}

use crate::prober::{HopProber, IcmpHopProber};
use crate::{Trace, TraceMode, MAX_TTL};
use netdiag_core::resolve::resolve_all;
use netdiag_core::{Deadline, HopRecord, HopStatus};
use ping::icmp::Echo;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

const HOP_DELAY: Duration = Duration::from_millis(100);

/// One echo per TTL toward the first IPv4 address of `host`.
pub async fn traceroute(host: &str, max_hops: u32, timeout: Duration) -> Trace {
    traceroute_with(&IcmpHopProber, host, max_hops, timeout, HOP_DELAY).await
}

pub async fn traceroute_with(prober: &dyn HopProber, host: &str, max_hops: u32, timeout: Duration, delay: Duration) -> Trace {
    let mut trace = Trace::new(host, 0, TraceMode::Icmp);
    let target = match resolve_all(host).await {
        Ok(addrs) => addrs.into_iter().find(IpAddr::is_ipv4),
        Err(e) => {
            trace.hops.push(HopRecord::dns_failure(host, e.to_string()));
            return trace;
        }
    };
    let Some(target) = target else {
        let mut hop = HopRecord::unanswered(0, HopStatus::Error);
        hop.address = host.to_string();
        hop.error_message = Some("no IPv4 address to trace".into());
        trace.hops.push(hop);
        return trace;
    };

    let max_hops = max_hops.min(MAX_TTL);
    for ttl in 1..=max_hops {
        let echo = prober.echo(target, ttl, &[0u8; 32], ttl as u16, Deadline::after(timeout)).await;
        let hop = match echo {
            Echo::EchoReply { from, rtt } => HopRecord {
                address: from.to_string(),
                round_trip_millis: Some(rtt.as_millis() as u64),
                ..HopRecord::unanswered(ttl, HopStatus::Success)
            },
            Echo::TtlExpired { from, .. } => HopRecord { address: from.to_string(), ..HopRecord::unanswered(ttl, HopStatus::TtlExpired) },
            Echo::Unreachable { from, .. } => HopRecord {
                address: from.to_string(),
                error_message: Some("destination unreachable".into()),
                ..HopRecord::unanswered(ttl, HopStatus::Error)
            },
            Echo::Timeout => HopRecord::unanswered(ttl, HopStatus::Timeout),
            Echo::Error(msg) => HopRecord { error_message: Some(msg), ..HopRecord::unanswered(ttl, HopStatus::Error) },
        };
        debug!(hop = %hop, "hop");
        let done = hop.status == HopStatus::Success;
        trace.hops.push(hop);
        if done || ttl == max_hops { break; }
        tokio::time::sleep(delay).await;
    }
    trace
}

/// Trace each host in turn.
pub async fn trace_many(hosts: &[String], max_hops: u32, timeout: Duration) -> BTreeMap<String, Trace> {
    let mut out = BTreeMap::new();
    for h in hosts {
        out.insert(h.clone(), traceroute(h, max_hops, timeout).await);
    }
    out
}

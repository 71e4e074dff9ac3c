//! Route discovery: TTL-stepped ICMP traces and a TCP reachability fallback.

pub mod detailed;
pub mod prober;
pub mod simple;

pub use detailed::DetailedTrace;
pub use prober::{HopProber, IcmpHopProber};
pub use simple::{trace_many, traceroute, traceroute_with};

use netdiag_core::{HopRecord, HopStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest TTL an IPv4 header can carry; hop counts are capped here.
pub const MAX_TTL: u32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TraceMode {
    #[default]
    Icmp,
    Tcp,
}

impl fmt::Display for TraceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { TraceMode::Icmp => "ICMP", TraceMode::Tcp => "TCP" })
    }
}

impl std::str::FromStr for TraceMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "icmp" => Ok(TraceMode::Icmp),
            "tcp" => Ok(TraceMode::Tcp),
            other => Err(format!("unknown trace mode: {}", other)),
        }
    }
}

/// Finished trace toward one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub host: String,
    pub port: u16,
    pub mode: TraceMode,
    pub hops: Vec<HopRecord>,
}

impl Trace {
    pub fn new(host: &str, port: u16, mode: TraceMode) -> Self {
        Trace { host: host.to_string(), port, mode, hops: Vec::new() }
    }

    /// The destination itself answered on the last hop.
    pub fn is_reachable(&self) -> bool {
        self.hops.last().map_or(false, |h| h.status == HopStatus::Success)
    }

    fn rtts(&self) -> impl Iterator<Item = u64> + '_ {
        self.hops.iter().filter_map(|h| h.round_trip_millis)
    }

    pub fn max_rtt(&self) -> Option<u64> { self.rtts().max() }

    pub fn min_rtt(&self) -> Option<u64> { self.rtts().min() }

    pub fn avg_rtt(&self) -> Option<f64> {
        let (sum, n) = self.rtts().fold((0u64, 0u64), |(s, n), v| (s + v, n + 1));
        if n == 0 { None } else { Some(sum as f64 / n as f64) }
    }

    /// 1-based positions of hops that went unanswered or took more than
    /// twice the average round trip.
    pub fn anomalies(&self) -> Vec<usize> {
        let avg = self.avg_rtt();
        self.hops
            .iter()
            .enumerate()
            .filter(|(_, h)| match (h.round_trip_millis, avg) {
                (None, _) => true,
                (Some(rtt), Some(avg)) => rtt as f64 > 2.0 * avg,
                (Some(_), None) => false,
            })
            .map(|(i, _)| i + 1)
            .collect()
    }

    pub fn passed_private_address(&self) -> bool {
        self.hops.iter().any(HopRecord::is_private)
    }

    pub fn to_report(&self) -> String {
        let mut out = format!("Trace to {} ({}", self.host, self.mode);
        if self.mode == TraceMode::Tcp { out.push_str(&format!(" port {}", self.port)); }
        out.push_str("):\n");
        for hop in &self.hops {
            out.push_str(&hop.to_string());
            out.push('\n');
        }
        out.push_str(if self.is_reachable() { "Destination reached\n" } else { "Destination not reached\n" });
        if let (Some(min), Some(max), Some(avg)) = (self.min_rtt(), self.max_rtt(), self.avg_rtt()) {
            out.push_str(&format!("RTT min/avg/max = {}/{:.1}/{} ms\n", min, avg, max));
        }
        let anomalies = self.anomalies();
        if !anomalies.is_empty() {
            let list: Vec<String> = anomalies.iter().map(usize::to_string).collect();
            out.push_str(&format!("Anomalous hops: {}\n", list.join(", ")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(i: u32, addr: &str, status: HopStatus, rtt: Option<u64>) -> HopRecord {
        HopRecord { hop_index: i, address: addr.into(), hostname: None, status, round_trip_millis: rtt, error_message: None }
    }

    fn sample() -> Trace {
        let mut t = Trace::new("example.net", 0, TraceMode::Icmp);
        t.hops = vec![
            hop(1, "192.168.1.1", HopStatus::TtlExpired, Some(2)),
            hop(2, "*", HopStatus::Timeout, None),
            hop(3, "203.0.113.7", HopStatus::TtlExpired, Some(40)),
            hop(4, "198.51.100.1", HopStatus::Success, Some(10)),
        ];
        t
    }

    #[test]
    fn rtt_analytics() {
        let t = sample();
        assert!(t.is_reachable());
        assert_eq!(t.min_rtt(), Some(2));
        assert_eq!(t.max_rtt(), Some(40));
        assert_eq!(t.avg_rtt(), Some(52.0 / 3.0));
        // 40 > 2 * 17.33
        assert_eq!(t.anomalies(), vec![2, 3]);
        assert!(t.passed_private_address());
    }

    #[test]
    fn empty_trace() {
        let t = Trace::new("x", 0, TraceMode::Tcp);
        assert!(!t.is_reachable());
        assert_eq!(t.avg_rtt(), None);
        assert!(t.anomalies().is_empty());
        assert!(t.to_report().contains("Destination not reached"));
    }

    #[test]
    fn report_lists_hops() {
        let r = sample().to_report();
        assert!(r.starts_with("Trace to example.net (ICMP):\n"));
        assert!(r.contains("Hop 2: * (Timeout) RTT=*"));
        assert!(r.contains("Destination reached"));
        assert!(r.contains("Anomalous hops: 2, 3"));
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("TCP".parse::<TraceMode>().unwrap(), TraceMode::Tcp);
        assert!("udp".parse::<TraceMode>().is_err());
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(sample()).unwrap();
        assert_eq!(v["hops"][0]["hopIndex"], 1);
        assert_eq!(v["mode"], "Icmp");
    }
}

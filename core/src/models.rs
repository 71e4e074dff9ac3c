//! Result and target types shared by every probe and session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Http,
}

/// One thing to probe. Built once per port and lent to the prober.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeTarget {
    pub host: String,
    pub port: Option<u16>,
    pub protocol: Protocol,
}

impl ProbeTarget {
    pub fn new(host: &str, port: u16, protocol: Protocol) -> Self {
        ProbeTarget { host: host.to_string(), port: Some(port), protocol }
    }

    pub fn tcp(host: &str, port: u16) -> Self { ProbeTarget::new(host, port, Protocol::Tcp) }

    pub fn udp(host: &str, port: u16) -> Self { ProbeTarget::new(host, port, Protocol::Udp) }
}

/// A bare host becomes an ICMP target.
impl From<&str> for ProbeTarget {
    fn from(s: &str) -> Self {
        ProbeTarget { host: s.to_string(), port: None, protocol: Protocol::Icmp }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortStatus {
    Open,
    Closed,
    Filtered,
    Timeout,
    Error,
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortStatus::Open => "Open",
            PortStatus::Closed => "Closed",
            PortStatus::Filtered => "Filtered",
            PortStatus::Timeout => "Timeout",
            PortStatus::Error => "Error",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PortStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Open" => Ok(PortStatus::Open),
            "Closed" => Ok(PortStatus::Closed),
            "Filtered" => Ok(PortStatus::Filtered),
            "Timeout" => Ok(PortStatus::Timeout),
            "Error" => Ok(PortStatus::Error),
            other => Err(format!("unknown port status: {}", other)),
        }
    }
}

/// Outcome of a single port probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub port: u16,
    pub status: PortStatus,
    pub service_name: Option<String>,
    pub error_message: Option<String>,
    pub elapsed_millis: u64,
}

impl ProbeResult {
    pub fn new(port: u16, status: PortStatus, elapsed_millis: u64) -> Self {
        ProbeResult { port, status, service_name: None, error_message: None, elapsed_millis }
    }

    pub fn error(port: u16, message: impl Into<String>, elapsed_millis: u64) -> Self {
        ProbeResult { port, status: PortStatus::Error, service_name: None, error_message: Some(message.into()), elapsed_millis }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_service(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn is_open(&self) -> bool { self.status == PortStatus::Open }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Port: {}, Status: {}, Service: {}, Error: {}, Time: {}ms",
            self.port,
            self.status,
            self.service_name.as_deref().unwrap_or(""),
            self.error_message.as_deref().unwrap_or(""),
            self.elapsed_millis
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HopStatus {
    Success,
    TtlExpired,
    Timeout,
    DnsFail,
    Error,
}

impl fmt::Display for HopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HopStatus::Success => "Success",
            HopStatus::TtlExpired => "TtlExpired",
            HopStatus::Timeout => "Timeout",
            HopStatus::DnsFail => "DnsFail",
            HopStatus::Error => "Error",
        };
        f.write_str(s)
    }
}

/// One row of a route trace. `hop_index` is the TTL that produced it; 0 marks the
/// DNS failure sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HopRecord {
    pub hop_index: u32,
    pub address: String,
    pub hostname: Option<String>,
    pub status: HopStatus,
    pub round_trip_millis: Option<u64>,
    pub error_message: Option<String>,
}

impl HopRecord {
    pub fn unanswered(hop_index: u32, status: HopStatus) -> Self {
        HopRecord { hop_index, address: "*".into(), hostname: None, status, round_trip_millis: None, error_message: None }
    }

    pub fn dns_failure(host: &str, message: impl Into<String>) -> Self {
        HopRecord {
            hop_index: 0,
            address: host.to_string(),
            hostname: None,
            status: HopStatus::DnsFail,
            round_trip_millis: None,
            error_message: Some(message.into()),
        }
    }

    /// RFC1918 space, or no responder at all.
    pub fn is_private(&self) -> bool {
        match self.address.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => v4.is_private(),
            Ok(IpAddr::V6(_)) => false,
            Err(_) => self.address == "*",
        }
    }
}

impl fmt::Display for HopRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rtt = self.round_trip_millis.map(|v| format!("{}ms", v)).unwrap_or_else(|| "*".into());
        write!(f, "Hop {}: {}", self.hop_index, self.address)?;
        if let Some(h) = self.hostname.as_deref().filter(|h| !h.is_empty()) {
            write!(f, " [{}]", h)?;
        }
        write!(f, " ({}) RTT={}", self.status, rtt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingSample {
    pub sequence: u32,
    pub round_trip_millis: Option<u64>,
}

/// Aggregate of a ping run. Statistics are derived from `samples` on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingReport {
    pub host: String,
    pub sent_count: u32,
    pub success_count: u32,
    pub samples: Vec<PingSample>,
    pub raw_outputs: Vec<String>,
}

impl PingReport {
    pub fn new(host: &str) -> Self {
        PingReport { host: host.to_string(), ..Default::default() }
    }

    pub fn record(&mut self, sample: PingSample, line: String) {
        self.sent_count += 1;
        if sample.round_trip_millis.is_some() { self.success_count += 1; }
        self.samples.push(sample);
        self.raw_outputs.push(line);
    }

    pub fn fail_count(&self) -> u32 { self.sent_count - self.success_count }

    pub fn loss_rate_percent(&self) -> f64 {
        if self.sent_count == 0 { return 100.0; }
        self.fail_count() as f64 * 100.0 / self.sent_count as f64
    }

    pub fn latencies(&self) -> impl Iterator<Item = u64> + '_ {
        self.samples.iter().filter_map(|s| s.round_trip_millis)
    }

    pub fn min_latency(&self) -> Option<u64> { self.latencies().min() }

    pub fn max_latency(&self) -> Option<u64> { self.latencies().max() }

    pub fn avg_latency(&self) -> Option<f64> {
        let (sum, n) = self.latencies().fold((0u64, 0u64), |(s, n), v| (s + v, n + 1));
        if n == 0 { None } else { Some(sum as f64 / n as f64) }
    }

    pub fn is_fully_reachable(&self) -> bool { self.sent_count > 0 && self.fail_count() == 0 }

    /// Classic ping-style summary.
    pub fn to_report(&self) -> String {
        let mut out = format!("Ping {} with {} packets:\n", self.host, self.sent_count);
        for line in &self.raw_outputs {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&format!("--- {} ping statistics ---\n", self.host));
        out.push_str(&format!(
            "Sent = {}, Received = {}, Lost = {} ({:.1}% loss)\n",
            self.sent_count,
            self.success_count,
            self.fail_count(),
            self.loss_rate_percent()
        ));
        if let (Some(min), Some(max), Some(avg)) = (self.min_latency(), self.max_latency(), self.avg_latency()) {
            out.push_str(&format!("Round-trip times: Min = {}ms, Max = {}ms, Avg = {:.1}ms\n", min, max, avg));
        }
        out
    }
}

/// Outcome of one URL check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlResult {
    pub url: String,
    pub status_code: Option<u16>,
    pub is_success: bool,
    pub content_length: u64,
    pub certificate_valid: bool,
    pub certificate_subject: Option<String>,
    pub resolved_ips: Vec<IpAddr>,
    pub error_message: Option<String>,
    pub elapsed_millis: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(rtts: &[Option<u64>]) -> PingReport {
        let mut r = PingReport::new("h");
        for (i, rtt) in rtts.iter().enumerate() {
            r.record(PingSample { sequence: i as u32, round_trip_millis: *rtt }, String::new());
        }
        r
    }

    #[test]
    fn empty_report_is_total_loss() {
        let r = report(&[]);
        assert_eq!(r.loss_rate_percent(), 100.0);
        assert_eq!(r.avg_latency(), None);
        assert!(!r.is_fully_reachable());
    }

    #[test]
    fn stats_ignore_lost_samples() {
        let r = report(&[Some(4), None, Some(10), None]);
        assert_eq!(r.success_count, 2);
        assert_eq!(r.fail_count(), 2);
        assert_eq!(r.loss_rate_percent(), 50.0);
        assert_eq!(r.min_latency(), Some(4));
        assert_eq!(r.max_latency(), Some(10));
        assert_eq!(r.avg_latency(), Some(7.0));
    }

    #[test]
    fn all_lost_has_no_latency() {
        let r = report(&[None, None]);
        assert_eq!(r.loss_rate_percent(), 100.0);
        assert!(r.min_latency().is_none() && r.max_latency().is_none() && r.avg_latency().is_none());
        assert!(r.to_report().contains("(100.0% loss)"));
    }

    #[test]
    fn status_text_round_trips() {
        for s in [PortStatus::Open, PortStatus::Closed, PortStatus::Filtered, PortStatus::Timeout, PortStatus::Error] {
            assert_eq!(s.to_string().parse::<PortStatus>().unwrap(), s);
        }
        assert!("open".parse::<PortStatus>().is_err());
    }

    #[test]
    fn private_hops() {
        let mut h = HopRecord::unanswered(1, HopStatus::Timeout);
        assert!(h.is_private());
        h.address = "192.168.1.1".into();
        assert!(h.is_private());
        h.address = "8.8.8.8".into();
        assert!(!h.is_private());
    }

    #[test]
    fn serializes_camel_case() {
        let r = ProbeResult::new(80, PortStatus::Open, 3).with_service("HTTP");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["serviceName"], "HTTP");
        assert_eq!(v["elapsedMillis"], 3);
        assert_eq!(v["status"], "Open");
    }
}

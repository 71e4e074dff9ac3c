//! ICMP latency sampling.

pub mod icmp;

use icmp::Echo;
use netdiag_core::resolve::resolve_prefer_v4;
use netdiag_core::{Deadline, PingReport, PingSample};
use rand::RngCore;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingOptions {
    pub count: u32,
    pub timeout: Duration,
    pub payload_size: usize,
    /// Pause between consecutive probes. Not applied after the last one.
    pub interval: Duration,
    pub ttl: u32,
}

impl Default for PingOptions {
    fn default() -> Self {
        PingOptions {
            count: 4,
            timeout: Duration::from_millis(1000),
            payload_size: 32,
            interval: Duration::from_millis(200),
            ttl: 64,
        }
    }
}

/// Summary over a bare list of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    pub sent: u32,
    pub received: u32,
    pub loss_rate_percent: f64,
    pub min: Option<u64>,
    pub max: Option<u64>,
    pub avg: Option<f64>,
}

pub fn statistics(samples: &[PingSample]) -> Statistics {
    let rtts: Vec<u64> = samples.iter().filter_map(|s| s.round_trip_millis).collect();
    let sent = samples.len() as u32;
    let received = rtts.len() as u32;
    let loss_rate_percent = if sent == 0 { 100.0 } else { (sent - received) as f64 * 100.0 / sent as f64 };
    let avg = if rtts.is_empty() { None } else { Some(rtts.iter().sum::<u64>() as f64 / rtts.len() as f64) };
    Statistics {
        sent,
        received,
        loss_rate_percent,
        min: rtts.iter().copied().min(),
        max: rtts.iter().copied().max(),
        avg,
    }
}

/// `count` echo probes with the default interval and TTL.
pub async fn sample(host: &str, count: u32, timeout: Duration, payload_size: usize) -> PingReport {
    let opts = PingOptions { count, timeout, payload_size, ..PingOptions::default() };
    sample_with(host, &opts).await
}

pub async fn sample_with(host: &str, opts: &PingOptions) -> PingReport {
    let mut report = PingReport::new(host);
    let target = match resolve_prefer_v4(host).await {
        Ok(ip) => ip,
        Err(e) => {
            debug!(host, error = %e, "ping target did not resolve");
            for seq in 1..=opts.count {
                report.record(PingSample { sequence: seq, round_trip_millis: None }, Echo::Error(e.to_string()).to_string());
            }
            return report;
        }
    };

    let mut payload = vec![0u8; opts.payload_size];
    rand::thread_rng().fill_bytes(&mut payload);

    for seq in 1..=opts.count {
        let outcome = icmp::echo(target, opts.ttl, &payload, seq as u16, Deadline::after(opts.timeout)).await;
        let rtt = match &outcome {
            Echo::EchoReply { rtt, .. } => Some(rtt.as_millis() as u64),
            _ => None,
        };
        debug!(host, seq, outcome = outcome.kind(), "ping");
        report.record(PingSample { sequence: seq, round_trip_millis: rtt }, outcome.to_string());
        if seq < opts.count && !opts.interval.is_zero() {
            tokio::time::sleep(opts.interval).await;
        }
    }
    info!(host, sent = report.sent_count, received = report.success_count, "ping finished");
    report
}

/// Loss percentage and average RTT, for callers that only need the headline.
pub async fn quick_ping(host: &str, count: u32, timeout: Duration) -> (f64, Option<f64>) {
    let report = sample(host, count, timeout, PingOptions::default().payload_size).await;
    (report.loss_rate_percent(), report.avg_latency())
}

/// Ping each host in turn. An empty list pings the local host.
pub async fn ping_many(hosts: &[String], opts: &PingOptions) -> Vec<PingReport> {
    let defaults = ["localhost".to_string(), "127.0.0.1".to_string()];
    let hosts = if hosts.is_empty() { &defaults[..] } else { hosts };
    let mut out = Vec::with_capacity(hosts.len());
    for h in hosts {
        out.push(sample_with(h, opts).await);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn s(sequence: u32, rtt: Option<u64>) -> PingSample {
        PingSample { sequence, round_trip_millis: rtt }
    }

    #[test]
    fn defaults() {
        let o = PingOptions::default();
        assert_eq!((o.count, o.payload_size, o.ttl), (4, 32, 64));
        assert_eq!(o.timeout, Duration::from_millis(1000));
        assert_eq!(o.interval, Duration::from_millis(200));
    }

    #[test]
    fn statistics_over_mixed_samples() {
        let st = statistics(&[s(1, Some(10)), s(2, None), s(3, Some(30)), s(4, None)]);
        assert_eq!((st.sent, st.received), (4, 2));
        assert_eq!(st.loss_rate_percent, 50.0);
        assert_eq!(st.min, Some(10));
        assert_eq!(st.max, Some(30));
        assert_eq!(st.avg, Some(20.0));
    }

    #[test]
    fn statistics_of_nothing_is_total_loss() {
        let st = statistics(&[]);
        assert_eq!(st.loss_rate_percent, 100.0);
        assert_eq!(st.avg, None);
    }

    #[tokio::test]
    async fn zero_count_sends_nothing() {
        let r = sample("127.0.0.1", 0, Duration::from_millis(100), 8).await;
        assert_eq!(r.sent_count, 0);
        assert_eq!(r.loss_rate_percent(), 100.0);
        assert!(r.raw_outputs.is_empty());
    }

    #[tokio::test]
    async fn unresolvable_host_loses_every_sample() {
        let r = sample("nonexistent.invalid", 3, Duration::from_millis(200), 8).await;
        assert_eq!(r.sent_count, 3);
        assert_eq!(r.success_count, 0);
        assert_eq!(r.loss_rate_percent(), 100.0);
        assert_eq!(r.avg_latency(), None);
        assert!(r.raw_outputs.iter().all(|l| l.starts_with("Ping error: ")));
    }

    #[tokio::test]
    async fn interval_sits_between_probes() {
        let opts = PingOptions { count: 3, timeout: Duration::from_millis(50), interval: Duration::from_millis(60), ..PingOptions::default() };
        let t = Instant::now();
        let r = sample_with("127.0.0.1", &opts).await;
        assert_eq!(r.sent_count, 3);
        assert_eq!(r.samples.iter().map(|s| s.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(t.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn many_defaults_to_local_host() {
        let opts = PingOptions { count: 1, timeout: Duration::from_millis(100), ..PingOptions::default() };
        let reports = ping_many(&[], &opts).await;
        assert_eq!(reports.iter().map(|r| r.host.as_str()).collect::<Vec<_>>(), vec!["localhost", "127.0.0.1"]);
        assert!(reports.iter().all(|r| r.sent_count == 1));
    }

    #[tokio::test]
    #[ignore = "needs ICMP socket permission"]
    async fn loopback_answers() {
        let r = sample("127.0.0.1", 4, Duration::from_millis(1000), 32).await;
        assert_eq!(r.success_count, 4);
        assert!(r.is_fully_reachable());
        assert!(r.raw_outputs[0].starts_with("Reply from 127.0.0.1: time="));
    }
}

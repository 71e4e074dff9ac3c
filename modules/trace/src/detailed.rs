use crate::prober::{reverse_name, HopProber, IcmpHopProber};
use crate::{Trace, TraceMode, MAX_TTL};
use netdiag_core::resolve::resolve_all;
use netdiag_core::{Deadline, HopRecord, HopStatus};
use ping::icmp::Echo;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Configurable trace with per-hop retries and live hop events.
pub struct DetailedTrace {
    host: String,
    port: u16,
    max_hops: u32,
    timeout: Duration,
    retry_per_hop: u32,
    payload_size: usize,
    resolve_names: bool,
    prober: Arc<dyn HopProber>,
    events: Option<mpsc::UnboundedSender<HopRecord>>,
}

impl DetailedTrace {
    pub fn new(host: &str) -> Self {
        DetailedTrace {
            host: host.to_string(),
            port: 80,
            max_hops: 30,
            timeout: Duration::from_millis(3000),
            retry_per_hop: 3,
            payload_size: 32,
            resolve_names: true,
            prober: Arc::new(IcmpHopProber),
            events: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self { self.port = port; self }
    pub fn max_hops(mut self, n: u32) -> Self { self.max_hops = n.min(MAX_TTL); self }
    pub fn timeout(mut self, d: Duration) -> Self { self.timeout = d; self }
    pub fn retry_per_hop(mut self, n: u32) -> Self { self.retry_per_hop = n.max(1); self }
    pub fn payload_size(mut self, n: usize) -> Self { self.payload_size = n; self }
    pub fn resolve_names(mut self, on: bool) -> Self { self.resolve_names = on; self }

    pub fn prober(mut self, prober: impl HopProber + 'static) -> Self {
        self.prober = Arc::new(prober);
        self
    }

    /// Each hop is sent here as soon as it is settled.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<HopRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub async fn run(&self, mode: TraceMode) -> Trace {
        let mut trace = Trace::new(&self.host, self.port, mode);
        let addrs = match resolve_all(&self.host).await {
            Ok(a) => a,
            Err(e) => {
                warn!(host = %self.host, error = %e, "trace target did not resolve");
                self.push(&mut trace, HopRecord::dns_failure(&self.host, e.to_string()));
                return trace;
            }
        };
        match mode {
            TraceMode::Icmp => self.run_icmp(&mut trace, &addrs).await,
            TraceMode::Tcp => self.run_tcp(&mut trace, &addrs).await,
        }
        info!(host = %self.host, %mode, hops = trace.hops.len(), reachable = trace.is_reachable(), "trace finished");
        trace
    }

    fn push(&self, trace: &mut Trace, hop: HopRecord) {
        debug!(hop = %hop, "hop");
        if let Some(tx) = &self.events { let _ = tx.send(hop.clone()); }
        trace.hops.push(hop);
    }

    async fn run_icmp(&self, trace: &mut Trace, addrs: &[IpAddr]) {
        let v4: Vec<IpAddr> = addrs
            .iter()
            .copied()
            .filter(|a| {
                if a.is_ipv6() { warn!(addr = %a, "skipping IPv6 address, ICMPv6 trace is unsupported"); }
                a.is_ipv4()
            })
            .collect();
        if v4.is_empty() {
            let mut hop = HopRecord::unanswered(0, HopStatus::Error);
            hop.address = self.host.clone();
            hop.error_message = Some("no IPv4 address to trace".into());
            self.push(trace, hop);
            return;
        }
        let payload = vec![0u8; self.payload_size];
        for addr in v4 {
            for ttl in 1..=self.max_hops {
                let hop = self.probe_hop(addr, ttl, &payload).await;
                let done = hop.status == HopStatus::Success;
                self.push(trace, hop);
                if done { return; }
            }
        }
    }

    async fn probe_hop(&self, addr: IpAddr, ttl: u32, payload: &[u8]) -> HopRecord {
        let mut answered = 0u32;
        let mut total = Duration::ZERO;
        let mut responder: Option<IpAddr> = None;
        let mut reached = false;
        let mut last_error: Option<String> = None;

        for attempt in 0..self.retry_per_hop {
            let seq = ((ttl << 8) | (attempt & 0xff)) as u16;
            match self.prober.echo(addr, ttl, payload, seq, Deadline::after(self.timeout)).await {
                Echo::EchoReply { from, rtt } => {
                    answered += 1;
                    total += rtt;
                    responder = Some(from);
                    reached = true;
                    last_error = None;
                    break;
                }
                Echo::TtlExpired { from, rtt } => {
                    answered += 1;
                    total += rtt;
                    responder = Some(from);
                    last_error = None;
                }
                Echo::Error(msg) => last_error = Some(msg),
                Echo::Unreachable { .. } | Echo::Timeout => last_error = None,
            }
        }

        let status = if reached {
            HopStatus::Success
        } else if answered > 0 {
            HopStatus::TtlExpired
        } else if last_error.is_some() {
            HopStatus::Error
        } else {
            HopStatus::Timeout
        };
        let mut hop = HopRecord::unanswered(ttl, status);
        if let Some(ip) = responder {
            hop.address = ip.to_string();
            if self.resolve_names { hop.hostname = reverse_name(ip).await; }
        }
        if answered > 0 {
            hop.round_trip_millis = Some((total / answered).as_millis() as u64);
        }
        hop.error_message = last_error;
        hop
    }

    /// One connect per address. This shows reachability of the port, not the path.
    async fn run_tcp(&self, trace: &mut Trace, addrs: &[IpAddr]) {
        for &addr in addrs {
            let started = Instant::now();
            let deadline = Deadline::after(self.timeout);
            let outcome = deadline.run(TcpStream::connect(SocketAddr::new(addr, self.port))).await;
            let mut hop = HopRecord::unanswered(1, HopStatus::Success);
            hop.address = addr.to_string();
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    hop.status = HopStatus::Error;
                    hop.error_message = Some(e.to_string());
                }
                Err(_) => hop.status = HopStatus::Timeout,
            }
            hop.round_trip_millis = Some(started.elapsed().as_millis() as u64);
            if self.resolve_names { hop.hostname = reverse_name(addr).await; }
            self.push(trace, hop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted route: `script(ttl, attempt)` decides each echo.
    struct Route<F> {
        script: F,
        attempts: Mutex<HashMap<u32, u32>>,
    }

    impl<F: Fn(IpAddr, u32, u32) -> Echo> Route<F> {
        fn new(script: F) -> Self { Route { script, attempts: Mutex::new(HashMap::new()) } }
    }

    #[async_trait]
    impl<F> HopProber for Route<F>
    where
        F: Fn(IpAddr, u32, u32) -> Echo + Send + Sync,
    {
        async fn echo(&self, target: IpAddr, ttl: u32, _payload: &[u8], _seq: u16, _deadline: Deadline) -> Echo {
            let attempt = {
                let mut m = self.attempts.lock().unwrap();
                let n = m.entry(ttl).or_insert(0);
                *n += 1;
                *n
            };
            (self.script)(target, ttl, attempt)
        }
    }

    fn router(ttl: u32) -> IpAddr { format!("10.0.0.{}", ttl).parse().unwrap() }

    fn ms(v: u64) -> Duration { Duration::from_millis(v) }

    fn quiet(host: &str) -> DetailedTrace {
        DetailedTrace::new(host).resolve_names(false).timeout(ms(100))
    }

    #[tokio::test]
    async fn stops_at_destination() {
        let t = quiet("127.0.0.1")
            .prober(Route::new(|target, ttl, _| {
                if ttl < 4 { Echo::TtlExpired { from: router(ttl), rtt: ms(5) } } else { Echo::EchoReply { from: target, rtt: ms(9) } }
            }))
            .run(TraceMode::Icmp)
            .await;
        assert_eq!(t.hops.len(), 4);
        assert!(t.is_reachable());
        assert_eq!(t.hops[0].address, "10.0.0.1");
        assert_eq!(t.hops[0].status, HopStatus::TtlExpired);
        assert_eq!(t.hops[3].address, "127.0.0.1");
        assert_eq!(t.hops[3].round_trip_millis, Some(9));
        assert_eq!(t.hops.iter().map(|h| h.hop_index).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn hop_limit_stops_at_largest_ttl() {
        let route = Route::new(|_, ttl, _| if ttl > 255 { Echo::Error("bad ttl".into()) } else { Echo::Timeout });
        let t = quiet("127.0.0.1").max_hops(1000).retry_per_hop(1).timeout(ms(1)).prober(route).run(TraceMode::Icmp).await;
        assert_eq!(t.hops.len(), 255);
        assert_eq!(t.hops.last().unwrap().hop_index, 255);
        assert!(t.hops.iter().all(|h| h.status == HopStatus::Timeout));
    }

    #[tokio::test]
    async fn silent_route_runs_to_max_hops() {
        let route = Route::new(|_, _, _| Echo::Timeout);
        let t = quiet("127.0.0.1").max_hops(5).retry_per_hop(2).prober(route).run(TraceMode::Icmp).await;
        assert_eq!(t.hops.len(), 5);
        assert!(t.hops.iter().all(|h| h.status == HopStatus::Timeout && h.address == "*" && h.round_trip_millis.is_none()));
        assert!(!t.is_reachable());
    }

    #[tokio::test]
    async fn retries_fill_in_a_flaky_hop() {
        let t = quiet("127.0.0.1")
            .max_hops(1)
            .prober(Route::new(|_, ttl, attempt| match attempt {
                1 => Echo::Timeout,
                2 => Echo::TtlExpired { from: router(ttl), rtt: ms(10) },
                _ => Echo::TtlExpired { from: router(ttl), rtt: ms(20) },
            }))
            .run(TraceMode::Icmp)
            .await;
        let hop = &t.hops[0];
        assert_eq!(hop.status, HopStatus::TtlExpired);
        assert_eq!(hop.round_trip_millis, Some(15));
    }

    #[tokio::test]
    async fn last_error_marks_hop() {
        let t = quiet("127.0.0.1")
            .max_hops(2)
            .prober(Route::new(|_, ttl, attempt| {
                if ttl == 1 && attempt == 3 { Echo::Error("send failed".into()) } else { Echo::Timeout }
            }))
            .run(TraceMode::Icmp)
            .await;
        assert_eq!(t.hops[0].status, HopStatus::Error);
        assert_eq!(t.hops[0].error_message.as_deref(), Some("send failed"));
        assert_eq!(t.hops[1].status, HopStatus::Timeout);
    }

    #[tokio::test]
    async fn events_arrive_in_hop_order() {
        let mut tr = quiet("127.0.0.1").max_hops(3).retry_per_hop(1).prober(Route::new(|_, ttl, _| Echo::TtlExpired {
            from: router(ttl),
            rtt: ms(1),
        }));
        let mut rx = tr.subscribe();
        let t = tr.run(TraceMode::Icmp).await;
        let mut seen = Vec::new();
        while let Ok(h) = rx.try_recv() { seen.push(h); }
        assert_eq!(seen, t.hops);
    }

    #[tokio::test]
    async fn dns_failure_is_a_single_sentinel() {
        let t = quiet("nonexistent.invalid").run(TraceMode::Icmp).await;
        assert_eq!(t.hops.len(), 1);
        assert_eq!(t.hops[0].hop_index, 0);
        assert_eq!(t.hops[0].status, HopStatus::DnsFail);
        assert_eq!(t.hops[0].address, "nonexistent.invalid");
        assert!(t.hops[0].error_message.is_some());
    }

    #[tokio::test]
    async fn ipv6_only_target_is_an_error_hop() {
        let t = quiet("::1").prober(Route::new(|_, _, _| Echo::Timeout)).run(TraceMode::Icmp).await;
        assert_eq!(t.hops.len(), 1);
        assert_eq!(t.hops[0].status, HopStatus::Error);
    }

    #[tokio::test]
    async fn tcp_mode_against_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let t = quiet("127.0.0.1").port(port).run(TraceMode::Tcp).await;
        assert_eq!(t.hops.len(), 1);
        assert_eq!(t.hops[0].hop_index, 1);
        assert_eq!(t.hops[0].status, HopStatus::Success);
        assert!(t.hops[0].round_trip_millis.is_some());
        assert!(t.is_reachable());
    }

    #[tokio::test]
    async fn tcp_mode_closed_port() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let t = quiet("127.0.0.1").port(port).run(TraceMode::Tcp).await;
        assert_eq!(t.hops[0].status, HopStatus::Error);
        assert!(t.hops[0].error_message.is_some());
        assert!(t.hops[0].round_trip_millis.is_some());
    }
}

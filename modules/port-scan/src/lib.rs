//! TCP/UDP port scanning with bounded concurrency and ordered results.

use anyhow::{anyhow, Result};
use netdiag_core::error::DiagError;
use netdiag_core::resolve::resolve_prefer_v4;
use netdiag_core::{Deadline, PortProber, ProbeResult, ProbeTarget, ServiceTable, Throttle};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod tcp;

pub use tcp::TcpProber;
pub use udp_probe::UdpProber;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_CONCURRENCY: usize = 50;

/// One scan invocation against one host. Owns the in-flight results until
/// the batch completes.
pub struct ScanSession<P: PortProber + 'static> {
    host: String,
    start_port: u32,
    end_port: u32,
    timeout: Duration,
    max_concurrency: usize,
    payload: Option<Arc<Vec<u8>>>,
    services: Arc<ServiceTable>,
    prober: Arc<P>,
    progress: Option<mpsc::UnboundedSender<ProbeResult>>,
}

impl ScanSession<TcpProber> {
    pub fn tcp(host: &str) -> Self { ScanSession::new(host, TcpProber) }
}

impl ScanSession<UdpProber> {
    pub fn udp(host: &str) -> Self { ScanSession::new(host, UdpProber::new()) }
}

impl<P: PortProber + 'static> ScanSession<P> {
    pub fn new(host: &str, prober: P) -> Self {
        ScanSession {
            host: host.to_string(),
            start_port: 1,
            end_port: 1024,
            timeout: DEFAULT_TIMEOUT,
            max_concurrency: DEFAULT_CONCURRENCY,
            payload: None,
            services: Arc::new(ServiceTable::new()),
            prober: Arc::new(prober),
            progress: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self { self.timeout = timeout; self }

    pub fn max_concurrency(mut self, n: usize) -> Self { self.max_concurrency = n.max(1); self }

    pub fn payload(mut self, payload: Vec<u8>) -> Self { self.payload = Some(Arc::new(payload)); self }

    pub fn services(mut self, services: Arc<ServiceTable>) -> Self { self.services = services; self }

    pub fn range(mut self, start: u32, end: u32) -> Self { self.start_port = start; self.end_port = end; self }

    pub fn host(&self) -> &str { &self.host }

    pub fn service_table(&self) -> &Arc<ServiceTable> { &self.services }

    /// Live stream of results in completion order. Every result is sent before
    /// the sorted batch is returned.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ProbeResult> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.progress = Some(tx);
        rx
    }

    /// Probe one port, annotated with its service name.
    pub async fn scan_port(&self, port: u16) -> ProbeResult {
        let payload = self.payload.as_deref().map(Vec::as_slice);
        let target = ProbeTarget::new(&self.host, port, self.prober.protocol());
        let r = self.prober.probe(&target, Deadline::after(self.timeout), payload).await;
        let r = r.with_service(self.services.lookup(port as u32));
        if let Some(tx) = &self.progress { let _ = tx.send(r.clone()); }
        r
    }

    pub async fn scan_configured(&self) -> Result<Vec<ProbeResult>, DiagError> {
        self.scan_range(self.start_port, self.end_port).await
    }

    /// Scan `start..=end`. The range is checked before any I/O happens.
    pub async fn scan_range(&self, start: u32, end: u32) -> Result<Vec<ProbeResult>, DiagError> {
        validate_range(start, end)?;
        let ports: Vec<u16> = (start as u16..=end as u16).collect();
        Ok(self.dispatch(ports).await)
    }

    /// Scan an explicit port list. Duplicates collapse; port 0 is rejected.
    pub async fn scan_ports(&self, ports: &[u16]) -> Result<Vec<ProbeResult>, DiagError> {
        if ports.contains(&0) {
            return Err(DiagError::InvalidRange { start: 0, end: 0 });
        }
        let mut ports = ports.to_vec();
        ports.sort_unstable();
        ports.dedup();
        Ok(self.dispatch(ports).await)
    }

    async fn dispatch(&self, ports: Vec<u16>) -> Vec<ProbeResult> {
        if ports.is_empty() { return Vec::new(); }
        let host = resolve_best_effort(&self.host).await;
        let protocol = self.prober.protocol();
        let throttle = Throttle::new(self.max_concurrency);
        let results: Arc<Mutex<Vec<ProbeResult>>> = Arc::new(Mutex::new(Vec::with_capacity(ports.len())));
        let mut handles: Vec<(u16, JoinHandle<()>)> = Vec::with_capacity(ports.len());

        for &port in &ports {
            let permit = throttle.acquire().await;
            let prober = self.prober.clone();
            let services = self.services.clone();
            let payload = self.payload.clone();
            let results = results.clone();
            let progress = self.progress.clone();
            let target = ProbeTarget::new(&host, port, protocol);
            let timeout = self.timeout;
            handles.push((port, tokio::spawn(async move {
                let r = prober
                    .probe(&target, Deadline::after(timeout), payload.as_deref().map(Vec::as_slice))
                    .await
                    .with_service(services.lookup(port as u32));
                debug!(port, status = %r.status, elapsed_ms = r.elapsed_millis, "port scanned");
                if let Some(tx) = &progress { let _ = tx.send(r.clone()); }
                results.lock().unwrap_or_else(|e| e.into_inner()).push(r);
                drop(permit);
            })));
        }

        for (port, h) in handles {
            if let Err(e) = h.await {
                warn!(port, error = %e, "probe task failed");
                let r = ProbeResult::error(port, format!("probe task failed: {}", e), 0)
                    .with_service(self.services.lookup(port as u32));
                if let Some(tx) = &self.progress { let _ = tx.send(r.clone()); }
                results.lock().unwrap_or_else(|e| e.into_inner()).push(r);
            }
        }

        let mut out = std::mem::take(&mut *results.lock().unwrap_or_else(|e| e.into_inner()));
        out.sort_by_key(|r| r.port);
        let open = out.iter().filter(|r| r.is_open()).count();
        info!(host = %self.host, scanned = out.len(), open, "scan complete");
        out
    }
}

pub fn validate_range(start: u32, end: u32) -> Result<(), DiagError> {
    if start < 1 || end > 65535 || start > end {
        return Err(DiagError::InvalidRange { start, end });
    }
    Ok(())
}

/// Resolve once up front so each probe skips DNS. Falls back to the original
/// input, letting every probe record the resolver failure itself.
pub async fn resolve_best_effort(host: &str) -> String {
    match resolve_prefer_v4(host).await {
        Ok(ip) => ip.to_string(),
        Err(e) => {
            warn!(host, error = %e, "resolution failed, probing by name");
            host.to_string()
        }
    }
}

/// Parse a comma-separated list of ports/ranges (e.g., "22,80,443", "1-1024,8080").
pub fn parse_ports(spec: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();
    for part in spec.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let s: u16 = start.trim().parse()?;
            let e: u16 = end.trim().parse()?;
            if s == 0 || e == 0 || s > e {
                return Err(anyhow!("invalid port range: {}", part));
            }
            ports.extend(s..=e);
        } else {
            let p: u16 = part.parse()?;
            if p == 0 {
                return Err(anyhow!("invalid port: {}", part));
            }
            ports.push(p);
        }
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

/// Return the first N ports from a curated list of commonly-used ports.
pub fn top_ports(n: usize) -> Vec<u16> {
    const CURATED: &[u16] = &[
        21, 22, 23, 25, 53, 80, 110, 123, 135, 139, 143, 389, 443, 445, 465, 500, 587, 636, 993,
        995, 1080, 1194, 1352, 1433, 1521, 1723, 2049, 2375, 2376, 3000, 3128, 3268, 3306, 3389,
        4444, 4500, 5000, 5060, 5432, 5601, 5671, 5672, 5900, 5985, 5986, 6379, 7001, 7002, 8000,
        8080, 8081, 8200, 8443, 8500, 8530, 8888, 9000, 9092, 9200, 9300, 9418, 9999, 10000,
        11211, 15672, 27017,
    ];
    let take = n.min(CURATED.len());
    CURATED[..take].to_vec()
}

use async_trait::async_trait;
use netdiag_core::probe::{classify_io, missing_port, PortProber};
use netdiag_core::{Deadline, PortStatus, ProbeResult, ProbeTarget, Protocol};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::trace;

/// TCP connect probe. A connect that does not finish before the deadline is
/// reported `Closed`, like an explicit refusal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

#[async_trait]
impl PortProber for TcpProber {
    fn protocol(&self) -> Protocol { Protocol::Tcp }

    async fn probe(&self, target: &ProbeTarget, deadline: Deadline, payload: Option<&[u8]>) -> ProbeResult {
        let Some(port) = target.port else { return missing_port(target) };
        let host = target.host.as_str();
        let started = Instant::now();
        let result = match deadline.run(TcpStream::connect((host, port))).await {
            Ok(Ok(mut stream)) => {
                if let Some(data) = payload.filter(|d| !d.is_empty()) {
                    // Best effort; the port is open either way.
                    if let Ok(Err(e)) = deadline.run(stream.write_all(data)).await {
                        trace!(host, port, error = %e, "payload write failed");
                    }
                }
                ProbeResult::new(port, PortStatus::Open, started.elapsed().as_millis() as u64)
            }
            Ok(Err(e)) => classify_io(port, &e, started.elapsed().as_millis() as u64),
            Err(_) => ProbeResult::new(port, PortStatus::Closed, started.elapsed().as_millis() as u64),
        };
        trace!(host, port, status = %result.status, "tcp probe done");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn listener_is_open_and_gets_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let _ = s.read_to_end(&mut buf).await;
            buf
        });
        let r = TcpProber.probe(&ProbeTarget::tcp("127.0.0.1", port), Deadline::after(Duration::from_secs(2)), Some(b"hello")).await;
        assert_eq!(r.status, PortStatus::Open);
        assert!(r.error_message.is_none());
        assert_eq!(server.await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn dropped_listener_is_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let r = TcpProber.probe(&ProbeTarget::tcp("127.0.0.1", port), Deadline::after(Duration::from_secs(2)), None).await;
        assert_eq!(r.status, PortStatus::Closed);
    }

    #[tokio::test]
    async fn bad_host_is_error() {
        let r = TcpProber.probe(&ProbeTarget::tcp("nonexistent.invalid", 80), Deadline::after(Duration::from_secs(5)), None).await;
        assert!(matches!(r.status, PortStatus::Error | PortStatus::Closed));
    }

    #[tokio::test]
    async fn host_only_target_is_error() {
        let r = TcpProber.probe(&"127.0.0.1".into(), Deadline::after(Duration::from_secs(1)), None).await;
        assert_eq!(r.status, PortStatus::Error);
        assert!(r.error_message.unwrap().contains("has no port"));
    }
}

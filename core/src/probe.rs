use crate::deadline::Deadline;
use crate::models::{PortStatus, ProbeResult, ProbeTarget, Protocol};
use async_trait::async_trait;
use std::io;

/// A single port probe. Implementations must never fail: every transport or
/// resolver problem is folded into the returned result, and whatever socket
/// the probe opened is released before it returns.
#[async_trait]
pub trait PortProber: Send + Sync {
    /// Transport this prober speaks; stamped on every target it is handed.
    fn protocol(&self) -> Protocol;

    async fn probe(&self, target: &ProbeTarget, deadline: Deadline, payload: Option<&[u8]>) -> ProbeResult;
}

/// Result for a target handed to a port prober without a port.
pub fn missing_port(target: &ProbeTarget) -> ProbeResult {
    ProbeResult::error(0, format!("{:?} target {} has no port", target.protocol, target.host), 0)
}

/// Socket errors that mean "nothing is listening there".
pub fn is_refusal(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

/// Map a transport error to the status a closed port reports, or `Error`.
pub fn classify_io(port: u16, e: &io::Error, elapsed_millis: u64) -> ProbeResult {
    if is_refusal(e) {
        ProbeResult::new(port, PortStatus::Closed, elapsed_millis).with_error(e.to_string())
    } else {
        ProbeResult::error(port, e.to_string(), elapsed_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_is_closed() {
        let e = io::Error::from(io::ErrorKind::ConnectionRefused);
        let r = classify_io(9, &e, 1);
        assert_eq!(r.status, PortStatus::Closed);
        assert!(r.error_message.is_some());
    }

    #[test]
    fn other_errors_are_errors() {
        let e = io::Error::new(io::ErrorKind::Other, "failed to lookup address information");
        let r = classify_io(9, &e, 1);
        assert_eq!(r.status, PortStatus::Error);
        assert_eq!(r.error_message.as_deref(), Some("failed to lookup address information"));
    }

    #[test]
    fn portless_target_is_an_error() {
        let r = missing_port(&"example.com".into());
        assert_eq!(r.status, PortStatus::Error);
        assert_eq!(r.port, 0);
        assert!(r.error_message.unwrap().contains("example.com"));
    }
}

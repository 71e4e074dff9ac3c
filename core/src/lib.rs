//! Core utilities and shared types for the diagnostics engine.

pub mod deadline;
pub mod error;
pub mod export;
pub mod models;
pub mod probe;
pub mod resolve;
pub mod services;
pub mod throttle;

pub use deadline::Deadline;
pub use error::DiagError;
pub use models::*;
pub use probe::PortProber;
pub use services::ServiceTable;
pub use throttle::Throttle;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }

    #[test]
    fn probe_target_from_host_str() {
        let t: ProbeTarget = "example.com".into();
        assert_eq!(t.host, "example.com");
        assert_eq!(t.port, None);
        assert_eq!(t.protocol, Protocol::Icmp);
    }
}

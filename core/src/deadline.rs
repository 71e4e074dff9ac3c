//! First-class "operation with a deadline" used by every probe.

use std::future::Future;
use std::time::Duration;
use tokio::time::{error::Elapsed, timeout_at, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(d: Duration) -> Self {
        Deadline { at: Instant::now() + d }
    }

    pub fn after_millis(ms: u64) -> Self { Self::after(Duration::from_millis(ms)) }

    pub fn instant(&self) -> Instant { self.at }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool { self.remaining().is_zero() }

    /// Await `fut` until the deadline. The future is dropped (and with it any
    /// socket it owns) when time runs out.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Elapsed> {
        timeout_at(self.at, fut).await
    }
}

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting gate bounding in-flight probes. A slot is held by the returned
/// permit and handed back when the permit drops, whatever path the probe took.
pub struct Throttle {
    sem: Arc<Semaphore>,
    capacity: usize,
}

impl Clone for Throttle {
    fn clone(&self) -> Self { Throttle { sem: self.sem.clone(), capacity: self.capacity } }
}

impl Throttle {
    pub fn new(max_concurrency: usize) -> Self {
        let capacity = max_concurrency.max(1);
        Throttle { sem: Arc::new(Semaphore::new(capacity)), capacity }
    }

    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore is never closed, so acquisition only waits.
        match self.sem.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => unreachable!("throttle semaphore closed"),
        }
    }

    pub fn capacity(&self) -> usize { self.capacity }

    pub fn available(&self) -> usize { self.sem.available_permits() }
}

use crate::config::BulkheadConfig;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::timeout;

/// Caps concurrent in-flight calls to one rail.
pub struct Bulkhead {
    semaphore: Semaphore,
    max_wait: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityExceeded;

impl Bulkhead {
    pub fn new(config: BulkheadConfig) -> Self {
        Self {
            semaphore: Semaphore::new(config.max_concurrent_calls),
            max_wait: config.max_wait_duration(),
        }
    }

    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, CapacityExceeded> {
        match timeout(self.max_wait, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            _ => Err(CapacityExceeded),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rejects_after_bounded_wait() {
        let bulkhead = Bulkhead::new(BulkheadConfig {
            max_concurrent_calls: 1,
            max_wait_duration_ms: 50,
        });
        let held = bulkhead.acquire().await.unwrap();
        assert_eq!(bulkhead.available(), 0);
        assert_eq!(bulkhead.acquire().await.unwrap_err(), CapacityExceeded);
        drop(held);
        assert!(bulkhead.acquire().await.is_ok());
    }
}

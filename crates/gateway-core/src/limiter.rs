//! C5: a fixed-capacity semaphore wrapping every upstream LLM invocation.
//! Defence-in-depth behind the token bucket's statistical pacing — a hard
//! ceiling the bucket cannot breach even under a burst of freshly-produced
//! tokens.

use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

pub const DEFAULT_CAPACITY: usize = 100;

pub struct ConcurrencyLimiter {
    semaphore: Semaphore,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self { semaphore: Semaphore::new(capacity) })
    }

    pub fn with_default_capacity() -> Arc<Self> {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Acquires a permit, blocking until one is free. The permit releases on
    /// drop, so a panicking caller can't leak capacity.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("concurrency limiter semaphore is never closed")
    }
}

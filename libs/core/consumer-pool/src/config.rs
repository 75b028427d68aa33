//! Pool configuration

use crate::error::PoolError;
use std::time::Duration;

/// Configuration for a [`ConsumerPool`](crate::ConsumerPool)
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Label used in logs and metrics
    pub name: String,

    /// Number of independent polling workers
    pub worker_count: usize,

    /// Upper bound on items returned by one receive
    pub max_items: usize,

    /// Long-poll wait per receive
    pub wait: Duration,
}

impl PoolConfig {
    pub const DEFAULT_MAX_ITEMS: usize = 10;
    pub const DEFAULT_WAIT: Duration = Duration::from_secs(20);

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            worker_count: 1,
            max_items: Self::DEFAULT_MAX_ITEMS,
            wait: Self::DEFAULT_WAIT,
        }
    }

    pub fn with_workers(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.worker_count == 0 {
            return Err(PoolError::Config("worker_count must be at least 1".into()));
        }
        if self.max_items == 0 {
            return Err(PoolError::Config("max_items must be at least 1".into()));
        }
        Ok(())
    }
}

//! Pool sizing and timeouts.

use std::time::Duration;

use dbwire_core::error::PoolErrorKind;
use dbwire_core::{Error, Result};

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum connections per pool key (idle + checked out)
    pub max_size: usize,
    /// Idle connections older than this are closed by the sweep
    pub idle_timeout: Duration,
    /// How long `acquire` waits for a free slot
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 5,
            idle_timeout: Duration::from_secs(300),   // 5 minutes
            acquire_timeout: Duration::from_secs(10), // 10 seconds
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with the given per-key size.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            ..Default::default()
        }
    }

    pub fn max_size(mut self, n: usize) -> Self {
        self.max_size = n;
        self
    }

    /// Set idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Interval of the idle sweep: half the idle timeout.
    pub fn sweep_interval(&self) -> Duration {
        (self.idle_timeout / 2).max(Duration::from_millis(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::pool(
                PoolErrorKind::Config,
                "max_size must be at least 1",
            ));
        }
        Ok(())
    }
}

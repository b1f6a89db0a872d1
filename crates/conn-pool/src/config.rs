//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Default percent chance that a reused idle connection is replaced.
pub const DEFAULT_REFRESH_PROBABILITY: u8 = 5;

/// Configuration for a single named pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of idle connections retained (0 = unbounded).
    ///
    /// This caps idle connections only. Connections checked out by callers
    /// are not counted.
    pub max_connections: u32,

    /// Percent chance (0..=100) that an idle connection is closed and
    /// replaced with a fresh one on checkout.
    pub refresh_probability: u8,

    /// Upper bound on a single factory call. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 0,
            refresh_probability: DEFAULT_REFRESH_PROBABILITY,
            connect_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle connection cap.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the refresh probability, in percent.
    #[must_use]
    pub fn refresh_probability(mut self, percent: u8) -> Self {
        self.refresh_probability = percent;
        self
    }

    /// Set the factory call timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Whether idle retention is unbounded.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.max_connections == 0
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.refresh_probability > 100 {
            return Err(PoolError::Config(format!(
                "refresh_probability must be at most 100, got {}",
                self.refresh_probability
            )));
        }

        if self.connect_timeout == Some(Duration::ZERO) {
            return Err(PoolError::Config(
                "connect_timeout must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

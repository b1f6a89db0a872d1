//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by a connection factory.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by registry and pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// A pool is already registered under this descriptor.
    #[error("pool {0} already exists")]
    AlreadyExists(String),

    /// No pool is registered under this descriptor.
    #[error("pool {0} does not exist")]
    NotFound(String),

    /// The connection factory failed to produce a connection.
    #[error("connection factory failed: {0}")]
    Factory(#[source] BoxError),

    /// The connection factory did not complete within the configured timeout.
    #[error("connection factory timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid pool configuration.
    #[error("invalid pool configuration: {0}")]
    Config(String),
}

impl PoolError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Factory failures and timeouts depend on the remote service and are
    /// considered transient. Registry bookkeeping errors are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Factory(_) | Self::Timeout(_))
    }

    /// Returns the factory's original error, if this is a factory failure.
    #[must_use]
    pub fn factory_source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Factory(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}

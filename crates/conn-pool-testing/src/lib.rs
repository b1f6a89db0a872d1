//! # conn-pool-testing
//!
//! Test infrastructure for the `conn-pool` crate.
//!
//! Provides a [`MockConnection`] that records when it is closed and a
//! [`MockFactory`] that counts connect calls and can be switched between
//! succeeding, failing and blocking. Integration tests for the registry live
//! in this crate's `tests/` directory so `conn-pool` has no circular
//! dev-dependency.
//!
//! ```rust,ignore
//! use conn_pool::Registry;
//! use conn_pool_testing::MockFactory;
//!
//! let factory = MockFactory::new("svc-a");
//! let registry = Registry::new();
//! registry.register("svc-a", factory.clone(), 2)?;
//!
//! let conn = registry.checkout("svc-a").await?;
//! assert_eq!(factory.connects(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use conn_pool::{BoxError, Connection, ConnectionFactory};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

/// Error returned by a [`MockFactory`] configured to fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("mock connect failed: {0}")]
pub struct MockError(pub String);

/// Shared record of closed connections, in close order.
#[derive(Debug, Clone, Default)]
pub struct CloseLog {
    closed: Arc<Mutex<Vec<u64>>>,
}

impl CloseLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// IDs of closed connections, in close order.
    #[must_use]
    pub fn closed(&self) -> Vec<u64> {
        self.closed.lock().clone()
    }

    /// Total number of close calls.
    #[must_use]
    pub fn count(&self) -> usize {
        self.closed.lock().len()
    }

    /// Number of times the connection with `id` was closed.
    #[must_use]
    pub fn times_closed(&self, id: u64) -> usize {
        self.closed.lock().iter().filter(|&&c| c == id).count()
    }

    fn record(&self, id: u64) {
        self.closed.lock().push(id);
    }
}

/// A fake connection that records its close in a [`CloseLog`].
#[derive(Debug)]
pub struct MockConnection {
    id: u64,
    label: String,
    log: CloseLog,
}

impl MockConnection {
    /// Create a connection outside any factory.
    pub fn new(id: u64, label: impl Into<String>, log: &CloseLog) -> Self {
        Self {
            id,
            label: label.into(),
            log: log.clone(),
        }
    }

    /// Connection ID, unique per factory and starting at 1.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Label of the factory that created this connection.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Connection for MockConnection {
    fn close(self) {
        tracing::trace!(id = self.id, label = %self.label, "mock connection closed");
        self.log.record(self.id);
    }
}

/// How a [`MockFactory`] responds to connect calls.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Return a new connection.
    Succeed,
    /// Fail with [`MockError`] carrying this message.
    Fail(String),
    /// Wait this long, then return a new connection.
    Delay(Duration),
    /// Wait until [`MockFactory::release`] is called, then return a new
    /// connection.
    Gated,
}

struct FactoryInner {
    label: String,
    behavior: Mutex<MockBehavior>,
    connects: AtomicU64,
    next_id: AtomicU64,
    gate: Notify,
    log: CloseLog,
}

/// A connection factory that counts calls and records closes.
///
/// Clones share state, so a test can hand one clone to the registry and keep
/// another for assertions.
#[derive(Clone)]
pub struct MockFactory {
    inner: Arc<FactoryInner>,
}

impl MockFactory {
    /// Create a factory that succeeds, labelling connections with `label`.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                label: label.into(),
                behavior: Mutex::new(MockBehavior::Succeed),
                connects: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
                gate: Notify::new(),
                log: CloseLog::new(),
            }),
        }
    }

    /// Create a factory that always fails with `message`.
    pub fn failing(label: impl Into<String>, message: impl Into<String>) -> Self {
        let factory = Self::new(label);
        factory.set_behavior(MockBehavior::Fail(message.into()));
        factory
    }

    /// Change how subsequent connect calls respond.
    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.inner.behavior.lock() = behavior;
    }

    /// Let one pending gated connect call proceed.
    pub fn release(&self) {
        self.inner.gate.notify_one();
    }

    /// Number of connect calls so far, including failed ones.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Close log shared by every connection this factory creates.
    #[must_use]
    pub fn log(&self) -> &CloseLog {
        &self.inner.log
    }

    /// Label stamped on created connections.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    fn next_connection(&self) -> MockConnection {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(id, label = %self.inner.label, "mock connection created");
        MockConnection::new(id, self.inner.label.clone(), &self.inner.log)
    }
}

impl std::fmt::Debug for MockFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockFactory")
            .field("label", &self.inner.label)
            .field("connects", &self.connects())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConnectionFactory<MockConnection> for MockFactory {
    async fn connect(&self) -> Result<MockConnection, BoxError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);

        let behavior = self.inner.behavior.lock().clone();
        match behavior {
            MockBehavior::Succeed => {}
            MockBehavior::Fail(message) => return Err(Box::new(MockError(message))),
            MockBehavior::Delay(delay) => tokio::time::sleep(delay).await,
            MockBehavior::Gated => self.inner.gate.notified().await,
        }

        Ok(self.next_connection())
    }
}

//! Connection pool implementation.
//!
//! A pool holds the idle connections for a single descriptor. It is only
//! reachable through the [`Registry`](crate::Registry), which owns one pool
//! per descriptor behind an `Arc`.
//!
//! Idle connections are kept in FIFO order. On checkout the oldest idle
//! connection is reused, except that with a configurable probability it is
//! closed and replaced by a fresh one from the factory. This bounds the age
//! of pooled connections without per-connection timers or background sweeps.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use rand::rngs::StdRng;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{Connection, DynConnectionFactory};

/// Idle connections and refresh state for one descriptor.
pub(crate) struct Pool<C: Connection> {
    /// Descriptor this pool is registered under.
    descriptor: String,

    /// Pool configuration.
    config: PoolConfig,

    /// Factory used when the pool is empty or a connection is refreshed.
    factory: DynConnectionFactory<C>,

    /// Idle connections, random source and closed flag.
    state: Mutex<PoolState<C>>,

    /// When the pool was created.
    created_at: Instant,

    /// Pool metrics.
    metrics: Mutex<PoolMetricsInner>,
}

struct PoolState<C> {
    /// Idle connections, oldest first.
    idle: VecDeque<C>,
    /// Source for refresh draws, seeded once per pool.
    rng: StdRng,
    /// Set on teardown. A closed pool accepts no connections.
    closed: bool,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    /// Total connections created by the factory.
    connections_created: u64,
    /// Total connections closed by the pool.
    connections_closed: u64,
    /// Total successful checkouts.
    checkouts_successful: u64,
    /// Total failed checkouts (factory errors, timeouts).
    checkouts_failed: u64,
    /// Idle connections replaced on checkout.
    refreshes: u64,
    /// Connections returned and retained as idle.
    checkins: u64,
    /// Connections returned but closed because the idle cap was reached.
    discarded: u64,
}

impl<C: Connection> Pool<C> {
    pub(crate) fn new(
        descriptor: String,
        factory: DynConnectionFactory<C>,
        config: PoolConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            descriptor,
            config,
            factory,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                rng,
                closed: false,
            }),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
        }
    }

    /// Check out a connection, transferring ownership to the caller.
    ///
    /// Reuses the oldest idle connection unless the refresh draw says to
    /// replace it. Falls back to the factory when no idle connection exists.
    /// Factory errors are returned unchanged and never retried.
    pub(crate) async fn get(&self) -> Result<C, PoolError> {
        let reused = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PoolError::NotFound(self.descriptor.clone()));
            }

            match state.idle.pop_front() {
                Some(conn) => {
                    let roll: u8 = state.rng.gen_range(0..100);
                    Some((conn, roll < self.config.refresh_probability))
                }
                None => None,
            }
        };

        match reused {
            Some((conn, false)) => {
                tracing::trace!(descriptor = %self.descriptor, "reusing idle connection");
                self.metrics.lock().checkouts_successful += 1;
                return Ok(conn);
            }
            Some((conn, true)) => {
                tracing::debug!(descriptor = %self.descriptor, "refreshing idle connection");
                conn.close();
                let mut metrics = self.metrics.lock();
                metrics.refreshes += 1;
                metrics.connections_closed += 1;
            }
            None => {
                tracing::trace!(descriptor = %self.descriptor, "no idle connection, creating");
            }
        }

        let result = self.connect().await;

        let mut metrics = self.metrics.lock();
        match result {
            Ok(_) => {
                metrics.connections_created += 1;
                metrics.checkouts_successful += 1;
            }
            Err(_) => metrics.checkouts_failed += 1,
        }

        result
    }

    async fn connect(&self) -> Result<C, PoolError> {
        match self.config.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.factory.connect())
                .await
                .map_err(|_| PoolError::Timeout(timeout))?
                .map_err(PoolError::Factory),
            None => self.factory.connect().await.map_err(PoolError::Factory),
        }
    }

    /// Return a connection to the pool.
    ///
    /// The connection is appended as the newest idle entry if the pool is
    /// below its idle cap, otherwise it is closed. A connection returned to a
    /// pool that was torn down concurrently is closed and `NotFound` is
    /// reported.
    pub(crate) fn put(&self, conn: C) -> Result<(), PoolError> {
        let mut state = self.state.lock();

        if state.closed {
            drop(state);
            self.close_connection(conn);
            return Err(PoolError::NotFound(self.descriptor.clone()));
        }

        if self.has_idle_capacity(state.idle.len()) {
            state.idle.push_back(conn);
            let idle = state.idle.len();
            drop(state);

            tracing::trace!(descriptor = %self.descriptor, idle, "connection returned to pool");
            self.metrics.lock().checkins += 1;
            return Ok(());
        }
        drop(state);

        tracing::debug!(
            descriptor = %self.descriptor,
            max = self.config.max_connections,
            "idle limit reached, closing returned connection"
        );
        self.close_connection(conn);
        self.metrics.lock().discarded += 1;

        Ok(())
    }

    /// Close every idle connection and mark the pool closed.
    ///
    /// Connections currently checked out are not tracked and remain the
    /// caller's to close. Returns the number of connections closed.
    pub(crate) fn close(&self) -> usize {
        let drained: Vec<C> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.idle.drain(..).collect()
        };

        let count = drained.len();
        for conn in drained {
            conn.close();
        }
        self.metrics.lock().connections_closed += count as u64;

        count
    }

    /// Get the current pool status.
    pub(crate) fn status(&self) -> PoolStatus {
        let idle = self.state.lock().idle.len();
        PoolStatus {
            idle: u32::try_from(idle).unwrap_or(u32::MAX),
            max: self.config.max_connections,
        }
    }

    /// Get pool metrics.
    pub(crate) fn metrics(&self) -> PoolMetrics {
        let inner = self.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            refreshes: inner.refreshes,
            checkins: inner.checkins,
            discarded: inner.discarded,
            uptime: self.created_at.elapsed(),
        }
    }

    /// Get the pool configuration.
    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn has_idle_capacity(&self, idle: usize) -> bool {
        self.config.is_unbounded() || idle < self.config.max_connections as usize
    }

    fn close_connection(&self, conn: C) {
        conn.close();
        self.metrics.lock().connections_closed += 1;
    }
}

impl<C: Connection> Drop for Pool<C> {
    fn drop(&mut self) {
        // Idle connections still held when the last reference goes away.
        for conn in self.state.get_mut().idle.drain(..) {
            conn.close();
        }
    }
}

/// Status information about a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections held by the pool.
    pub idle: u32,
    /// Maximum idle connections retained (0 = unbounded).
    pub max: u32,
}

impl PoolStatus {
    /// Check if the pool holds as many idle connections as it may retain.
    ///
    /// An unbounded pool is never at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.max != 0 && self.idle >= self.max
    }
}

/// Metrics collected from a pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections closed by the pool since pool start.
    pub connections_closed: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (factory errors, timeouts).
    pub checkouts_failed: u64,
    /// Idle connections closed and replaced on checkout.
    pub refreshes: u64,
    /// Connections returned and kept idle.
    pub checkins: u64,
    /// Connections returned but closed because the idle cap was reached.
    pub discarded: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }
}

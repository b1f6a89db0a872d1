//! Registry of named pools.
//!
//! The registry maps descriptors to pools. The map itself sits behind a
//! reader/writer lock that is held only for lookups, insertions and removals;
//! each pool guards its idle connections with its own lock, and the factory
//! runs with no lock held. A slow connect for one descriptor therefore never
//! stalls traffic for another.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use parking_lot::RwLock;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{Connection, ConnectionFactory, DynConnectionFactory};
use crate::pool::{Pool, PoolMetrics, PoolStatus};

/// A registry of connection pools keyed by descriptor.
///
/// The registry is an ordinary value owned by the caller. Share it between
/// tasks with an `Arc` and tear it down with [`Registry::destroy_all`], or
/// drop it: dropping the last reference to a pool closes its idle
/// connections.
///
/// Connections checked in must have been checked out from the same
/// descriptor, and at most once. The registry does not track provenance, so
/// foreign or duplicate check-ins are accepted as if they were legitimate.
///
/// # Example
///
/// ```rust,ignore
/// use conn_pool::{Registry, from_fn};
///
/// let registry = Registry::new();
/// registry.register("10.0.0.1:50051", from_fn(|| dial("10.0.0.1:50051")), 4)?;
///
/// let conn = registry.checkout("10.0.0.1:50051").await?;
/// // Use connection...
/// registry.check_in("10.0.0.1:50051", conn)?;
///
/// registry.destroy("10.0.0.1:50051")?;
/// ```
pub struct Registry<C: Connection> {
    pools: RwLock<HashMap<String, Arc<Pool<C>>>>,

    /// Configuration applied by [`Registry::register`].
    default_config: PoolConfig,

    /// Base seed for per-pool random sources, if deterministic.
    seed: Option<u64>,

    /// Counter mixed into deterministic seeds so pools draw independently.
    registrations: AtomicU64,
}

impl<C: Connection> Registry<C> {
    /// Create an empty registry with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            default_config: PoolConfig::default(),
            seed: None,
            registrations: AtomicU64::new(0),
        }
    }

    /// Create a new registry builder.
    #[must_use]
    pub fn builder() -> RegistryBuilder<C> {
        RegistryBuilder::new()
    }

    /// Register a pool for `descriptor` retaining at most `max_connections`
    /// idle connections (0 = unbounded).
    ///
    /// Other settings come from the registry's default configuration.
    pub fn register<F>(
        &self,
        descriptor: impl Into<String>,
        factory: F,
        max_connections: u32,
    ) -> Result<(), PoolError>
    where
        F: ConnectionFactory<C>,
    {
        let config = self.default_config.clone().max_connections(max_connections);
        self.register_with_config(descriptor, factory, config)
    }

    /// Register a pool for `descriptor` with an explicit configuration.
    ///
    /// Fails with [`PoolError::AlreadyExists`] if the descriptor is taken, or
    /// [`PoolError::Config`] if the configuration is invalid. The registry is
    /// unchanged on failure.
    pub fn register_with_config<F>(
        &self,
        descriptor: impl Into<String>,
        factory: F,
        config: PoolConfig,
    ) -> Result<(), PoolError>
    where
        F: ConnectionFactory<C>,
    {
        config.validate()?;
        self.insert(descriptor.into(), Arc::new(factory), config)
    }

    fn insert(
        &self,
        descriptor: String,
        factory: DynConnectionFactory<C>,
        config: PoolConfig,
    ) -> Result<(), PoolError> {
        let mut pools = self.pools.write();

        match pools.entry(descriptor) {
            Entry::Occupied(entry) => Err(PoolError::AlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                tracing::info!(
                    descriptor = %entry.key(),
                    max = config.max_connections,
                    refresh_probability = config.refresh_probability,
                    "connection pool registered"
                );

                let pool = Pool::new(entry.key().clone(), factory, config, self.next_rng());
                entry.insert(Arc::new(pool));
                Ok(())
            }
        }
    }

    /// Check out a connection from the pool registered under `descriptor`.
    ///
    /// The caller owns the connection until it is returned with
    /// [`Registry::check_in`] or dropped.
    pub async fn checkout(&self, descriptor: &str) -> Result<C, PoolError> {
        let pool = self.pool(descriptor)?;
        pool.get().await
    }

    /// Return a connection to the pool registered under `descriptor`.
    ///
    /// If no such pool exists the connection is closed here and
    /// [`PoolError::NotFound`] is returned, so a failed check-in never leaks
    /// the connection.
    pub fn check_in(&self, descriptor: &str, conn: C) -> Result<(), PoolError> {
        match self.lookup(descriptor) {
            Some(pool) => pool.put(conn),
            None => {
                tracing::debug!(
                    descriptor = %descriptor,
                    "check-in to unknown pool, closing connection"
                );
                conn.close();
                Err(PoolError::NotFound(descriptor.to_string()))
            }
        }
    }

    /// Remove the pool registered under `descriptor` and close its idle
    /// connections.
    ///
    /// Connections checked out at this point are not closed. Returning one
    /// afterwards yields [`PoolError::NotFound`].
    pub fn destroy(&self, descriptor: &str) -> Result<(), PoolError> {
        let pool = self
            .pools
            .write()
            .remove(descriptor)
            .ok_or_else(|| PoolError::NotFound(descriptor.to_string()))?;

        let closed = pool.close();
        tracing::info!(descriptor = %descriptor, closed, "connection pool destroyed");

        Ok(())
    }

    /// Destroy every registered pool. Returns the number of pools removed.
    pub fn destroy_all(&self) -> usize {
        let drained: Vec<(String, Arc<Pool<C>>)> = self.pools.write().drain().collect();

        let count = drained.len();
        for (descriptor, pool) in drained {
            let closed = pool.close();
            tracing::info!(descriptor = %descriptor, closed, "connection pool destroyed");
        }

        count
    }

    /// Check whether a pool is registered under `descriptor`.
    #[must_use]
    pub fn contains(&self, descriptor: &str) -> bool {
        self.pools.read().contains_key(descriptor)
    }

    /// Number of registered pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    /// Check whether no pools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }

    /// Registered descriptors, sorted.
    #[must_use]
    pub fn descriptors(&self) -> Vec<String> {
        let mut descriptors: Vec<String> = self.pools.read().keys().cloned().collect();
        descriptors.sort();
        descriptors
    }

    /// Get the current status of the pool registered under `descriptor`.
    pub fn status(&self, descriptor: &str) -> Result<PoolStatus, PoolError> {
        Ok(self.pool(descriptor)?.status())
    }

    /// Get metrics for the pool registered under `descriptor`.
    pub fn metrics(&self, descriptor: &str) -> Result<PoolMetrics, PoolError> {
        Ok(self.pool(descriptor)?.metrics())
    }

    /// Get the configuration of the pool registered under `descriptor`.
    pub fn config(&self, descriptor: &str) -> Result<PoolConfig, PoolError> {
        Ok(self.pool(descriptor)?.config().clone())
    }

    fn lookup(&self, descriptor: &str) -> Option<Arc<Pool<C>>> {
        self.pools.read().get(descriptor).cloned()
    }

    fn pool(&self, descriptor: &str) -> Result<Arc<Pool<C>>, PoolError> {
        self.lookup(descriptor)
            .ok_or_else(|| PoolError::NotFound(descriptor.to_string()))
    }

    fn next_rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => {
                let index = self.registrations.fetch_add(1, Ordering::Relaxed);
                StdRng::seed_from_u64(seed.wrapping_add(index))
            }
            None => StdRng::from_entropy(),
        }
    }
}

impl<C: Connection> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("descriptors", &self.descriptors())
            .field("default_config", &self.default_config)
            .finish_non_exhaustive()
    }
}

/// Builder for creating a registry.
///
/// # Example
///
/// ```rust,ignore
/// let registry: Registry<Channel> = Registry::builder()
///     .refresh_probability(10)
///     .connect_timeout(Duration::from_secs(5))
///     .build()?;
/// ```
pub struct RegistryBuilder<C: Connection> {
    default_config: PoolConfig,
    seed: Option<u64>,
    _connection: PhantomData<fn() -> C>,
}

impl<C: Connection> RegistryBuilder<C> {
    /// Create a new registry builder with default settings.
    pub fn new() -> Self {
        Self {
            default_config: PoolConfig::default(),
            seed: None,
            _connection: PhantomData,
        }
    }

    /// Set the configuration used by [`Registry::register`].
    ///
    /// `max_connections` is overridden per registration.
    #[must_use]
    pub fn default_config(mut self, config: PoolConfig) -> Self {
        self.default_config = config;
        self
    }

    /// Set the default refresh probability, in percent.
    #[must_use]
    pub fn refresh_probability(mut self, percent: u8) -> Self {
        self.default_config.refresh_probability = percent;
        self
    }

    /// Set the default factory call timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.default_config.connect_timeout = Some(timeout);
        self
    }

    /// Seed the per-pool random sources deterministically.
    ///
    /// Without a seed each pool draws its seed from system entropy.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build the registry.
    pub fn build(self) -> Result<Registry<C>, PoolError> {
        self.default_config.validate()?;

        Ok(Registry {
            pools: RwLock::new(HashMap::new()),
            default_config: self.default_config,
            seed: self.seed,
            registrations: AtomicU64::new(0),
        })
    }
}

impl<C: Connection> Default for RegistryBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> Clone for RegistryBuilder<C> {
    fn clone(&self) -> Self {
        Self {
            default_config: self.default_config.clone(),
            seed: self.seed,
            _connection: PhantomData,
        }
    }
}

impl<C: Connection> fmt::Debug for RegistryBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("default_config", &self.default_config)
            .field("seed", &self.seed)
            .finish()
    }
}

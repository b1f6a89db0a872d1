//! # conn-pool
//!
//! Registry of named connection pools for long-lived client connections.
//!
//! Each pool is identified by a descriptor (typically a target address or
//! logical service name), creates connections lazily through a caller-supplied
//! factory, and bounds how many idle connections it retains. Aged connections
//! are retired probabilistically on checkout instead of through TTL timers.
//!
//! ## Features
//!
//! - One pool per descriptor, enforced at registration
//! - FIFO reuse of idle connections
//! - Idle connection cap (0 = unbounded)
//! - Probabilistic refresh of reused connections (default 5%)
//! - Per-pool locking; factories run with no lock held
//! - Optional factory timeout
//! - Per-pool status and metrics
//!
//! ## Example
//!
//! ```rust,ignore
//! use conn_pool::{Connection, Registry, from_fn};
//!
//! impl Connection for Channel {
//!     fn close(self) {
//!         self.shutdown();
//!     }
//! }
//!
//! let registry: Registry<Channel> = Registry::new();
//! registry.register("inventory:50051", from_fn(|| Channel::connect("inventory:50051")), 8)?;
//!
//! let channel = registry.checkout("inventory:50051").await?;
//! // Use channel...
//! registry.check_in("inventory:50051", channel)?;
//!
//! // Check pool status
//! let status = registry.status("inventory:50051")?;
//! println!("idle connections: {}", status.idle);
//!
//! // Get metrics
//! let metrics = registry.metrics("inventory:50051")?;
//! println!("Checkout success rate: {:.2}", metrics.checkout_success_rate());
//!
//! registry.destroy("inventory:50051")?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod registry;

// Configuration
pub use config::{DEFAULT_REFRESH_PROBABILITY, PoolConfig};

// Error types
pub use error::{BoxError, PoolError};

// Pool types
pub use pool::{PoolMetrics, PoolStatus};

// Registry
pub use registry::{Registry, RegistryBuilder};

// Lifecycle management
pub use lifecycle::{Connection, ConnectionFactory, DynConnectionFactory, FnFactory, from_fn};

//! Connection lifecycle traits.
//!
//! The pool never establishes transport connections itself. Callers supply a
//! [`ConnectionFactory`] when registering a pool, and the connection type
//! decides what closing means via [`Connection::close`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BoxError;

/// A long-lived client connection that can be held by a pool.
pub trait Connection: Send + Sized + 'static {
    /// Close the connection, releasing its transport resources.
    ///
    /// Called when the pool discards a connection: on refresh, when the idle
    /// cap is reached, and on teardown. The default drops the handle.
    fn close(self) {
        drop(self);
    }
}

/// Produces new connections for a pool.
///
/// The factory is zero-argument from the pool's point of view. Addresses,
/// credentials and transport-level timeouts belong to the implementor.
#[async_trait]
pub trait ConnectionFactory<C: Connection>: Send + Sync + 'static {
    /// Establish a new connection.
    async fn connect(&self) -> Result<C, BoxError>;
}

/// Shared, type-erased connection factory.
pub type DynConnectionFactory<C> = Arc<dyn ConnectionFactory<C>>;

/// A [`ConnectionFactory`] backed by an async closure.
///
/// Created with [`from_fn`].
#[derive(Clone)]
pub struct FnFactory<F> {
    f: F,
}

impl<F> fmt::Debug for FnFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFactory").finish_non_exhaustive()
    }
}

/// Build a factory from a closure returning a connection future.
///
/// # Example
///
/// ```rust,ignore
/// let factory = conn_pool::from_fn(|| async { Channel::connect("10.0.0.1:50051").await });
/// registry.register("billing", factory, 4)?;
/// ```
pub fn from_fn<F>(f: F) -> FnFactory<F> {
    FnFactory { f }
}

#[async_trait]
impl<C, F, Fut, E> ConnectionFactory<C> for FnFactory<F>
where
    C: Connection,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<C, E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    async fn connect(&self) -> Result<C, BoxError> {
        (self.f)().await.map_err(Into::into)
    }
}

//! Lease handles given out by the pool

use std::ops::Deref;
use std::sync::Arc;

use tidepool_core::Connection;

use super::pool::ConnectionPool;

/// Identity of one physical connection, stable across leases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identity of one acquisition; never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(pub(crate) u64);

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lease-{}", self.0)
    }
}

/// A connection checked out by `ConnectionPool::acquire`.
///
/// Hand it back with `ConnectionPool::release`. Releasing the same lease
/// again, or after the pool shut down, is a no-op.
pub struct Lease {
    pub(crate) id: LeaseId,
    pub(crate) connection_id: ConnectionId,
    pub(crate) connection: Arc<dyn Connection>,
}

impl Lease {
    pub fn id(&self) -> LeaseId {
        self.id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Get the underlying connection as an Arc
    pub fn inner(&self) -> &Arc<dyn Connection> {
        &self.connection
    }
}

impl Deref for Lease {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id)
            .field("driver", &self.connection.driver_name())
            .finish()
    }
}

/// A connection borrowed from the pool for a scope
///
/// `release().await` returns it through the normal health-checked path.
/// When dropped without that (early return, panic, cancelled future) the
/// connection is handed back synchronously: recycled if still open,
/// otherwise discarded.
pub struct PooledConnection<'a> {
    lease: Option<Lease>,
    pool: &'a ConnectionPool,
    discard_on_drop: bool,
}

impl<'a> PooledConnection<'a> {
    pub(crate) fn new(lease: Lease, pool: &'a ConnectionPool) -> Self {
        Self {
            lease: Some(lease),
            pool,
            discard_on_drop: false,
        }
    }

    /// Get the lease backing this guard
    pub fn lease(&self) -> &Lease {
        self.lease.as_ref().expect("lease taken")
    }

    /// Get the underlying connection as an Arc
    pub fn inner(&self) -> &Arc<dyn Connection> {
        self.lease().inner()
    }

    /// Retire rather than recycle the connection if the guard is dropped
    /// without `release`. Used while a transaction is open on it.
    pub(crate) fn set_discard_on_drop(&mut self, discard: bool) {
        self.discard_on_drop = discard;
    }

    /// Return the connection through the health-checked release path.
    pub async fn release(mut self) {
        if let Some(lease) = &self.lease {
            self.pool.release(lease).await;
        }
        self.lease = None;
    }
}

impl<'a> Deref for PooledConnection<'a> {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.lease().connection.as_ref()
    }
}

impl<'a> Drop for PooledConnection<'a> {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.pool.return_unchecked(lease.id, self.discard_on_drop);
        }
    }
}

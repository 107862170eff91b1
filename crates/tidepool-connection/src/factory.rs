//! Connection factories
//!
//! The pool never talks to a driver directly; it asks a `ConnectionFactory`
//! for a ready-to-use connection. `DriverFactory` is the standard
//! implementation: it opens through a `Driver`, bounded by a connect
//! timeout, then runs the session initialisation statements.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tidepool_core::{Connection, ConnectionParams, Driver, Result, TidepoolError};

/// Factory trait for creating new connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Open a new connection, fully initialised and ready for use.
    ///
    /// A failure here must leave nothing behind: the pool does not count
    /// the connection and will not close it.
    async fn create(&self) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        (**self).create().await
    }
}

/// Opens connections through a `Driver` and applies session setup
pub struct DriverFactory<D: Driver> {
    driver: D,
    params: ConnectionParams,
    connect_timeout: Duration,
}

impl<D: Driver> DriverFactory<D> {
    /// Create a factory for `params`, bounding each open by `connect_timeout`.
    pub fn new(driver: D, params: ConnectionParams, connect_timeout: Duration) -> Self {
        Self {
            driver,
            params,
            connect_timeout,
        }
    }

    /// Get the parameters new connections are opened with
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    async fn initialise(&self, conn: &dyn Connection) -> Result<()> {
        for statement in &self.params.session_init {
            conn.execute(statement, &[]).await.map_err(|e| {
                TidepoolError::Connection(format!(
                    "session initialisation `{}` failed: {}",
                    statement, e
                ))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl<D: Driver> ConnectionFactory for DriverFactory<D> {
    #[tracing::instrument(skip(self), fields(driver = %self.driver.id(), address = %self.params.address()))]
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        let conn = tokio::time::timeout(self.connect_timeout, self.driver.connect(&self.params))
            .await
            .map_err(|_| {
                TidepoolError::Connection(format!(
                    "connect timed out after {:?}",
                    self.connect_timeout
                ))
            })?
            .map_err(|e| match e {
                TidepoolError::Connection(_) => e,
                other => TidepoolError::Connection(other.to_string()),
            })?;

        if let Err(e) = self.initialise(&*conn).await {
            tracing::warn!(error = %e, "closing connection after failed session setup");
            if let Err(close_err) = conn.close().await {
                tracing::debug!(error = %close_err, "close after failed setup also failed");
            }
            return Err(e);
        }

        tracing::debug!(
            statements = self.params.session_init.len(),
            "connection opened"
        );
        Ok(conn)
    }
}

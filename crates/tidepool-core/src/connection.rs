//! Connection capability trait

use crate::{QueryResult, Result, StatementResult, Value};
use async_trait::async_trait;

/// One live backend session.
///
/// This is the whole surface the pool relies on. Implementations are free to
/// speak any wire protocol; the pool only pings, runs statements, brackets
/// transactions and closes.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "postgres", "mysql", "sim")
    fn driver_name(&self) -> &str;

    /// Cheapest possible round-trip to the backend.
    ///
    /// The default runs the driver's ping query and discards the rows.
    async fn ping(&self) -> Result<()> {
        self.query(ping_query(self.driver_name()), &[]).await.map(|_| ())
    }

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows (SELECT)
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Begin a transaction on this connection
    async fn begin_transaction(&self) -> Result<()>;

    /// Commit the open transaction
    async fn commit(&self) -> Result<()>;

    /// Roll back the open transaction
    async fn rollback(&self) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

/// Get the ping query for a given driver.
///
/// Every backend we talk to accepts `SELECT 1`; MySQL also has `DO 1`
/// which skips building a result set.
pub fn ping_query(driver_name: &str) -> &'static str {
    match driver_name {
        "mysql" | "mariadb" => "DO 1",
        _ => "SELECT 1",
    }
}

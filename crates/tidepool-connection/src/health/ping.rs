//! Connection ping
//!
//! Runs the backend's cheapest round-trip and measures how long it took.

use std::time::{Duration, Instant};

use thiserror::Error;
use tidepool_core::Connection;

/// Result of a ping operation
pub type PingResult = Result<Duration, PingError>;

/// Error that can occur during a ping operation
#[derive(Debug, Clone, Error)]
pub enum PingError {
    #[error("Connection is closed")]
    ConnectionClosed,
    #[error("Ping query failed: {0}")]
    QueryFailed(String),
    #[error("Ping timed out after {0:?}")]
    Timeout(Duration),
}

/// Ping a connection to check if it's alive.
///
/// Returns the round-trip time on success. The ping is abandoned once
/// `timeout` elapses so one stuck connection cannot stall its caller.
///
/// # Example
///
/// ```ignore
/// use tidepool_connection::health::ping_connection;
///
/// let latency = ping_connection(&*conn, Duration::from_secs(5)).await?;
/// println!("Backend latency: {:?}", latency);
/// ```
pub async fn ping_connection(conn: &dyn Connection, timeout: Duration) -> PingResult {
    if conn.is_closed() {
        return Err(PingError::ConnectionClosed);
    }

    let start = Instant::now();
    match tokio::time::timeout(timeout, conn.ping()).await {
        Ok(Ok(())) => Ok(start.elapsed()),
        Ok(Err(e)) => Err(PingError::QueryFailed(e.to_string())),
        Err(_) => Err(PingError::Timeout(timeout)),
    }
}

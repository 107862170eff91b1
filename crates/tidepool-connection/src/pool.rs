//! Connection pooling for backend connections
//!
//! This module provides a bounded pool with health-checked reuse,
//! timeout-bounded acquisition, utilization-driven scaling and
//! statistics tracking.
//!
//! # Example
//!
//! ```ignore
//! use tidepool_connection::pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new(2, 20)
//!     .with_acquire_timeout_ms(5000)
//!     .with_latency_budget_ms(100);
//!
//! let pool = ConnectionPool::new(config, connection_factory);
//! pool.warm_up().await;
//!
//! let lease = pool.acquire(Duration::from_secs(1)).await?;
//! let rows = lease.query("SELECT id FROM customers", &[]).await?;
//! pool.release(&lease).await;
//! ```

mod config;
mod lease;
mod pool;
mod scaling;
mod stats;

#[cfg(test)]
mod tests;

pub use config::PoolConfig;
pub use lease::{ConnectionId, Lease, LeaseId, PooledConnection};
pub use pool::{CleanupOutcome, ConnectionPool};
pub use scaling::{ScaleAction, ScalingInput, ScalingPolicy};
pub use stats::{PerformanceMetrics, PoolHealth, PoolStats};

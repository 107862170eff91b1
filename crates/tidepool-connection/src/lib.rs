//! Tidepool Connection - Bounded connection pooling
//!
//! This crate manages a shared set of long-lived backend connections:
//! acquisition with a deadline, health-checked recycling, scaling within
//! `[min_size, max_size]`, and usage statistics.

mod factory;
pub mod health;
pub mod maintenance;
pub mod pool;

pub use factory::{ConnectionFactory, DriverFactory};
pub use health::{
    HealthCheckResult, HealthChecker, HealthStatus, HealthThresholds, PingError, PingResult,
    ping_connection,
};
pub use maintenance::{MaintenanceConfig, MaintenanceHandle};
pub use pool::{
    CleanupOutcome, ConnectionId, ConnectionPool, Lease, LeaseId, PerformanceMetrics, PoolConfig,
    PoolHealth, PoolStats, PooledConnection, ScaleAction, ScalingPolicy,
};

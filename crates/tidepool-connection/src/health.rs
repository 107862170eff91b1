//! Health check functionality for pooled connections
//!
//! This module provides ping, latency classification and the liveness /
//! health predicates the pool applies on acquire, release and cleanup.
//!
//! # Example
//!
//! ```ignore
//! use tidepool_connection::health::{HealthChecker, ping_connection};
//!
//! let checker = HealthChecker::new(Duration::from_millis(100), Duration::from_secs(5));
//! if !checker.is_healthy(&*conn).await {
//!     // retire instead of recycling
//! }
//! ```

mod checker;
mod ping;
mod status;


pub use checker::{HealthCheckResult, HealthChecker};
pub use ping::{PingError, PingResult, ping_connection};
pub use status::{HealthStatus, HealthThresholds};

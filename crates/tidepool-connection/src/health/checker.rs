//! Liveness and latency checks applied by the pool

use std::time::{Duration, Instant};

use tidepool_core::Connection;

use super::ping::ping_connection;
use super::status::{HealthStatus, HealthThresholds};

/// Result of a single health check
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// The resulting health status
    pub status: HealthStatus,
    /// Latency of the ping, if successful
    pub latency: Option<Duration>,
    /// Error message if the check failed
    pub error: Option<String>,
    /// Timestamp of when the check was performed
    pub checked_at: Instant,
}

impl HealthCheckResult {
    /// Create a successful health check result.
    pub fn success(latency: Duration, thresholds: &HealthThresholds) -> Self {
        Self {
            status: HealthStatus::from_latency_with_thresholds(latency, thresholds),
            latency: Some(latency),
            error: None,
            checked_at: Instant::now(),
        }
    }

    /// Create a failed health check result.
    pub fn failure(error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency: None,
            error: Some(error),
            checked_at: Instant::now(),
        }
    }

    /// Whether the ping got an answer at all
    pub fn is_alive(&self) -> bool {
        self.latency.is_some()
    }
}

/// Decides whether a connection is alive, and whether it is fast enough to keep.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    thresholds: HealthThresholds,
    ping_timeout: Duration,
}

impl HealthChecker {
    /// Create a checker for the given latency budget and per-ping timeout.
    pub fn new(latency_budget: Duration, ping_timeout: Duration) -> Self {
        Self {
            thresholds: HealthThresholds::from_budget(latency_budget),
            ping_timeout,
        }
    }

    /// Get the classification thresholds.
    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Get the bound on a single ping.
    pub fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    /// Ping the connection and classify the outcome.
    pub async fn check(&self, conn: &dyn Connection) -> HealthCheckResult {
        match ping_connection(conn, self.ping_timeout).await {
            Ok(latency) => HealthCheckResult::success(latency, &self.thresholds),
            Err(e) => HealthCheckResult::failure(e.to_string()),
        }
    }

    /// True if the connection answers a ping at all.
    pub async fn is_alive(&self, conn: &dyn Connection) -> bool {
        let result = self.check(conn).await;
        if let Some(error) = &result.error {
            tracing::debug!(error = %error, "liveness check failed");
        }
        result.is_alive()
    }

    /// True if the connection answers within the latency budget.
    pub async fn is_healthy(&self, conn: &dyn Connection) -> bool {
        let result = self.check(conn).await;
        match (&result.error, result.latency) {
            (Some(error), _) => {
                tracing::debug!(error = %error, "health check failed");
                false
            }
            (None, Some(latency)) if !result.status.is_healthy() => {
                tracing::debug!(
                    latency_ms = latency.as_millis() as u64,
                    budget_ms = self.thresholds.healthy_threshold.as_millis() as u64,
                    "connection over latency budget"
                );
                false
            }
            _ => true,
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(5))
    }
}

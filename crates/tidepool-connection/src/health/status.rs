//! Health status classification
//!
//! Classifies connection health based on latency thresholds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health status of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Responds within the latency budget
    #[default]
    Healthy,
    /// Alive but slower than the budget; retired rather than recycled
    Degraded,
    /// Very high latency or not responding at all
    Unhealthy,
}

impl HealthStatus {
    /// Classify health status from latency using default thresholds.
    ///
    /// Default thresholds:
    /// - Healthy: <= 100ms
    /// - Degraded: 100ms - 500ms
    /// - Unhealthy: > 500ms
    ///
    /// # Example
    ///
    /// ```
    /// use tidepool_connection::health::HealthStatus;
    /// use std::time::Duration;
    ///
    /// let status = HealthStatus::from_latency(Duration::from_millis(50));
    /// assert_eq!(status, HealthStatus::Healthy);
    ///
    /// let status = HealthStatus::from_latency(Duration::from_millis(200));
    /// assert_eq!(status, HealthStatus::Degraded);
    /// ```
    pub fn from_latency(latency: Duration) -> Self {
        Self::from_latency_with_thresholds(latency, &HealthThresholds::default())
    }

    /// Classify health status from latency using custom thresholds.
    pub fn from_latency_with_thresholds(latency: Duration, thresholds: &HealthThresholds) -> Self {
        if latency <= thresholds.healthy_threshold {
            HealthStatus::Healthy
        } else if latency <= thresholds.degraded_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Both `Healthy` and `Degraded` connections still answer.
    pub fn is_usable(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Check if status is healthy.
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Thresholds for health status classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Maximum latency considered healthy
    pub healthy_threshold: Duration,
    /// Maximum latency considered degraded (above this is unhealthy)
    pub degraded_threshold: Duration,
}

impl HealthThresholds {
    /// Create new thresholds with the given values in milliseconds.
    pub fn new(healthy_ms: u64, degraded_ms: u64) -> Self {
        Self {
            healthy_threshold: Duration::from_millis(healthy_ms),
            degraded_threshold: Duration::from_millis(degraded_ms.max(healthy_ms)),
        }
    }

    /// Thresholds for a pool latency budget: anything over the budget is
    /// degraded, anything over five budgets is unhealthy.
    pub fn from_budget(budget: Duration) -> Self {
        Self {
            healthy_threshold: budget,
            degraded_threshold: budget.saturating_mul(5),
        }
    }
}

impl Default for HealthThresholds {
    /// Default thresholds: healthy <= 100ms, degraded <= 500ms
    fn default() -> Self {
        Self::new(100, 500)
    }
}

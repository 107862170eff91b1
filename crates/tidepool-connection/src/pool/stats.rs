//! Pool statistics types
//!
//! `PoolCounters` is the live, lock-free side mutated by the pool. `PoolStats`
//! and `PerformanceMetrics` are the serializable snapshots handed to callers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic counters for one pool instance
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    created: AtomicU64,
    reused: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
    leased_sample_sum: AtomicU64,
    leased_samples: AtomicU64,
}

impl PoolCounters {
    /// An acquisition was satisfied by a freshly opened connection
    pub(crate) fn record_created(&self, leased_now: usize) {
        self.created.fetch_add(1, Ordering::Relaxed);
        self.sample_leased(leased_now);
    }

    /// An acquisition was satisfied from the idle set
    pub(crate) fn record_reused(&self, leased_now: usize) {
        self.reused.fetch_add(1, Ordering::Relaxed);
        self.sample_leased(leased_now);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Any connection opened by the factory, for whatever reason
    pub(crate) fn record_opened(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Any connection retired by the pool
    pub(crate) fn record_closed(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    fn sample_leased(&self, leased_now: usize) {
        self.leased_sample_sum
            .fetch_add(leased_now as u64, Ordering::Relaxed);
        self.leased_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CounterSnapshot {
        let samples = self.leased_samples.load(Ordering::Relaxed);
        let avg_leased = if samples == 0 {
            0.0
        } else {
            self.leased_sample_sum.load(Ordering::Relaxed) as f64 / samples as f64
        };
        CounterSnapshot {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            opened: self.opened.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            avg_leased,
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct CounterSnapshot {
    pub created: u64,
    pub reused: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub opened: u64,
    pub closed: u64,
    pub avg_leased: f64,
}

impl CounterSnapshot {
    fn total_operations(&self) -> u64 {
        self.created + self.reused + self.errors + self.timeouts
    }
}

/// Pool occupancy observed under the pool lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Occupancy {
    pub current_size: usize,
    pub idle: usize,
    pub leased: usize,
}

/// Coarse health label derived from error/timeout rates and efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolHealth {
    Healthy,
    /// Working, but too many acquisitions are not clean reuses or creations
    Suboptimal,
    Degraded,
    Unhealthy,
}

impl PoolHealth {
    /// Classify from derived metrics.
    ///
    /// - Unhealthy: error or timeout rate above 10%
    /// - Degraded: error or timeout rate above 5%
    /// - Suboptimal: efficiency below 0.8
    pub fn classify(metrics: &PerformanceMetrics) -> Self {
        let worst = metrics.error_rate.max(metrics.timeout_rate);
        if worst > 0.10 {
            PoolHealth::Unhealthy
        } else if worst > 0.05 {
            PoolHealth::Degraded
        } else if metrics.efficiency < 0.8 {
            PoolHealth::Suboptimal
        } else {
            PoolHealth::Healthy
        }
    }
}

impl std::fmt::Display for PoolHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PoolHealth::Healthy => "healthy",
            PoolHealth::Suboptimal => "suboptimal",
            PoolHealth::Degraded => "degraded",
            PoolHealth::Unhealthy => "unhealthy",
        };
        f.write_str(label)
    }
}

/// Raw counters plus current occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Acquisitions satisfied by opening a new connection
    pub created: u64,
    /// Acquisitions satisfied from the idle set
    pub reused: u64,
    /// Failed queries and transactions
    pub errors: u64,
    /// Acquisitions that hit their deadline
    pub timeouts: u64,
    /// Connections opened for any reason (acquire, warm-up, scaling, cleanup)
    pub opened: u64,
    /// Connections retired for any reason
    pub closed: u64,
    pub current_size: usize,
    pub idle: usize,
    pub leased: usize,
    pub health: PoolHealth,
}

impl PoolStats {
    /// Total number of connections (idle + leased)
    pub fn total(&self) -> usize {
        self.idle + self.leased
    }

    /// Check if the pool has no idle connection left
    pub fn is_full(&self) -> bool {
        self.idle == 0 && self.current_size > 0
    }
}

/// Efficiency figures derived from the counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// leased / current_size, 0 for an empty pool
    pub utilization_rate: f64,
    pub reuse_rate: f64,
    pub error_rate: f64,
    pub timeout_rate: f64,
    pub efficiency: f64,
    /// Mean leased count sampled at every successful acquisition
    pub avg_leased: f64,
    pub recommended_size: usize,
    /// created + reused + errors + timeouts
    pub total_operations: u64,
}

impl PerformanceMetrics {
    pub(crate) fn compute(
        counters: &CounterSnapshot,
        occupancy: Occupancy,
        min_size: usize,
        max_size: usize,
    ) -> Self {
        let total = counters.total_operations();
        let ratio = |n: u64| {
            if total == 0 {
                0.0
            } else {
                n as f64 / total as f64
            }
        };

        let utilization_rate = if occupancy.current_size == 0 {
            0.0
        } else {
            occupancy.leased as f64 / occupancy.current_size as f64
        };

        // An untouched pool has wasted nothing.
        let efficiency = if total == 0 {
            1.0
        } else {
            let bonus = if counters.reused > 0 { 0.2 } else { 0.0 };
            (ratio(counters.created + counters.reused) + bonus).min(1.0)
        };

        let recommended = (counters.avg_leased * 1.5).ceil() as usize;

        Self {
            utilization_rate,
            reuse_rate: ratio(counters.reused),
            error_rate: ratio(counters.errors),
            timeout_rate: ratio(counters.timeouts),
            efficiency,
            avg_leased: counters.avg_leased,
            recommended_size: recommended.clamp(min_size, max_size),
            total_operations: total,
        }
    }
}

impl PoolStats {
    pub(crate) fn build(counters: &CounterSnapshot, occupancy: Occupancy, health: PoolHealth) -> Self {
        Self {
            created: counters.created,
            reused: counters.reused,
            errors: counters.errors,
            timeouts: counters.timeouts,
            opened: counters.opened,
            closed: counters.closed,
            current_size: occupancy.current_size,
            idle: occupancy.idle,
            leased: occupancy.leased,
            health,
        }
    }
}

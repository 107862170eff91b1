//! Pool configuration types

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tidepool_core::{ConnectionParams, Result, TidepoolError};

use super::scaling::ScalingPolicy;

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_latency_budget_ms() -> u64 {
    100
}

fn default_health_check_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

/// Configuration for a connection pool
///
/// Controls pool sizing, timeouts, connection lifecycle and where new
/// connections are opened. Immutable once the pool is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Minimum number of connections to maintain in the pool
    min_size: usize,
    /// Maximum number of connections allowed in the pool
    max_size: usize,
    /// Default timeout in milliseconds when acquiring a connection
    #[serde(default = "default_acquire_timeout_ms")]
    acquire_timeout_ms: u64,
    /// Upper bound between re-checks while an acquire is waiting
    #[serde(default = "default_poll_interval_ms")]
    acquire_poll_interval_ms: u64,
    /// Ping latency above which a connection is retired instead of recycled
    #[serde(default = "default_latency_budget_ms")]
    health_latency_budget_ms: u64,
    /// Hard bound on any single ping or close
    #[serde(default = "default_health_check_timeout_ms")]
    health_check_timeout_ms: u64,
    /// Hard bound on opening one connection
    #[serde(default = "default_connect_timeout_ms")]
    connect_timeout_ms: u64,
    /// Timeout in milliseconds before an idle connection is closed
    #[serde(default)]
    idle_timeout_ms: Option<u64>,
    /// Maximum lifetime of a connection in milliseconds before it's recycled
    #[serde(default)]
    max_lifetime_ms: Option<u64>,
    #[serde(default)]
    scaling: ScalingPolicy,
    /// Backend the factory connects to
    #[serde(default)]
    connection: ConnectionParams,
}

impl PoolConfig {
    /// Create a new pool configuration with the given min and max sizes
    ///
    /// # Panics
    ///
    /// Panics if `min_size > max_size` or if `max_size` is 0.
    pub fn new(min_size: usize, max_size: usize) -> Self {
        assert!(
            max_size > 0,
            "max_size must be greater than 0, got {}",
            max_size
        );
        assert!(
            min_size <= max_size,
            "min_size ({}) cannot exceed max_size ({})",
            min_size,
            max_size
        );

        Self {
            min_size,
            max_size,
            acquire_timeout_ms: default_acquire_timeout_ms(),
            acquire_poll_interval_ms: default_poll_interval_ms(),
            health_latency_budget_ms: default_latency_budget_ms(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_ms: None,
            max_lifetime_ms: None,
            scaling: ScalingPolicy::default(),
            connection: ConnectionParams::default(),
        }
    }

    /// Parse and validate a configuration from TOML
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: PoolConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loaded pool configuration file");
        Self::from_toml_str(&source)
    }

    /// Check the sizing and timing constraints a deserialized config may violate
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(TidepoolError::Configuration(
                "max_size must be greater than 0".into(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(TidepoolError::Configuration(format!(
                "min_size ({}) cannot exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.acquire_poll_interval_ms == 0 {
            return Err(TidepoolError::Configuration(
                "acquire_poll_interval_ms must be greater than 0".into(),
            ));
        }
        if self.health_check_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(TidepoolError::Configuration(
                "health_check_timeout_ms and connect_timeout_ms must be greater than 0".into(),
            ));
        }
        self.scaling.validate()
    }

    /// Replace the size bounds. Unlike `new` this does not panic; run
    /// `validate` afterwards.
    pub fn with_sizes(mut self, min_size: usize, max_size: usize) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    /// Set the default acquire timeout in milliseconds
    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    /// Set the acquire re-check interval in milliseconds
    pub fn with_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.acquire_poll_interval_ms = interval_ms.max(1);
        self
    }

    /// Set the ping latency budget in milliseconds
    pub fn with_latency_budget_ms(mut self, budget_ms: u64) -> Self {
        self.health_latency_budget_ms = budget_ms;
        self
    }

    /// Set the bound on a single ping or close in milliseconds
    pub fn with_health_check_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.health_check_timeout_ms = timeout_ms.max(1);
        self
    }

    /// Set the connect timeout in milliseconds
    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms.max(1);
        self
    }

    /// Set the idle timeout in milliseconds
    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the maximum connection lifetime in milliseconds
    pub fn with_max_lifetime_ms(mut self, lifetime_ms: u64) -> Self {
        self.max_lifetime_ms = Some(lifetime_ms);
        self
    }

    /// Set the auto-scaling thresholds
    pub fn with_scaling(mut self, scaling: ScalingPolicy) -> Self {
        self.scaling = scaling;
        self
    }

    /// Set the backend connection parameters
    pub fn with_connection(mut self, connection: ConnectionParams) -> Self {
        self.connection = connection;
        self
    }

    /// Get the minimum pool size
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Get the maximum pool size
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of connections `warm_up` aims for
    pub fn warm_target(&self) -> usize {
        self.max_size.min(self.min_size.saturating_mul(2))
    }

    /// Get the default acquire timeout as a Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Get the acquire re-check interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.acquire_poll_interval_ms.max(1))
    }

    /// Get the health latency budget as a Duration
    pub fn latency_budget(&self) -> Duration {
        Duration::from_millis(self.health_latency_budget_ms)
    }

    /// Get the per-check timeout as a Duration
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    /// Get the connect timeout as a Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get the idle timeout as a Duration if set
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// Get the maximum lifetime as a Duration if set
    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_ms.map(Duration::from_millis)
    }

    /// Get the auto-scaling thresholds
    pub fn scaling(&self) -> &ScalingPolicy {
        &self.scaling
    }

    /// Get the backend connection parameters
    pub fn connection(&self) -> &ConnectionParams {
        &self.connection
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - min_size: 1
    /// - max_size: 10
    /// - acquire_timeout: 30 seconds
    /// - poll interval: 10ms
    /// - latency budget: 100ms
    /// - idle_timeout / max_lifetime: None
    fn default() -> Self {
        Self::new(1, 10)
    }
}

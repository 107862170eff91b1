//! The `tidepool` configuration file
//!
//! ```toml
//! [pool]
//! min_size = 2
//! max_size = 10
//!
//! [pool.connection]
//! driver = "sim"
//!
//! [maintenance]
//! scale_interval_ms = 1000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tidepool_connection::{MaintenanceConfig, PoolConfig};
use tidepool_core::{Result, TidepoolError};

/// Drivers this binary can open connections with
const SUPPORTED_DRIVERS: &[&str] = &["sim"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

impl Settings {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Apply `--min`/`--max`; whatever is not given keeps its configured value
    pub fn with_size_overrides(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        if min.is_some() || max.is_some() {
            let min = min.unwrap_or(self.pool.min_size());
            let max = max.unwrap_or(self.pool.max_size());
            self.pool = self.pool.with_sizes(min, max);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        let driver = self.pool.connection().driver.as_str();
        if !driver.is_empty() && !SUPPORTED_DRIVERS.contains(&driver) {
            return Err(TidepoolError::NotSupported(format!(
                "driver {:?} (supported: {})",
                driver,
                SUPPORTED_DRIVERS.join(", ")
            )));
        }
        Ok(())
    }

    /// Copy safe to print: the password is masked
    pub fn redacted(&self) -> Self {
        let mut connection = self.pool.connection().clone();
        if connection.password.is_some() {
            connection.password = Some("********".to_string());
        }
        Self {
            pool: self.pool.clone().with_connection(connection),
            maintenance: self.maintenance.clone(),
        }
    }
}

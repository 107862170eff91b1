//! Utilization-driven sizing decisions

use serde::{Deserialize, Serialize};
use tidepool_core::{Result, TidepoolError};

/// Thresholds that drive `auto_scale`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingPolicy {
    /// Grow when utilization rises strictly above this
    pub high_watermark: f64,
    /// Shrink when utilization falls strictly below this
    pub low_watermark: f64,
    /// Most connections added per pass
    pub grow_step: usize,
    /// Most idle connections removed per pass
    pub shrink_step: usize,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            high_watermark: 0.8,
            low_watermark: 0.3,
            grow_step: 2,
            shrink_step: 1,
        }
    }
}

impl ScalingPolicy {
    pub(crate) fn validate(&self) -> Result<()> {
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_range(self.high_watermark) || !in_range(self.low_watermark) {
            return Err(TidepoolError::Configuration(
                "scaling watermarks must be within 0.0..=1.0".into(),
            ));
        }
        if self.low_watermark > self.high_watermark {
            return Err(TidepoolError::Configuration(format!(
                "low_watermark ({}) cannot exceed high_watermark ({})",
                self.low_watermark, self.high_watermark
            )));
        }
        Ok(())
    }

    /// Decide what one scaling pass should do.
    ///
    /// `capacity` is how many more connections may be opened right now
    /// (max size minus current size minus creations already in flight).
    pub fn decide(&self, snapshot: &ScalingInput) -> ScaleAction {
        let utilization = snapshot.utilization();

        if utilization > self.high_watermark && snapshot.current < snapshot.max {
            let add = self.grow_step.min(snapshot.capacity);
            if add > 0 {
                return ScaleAction::Grow(add);
            }
        } else if utilization < self.low_watermark && snapshot.current > snapshot.min {
            let remove = self
                .shrink_step
                .min(snapshot.current - snapshot.min)
                .min(snapshot.idle);
            if remove > 0 {
                return ScaleAction::Shrink(remove);
            }
        }

        ScaleAction::Hold
    }
}

/// Pool occupancy observed at the start of a scaling pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingInput {
    pub leased: usize,
    pub idle: usize,
    pub current: usize,
    pub capacity: usize,
    pub min: usize,
    pub max: usize,
}

impl ScalingInput {
    /// Fraction of the pool leased out; 0 for an empty pool
    pub fn utilization(&self) -> f64 {
        if self.current == 0 {
            0.0
        } else {
            self.leased as f64 / self.current as f64
        }
    }
}

/// Outcome of a scaling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    /// Open this many connections into the idle set
    Grow(usize),
    /// Close this many idle connections
    Shrink(usize),
    Hold,
}

//! Background maintenance for a shared pool
//!
//! The pool owns no timer. This task drives `cleanup` and `auto_scale` on
//! their own intervals, off the request path, until stopped or until the
//! pool shuts down.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::pool::{ConnectionPool, ScaleAction};

/// How often the maintenance task runs each pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub cleanup_interval_ms: u64,
    pub scale_interval_ms: u64,
}

impl Default for MaintenanceConfig {
    /// Cleanup every 5 minutes, scaling every 30 seconds
    fn default() -> Self {
        Self {
            cleanup_interval_ms: 300_000,
            scale_interval_ms: 30_000,
        }
    }
}

impl MaintenanceConfig {
    pub fn new(cleanup_interval: Duration, scale_interval: Duration) -> Self {
        Self {
            cleanup_interval_ms: cleanup_interval.as_millis() as u64,
            scale_interval_ms: scale_interval.as_millis() as u64,
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms.max(1))
    }

    pub fn scale_interval(&self) -> Duration {
        Duration::from_millis(self.scale_interval_ms.max(1))
    }
}

/// Handle to a running maintenance task
///
/// Dropping the handle stops the task at its next wake-up.
pub struct MaintenanceHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Whether the task has already exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the task to stop and wait for the pass in progress to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "maintenance task ended abnormally");
        }
    }
}

/// Start the maintenance task for `pool` on the current tokio runtime.
pub fn spawn(pool: Arc<ConnectionPool>, config: MaintenanceConfig) -> MaintenanceHandle {
    let (stop, mut stopped) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut cleanup = tokio::time::interval_at(
            Instant::now() + config.cleanup_interval(),
            config.cleanup_interval(),
        );
        let mut scale = tokio::time::interval_at(
            Instant::now() + config.scale_interval(),
            config.scale_interval(),
        );
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);
        scale.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            cleanup_interval_ms = config.cleanup_interval_ms,
            scale_interval_ms = config.scale_interval_ms,
            "pool maintenance started"
        );

        loop {
            tokio::select! {
                _ = stopped.changed() => break,
                _ = cleanup.tick() => {
                    let outcome = pool.cleanup().await;
                    if outcome.retired > 0 || outcome.opened > 0 {
                        tracing::info!(retired = outcome.retired, opened = outcome.opened, "cleanup replaced connections");
                    }
                }
                _ = scale.tick() => {
                    if let action @ (ScaleAction::Grow(_) | ScaleAction::Shrink(_)) = pool.auto_scale().await {
                        tracing::debug!(?action, "auto-scale applied");
                    }
                }
            }

            if pool.is_closed() {
                break;
            }
        }

        tracing::info!("pool maintenance stopped");
    });

    MaintenanceHandle { stop, task }
}

//! Health poller: the host→container half of bidirectional coupling.
//!
//! The event watcher only hears what the Docker daemon tells it; a
//! supervised process that crashes on its own produces no container event.
//! This loop reconciles on a fixed interval: container up + process down →
//! restart. When the container itself is gone the loop ends cleanly —
//! there is nothing left to supervise.
//!
//! Each cycle is panic-isolated so an unexpected panic degrades to a missed
//! tick instead of silently ending supervision.

use crate::docker::ContainerStatus;
use crate::healthcheck::HealthChecker;
use crate::supervisor::{Lifecycle, StartOutcome};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why the poll loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerExit {
    /// The container is no longer running; supervision is over.
    ContainerGone,
    /// The parent asked us to stop.
    Cancelled,
}

enum CycleOutcome {
    Healthy,
    Restarted,
    RestartFailed,
    ContainerGone,
}

/// Run the poll loop. The first cycle fires one full `interval` after
/// entry; start-up reconciliation is the coupler's job, not ours.
pub async fn run_health_poller(
    interval: Duration,
    container: Arc<dyn ContainerStatus>,
    lifecycle: Arc<dyn Lifecycle>,
    checker: Arc<dyn HealthChecker>,
    cancel: CancellationToken,
) -> PollerExit {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Health poller cancelled");
                return PollerExit::Cancelled;
            }
            _ = ticker.tick() => {
                let cycle = AssertUnwindSafe(poll_cycle(&*container, &*lifecycle, &*checker))
                    .catch_unwind()
                    .await;
                match cycle {
                    Ok(CycleOutcome::ContainerGone) => {
                        tracing::info!("Container is not running; health poller exiting");
                        return PollerExit::ContainerGone;
                    }
                    Ok(_) => {}
                    Err(panic_info) => {
                        let msg = panic_info
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic_info.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        tracing::error!(
                            "Health poll cycle panicked: {}. Continuing supervision...",
                            msg
                        );
                    }
                }
            }
        }
    }
}

async fn poll_cycle(
    container: &dyn ContainerStatus,
    lifecycle: &dyn Lifecycle,
    checker: &dyn HealthChecker,
) -> CycleOutcome {
    if !container.is_running().await {
        return CycleOutcome::ContainerGone;
    }

    if checker.check().await.unwrap_or(false) {
        tracing::trace!("Supervised process healthy");
        return CycleOutcome::Healthy;
    }

    tracing::warn!("Supervised process is down while container is running; restarting");
    match lifecycle.start().await {
        Ok(StartOutcome::Started(pid)) => {
            tracing::info!("Restarted supervised process (PID {})", pid);
            CycleOutcome::Restarted
        }
        Ok(StartOutcome::AlreadyRunning(pid)) => {
            // Raced with the event watcher; fine either way.
            tracing::debug!("Supervised process already back (PID {})", pid);
            CycleOutcome::Restarted
        }
        Err(e) => {
            tracing::error!("Restart failed: {} (will retry next tick)", e);
            CycleOutcome::RestartFailed
        }
    }
}

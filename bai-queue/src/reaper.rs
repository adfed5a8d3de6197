use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::QueueService;
use crate::QueueResult;

/// Periodic housekeeping: reclaims expired leases and purges finished jobs
/// past retention
pub struct LeaseReaper {
    service: Arc<QueueService>,
    interval: Duration,
}

/// What one reaper cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub reclaimed: usize,
    pub purged: usize,
}

impl LeaseReaper {
    /// Reaper running every `reaper_interval` of the service's config
    pub fn new(service: Arc<QueueService>) -> Self {
        let interval = service.config().reaper_interval;
        Self { service, interval }
    }

    pub fn with_interval(service: Arc<QueueService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Run until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting lease reaper with interval: {:?}", self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(report) if report.reclaimed > 0 || report.purged > 0 => {
                    info!(
                        "Reaper reclaimed {} expired leases, purged {} finished jobs",
                        report.reclaimed, report.purged
                    );
                }
                Ok(_) => debug!("No expired leases found"),
                Err(e) => warn!("Error during lease reaping: {}", e),
            }
        }

        info!("Lease reaper stopped");
    }

    /// Run one reaper cycle
    pub async fn tick(&self) -> QueueResult<ReapReport> {
        let reclaimed = self.service.reclaim_expired().await?;
        let purged = self.service.purge_expired().await?;
        Ok(ReapReport { reclaimed, purged })
    }
}

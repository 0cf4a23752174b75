use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::host::Host;

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub ok: usize,
    pub failed: usize,
}

/// Probes the whole fleet once per period, every host in parallel.
pub struct HealthMonitor {
    hosts: Vec<Arc<Host>>,
    period: Duration,
}

impl HealthMonitor {
    pub fn new(hosts: Vec<Arc<Host>>, period: Duration) -> Self {
        Self { hosts, period }
    }

    /// One concurrent probe of every host. A failing or panicking host is logged
    /// and counted; it never cuts the sweep short for the others.
    pub async fn sweep(&self) -> SweepReport {
        let mut set = JoinSet::new();
        for host in &self.hosts {
            let host = Arc::clone(host);
            set.spawn(async move {
                let result = host.probe().await;
                (host.id().to_string(), result)
            });
        }

        let mut report = SweepReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.ok += 1,
                Ok((host_id, Err(e))) => {
                    error!("[monitor] host {} failed its cycle: {}", host_id, e);
                    report.failed += 1;
                }
                Err(e) => {
                    error!("[monitor] probe task aborted: {}", e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Sweep forever. Ticks are scheduled from the clock: a slow sweep delays the
    /// next one instead of shifting every later tick.
    pub async fn run(self) {
        info!("[monitor] watching {} hosts every {:?}", self.hosts.len(), self.period);
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let report = self.sweep().await;
            debug!("[monitor] sweep done: {} ok, {} failed", report.ok, report.failed);
        }
    }

    pub fn spawn(self) -> task::JoinHandle<()> {
        task::spawn(self.run())
    }
}

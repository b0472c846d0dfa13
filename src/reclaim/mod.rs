//! Periodic removal of expired and long-unused links
//!
//! A pass first deletes every expired link, then every link whose last access
//! (or creation, if never accessed) is older than the configured threshold.
//! The two conditions are independent; either is enough. Failures are logged
//! and counted, and never stop the pass or the schedule.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::links::LinkManager;
use crate::models::{unix_now, Link};

/// Result of one reclamation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Expired links deleted
    pub expired: usize,
    /// Unused links deleted
    pub unused: usize,
    /// Queries or deletes that failed
    pub failed: usize,
}

impl ReclaimReport {
    pub fn reclaimed(&self) -> usize {
        self.expired + self.unused
    }
}

pub struct Reclaimer {
    manager: Arc<LinkManager>,
    unused_threshold: Option<Duration>,
}

impl Reclaimer {
    /// `unused_threshold: None` disables the unused pass
    pub fn new(manager: Arc<LinkManager>, unused_threshold: Option<Duration>) -> Self {
        Self {
            manager,
            unused_threshold,
        }
    }

    pub async fn run_once(&self, now: i64) -> ReclaimReport {
        let mut report = ReclaimReport::default();

        match self.manager.list_expired_at(now).await {
            Ok(links) => {
                let (deleted, failed) = self.delete_all(&links, "expired").await;
                report.expired = deleted;
                report.failed += failed;
            }
            Err(e) => {
                error!(error = %e, "failed to query expired links");
                report.failed += 1;
            }
        }

        if let Some(threshold) = self.unused_threshold {
            match self.manager.list_unused(threshold, now).await {
                Ok(links) => {
                    let (deleted, failed) = self.delete_all(&links, "unused").await;
                    report.unused = deleted;
                    report.failed += failed;
                }
                Err(e) => {
                    error!(error = %e, "failed to query unused links");
                    report.failed += 1;
                }
            }
        }

        report
    }

    async fn delete_all(&self, links: &[Link], reason: &'static str) -> (usize, usize) {
        let mut deleted = 0;
        let mut failed = 0;

        for link in links {
            match self.manager.delete(&link.code).await {
                Ok(true) => {
                    debug!(code = %link.code, reason, "reclaimed link");
                    deleted += 1;
                }
                // Removed concurrently by a request or an earlier pass
                Ok(false) => {}
                Err(e) => {
                    warn!(code = %link.code, reason, error = %e, "failed to reclaim link");
                    failed += 1;
                }
            }
        }

        (deleted, failed)
    }

    /// Run a pass now and then every `interval` until stopped
    pub fn spawn(self: Arc<Self>, interval: Duration) -> ReclaimHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => break,
                }

                let report = self.run_once(unix_now()).await;
                if report.reclaimed() > 0 || report.failed > 0 {
                    info!(
                        expired = report.expired,
                        unused = report.unused,
                        failed = report.failed,
                        "reclamation pass finished"
                    );
                } else {
                    debug!("reclamation pass found nothing to remove");
                }

                if *stop_rx.borrow() {
                    break;
                }
            }

            info!("reclamation scheduler stopped");
        });

        ReclaimHandle { stop_tx, task }
    }
}

/// Handle to a running scheduler
pub struct ReclaimHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReclaimHandle {
    /// Signal the scheduler and wait for an in-flight pass to finish
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "reclamation task failed");
        }
    }
}

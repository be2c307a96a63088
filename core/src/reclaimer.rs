use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::saturating_sub;
use crate::coordinator::EngineShared;

/// What one reclaim pass evicted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct ReclaimReport {
    pub histories: usize,
    pub blocks: usize,
    pub buckets: usize,
    pub windows: usize,
    /// The pass stopped early because shutdown was requested.
    pub cancelled: bool,
}

impl ReclaimReport {
    pub fn total(&self) -> usize {
        self.histories + self.blocks + self.buckets + self.windows
    }
}

/// One eviction pass over every store.
///
/// Candidate keys are collected first; each is then removed under its shard
/// lock only if it is still stale, so traffic that touched an identity after
/// the snapshot keeps its state. `is_cancelled` is polled between keys.
pub(crate) fn reclaim_pass(
    shared: &EngineShared,
    now: DateTime<Utc>,
    is_cancelled: impl Fn() -> bool,
) -> ReclaimReport {
    let mut report = ReclaimReport::default();
    let horizon = saturating_sub(now, shared.config.retention());

    let stale_histories: Vec<String> = shared
        .histories
        .iter()
        .filter(|entry| entry.value().newest().is_none_or(|newest| newest < horizon))
        .map(|entry| entry.key().clone())
        .collect();
    for identity in stale_histories {
        if is_cancelled() {
            report.cancelled = true;
            return report;
        }
        let removed = shared.histories.remove_if(&identity, |_, history| {
            history.newest().is_none_or(|newest| newest < horizon)
        });
        if removed.is_some() {
            report.histories += 1;
        }
    }

    for identity in shared.blocklist.expired_keys(now) {
        if is_cancelled() {
            report.cancelled = true;
            return report;
        }
        if shared.blocklist.remove_if_expired(&identity, now) {
            report.blocks += 1;
        }
    }

    let stale_buckets: Vec<String> = shared
        .buckets
        .iter()
        .filter(|entry| entry.value().last_refill() < horizon)
        .map(|entry| entry.key().clone())
        .collect();
    for identity in stale_buckets {
        if is_cancelled() {
            report.cancelled = true;
            return report;
        }
        let removed = shared
            .buckets
            .remove_if(&identity, |_, bucket| bucket.last_refill() < horizon);
        if removed.is_some() {
            report.buckets += 1;
        }
    }

    for key in shared.windows.stale_keys(horizon) {
        if is_cancelled() {
            report.cancelled = true;
            return report;
        }
        if shared.windows.remove_if_stale(&key, horizon) {
            report.windows += 1;
        }
    }

    report
}

/// Handle to the periodic reclaim task. Dropping it requests shutdown.
pub(crate) struct ReclaimerHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ReclaimerHandle {
    pub(crate) fn spawn(shared: Arc<EngineShared>) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = shared.config.reclaim_interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; nothing is stale at startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = shared.clock.now();
                        let cancel = shutdown_rx.clone();
                        let report = reclaim_pass(&shared, now, || *cancel.borrow());
                        if report.total() > 0 {
                            tracing::info!(
                                histories = report.histories,
                                blocks = report.blocks,
                                buckets = report.buckets,
                                windows = report.windows,
                                "reclaimed stale admission state"
                            );
                        } else {
                            tracing::debug!("reclaim pass found nothing stale");
                        }
                        if report.cancelled {
                            break;
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("admission reclaimer stopped");
        });

        Self {
            shutdown,
            task: Some(task),
        }
    }

    /// Requests shutdown and waits for the task to finish.
    pub(crate) async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            tracing::warn!(error = %err, "admission reclaimer task ended abnormally");
        }
    }
}

impl Drop for ReclaimerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

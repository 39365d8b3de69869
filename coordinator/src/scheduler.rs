use crate::channel::TaskChannel;
use crate::store::SessionStore;
use log::{debug, error, info};
use shared::task::TaskMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub queued: usize,
    pub failed: usize,
}

/// Periodic driver that queues one advance task per running session.
pub struct TickScheduler {
    store: Arc<SessionStore>,
    channel: Arc<TaskChannel>,
    period: Duration,
}

impl TickScheduler {
    pub fn new(store: Arc<SessionStore>, channel: Arc<TaskChannel>, period: Duration) -> Self {
        Self {
            store,
            channel,
            period,
        }
    }

    /// Queues a task for every non-terminal session.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        for snapshot in self.store.active_snapshots().await {
            let session_id = snapshot.id.clone();
            match self.channel.publish(&TaskMessage::advance(snapshot)) {
                Ok(()) => report.queued += 1,
                Err(e) => {
                    error!("Could not queue tick task for session {}: {}", session_id, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Ticks every period until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The first tick fires immediately
        ticker.tick().await;
        info!("Tick scheduler started ({:?} period)", self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report.queued > 0 || report.failed > 0 {
                        debug!("Tick queued {} task(s), {} failed", report.queued, report.failed);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Tick scheduler stopped");
    }
}

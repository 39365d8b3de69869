//! One task consumer: fetch, advance, submit, settle, repeat.
//!
//! Settlement policy:
//! - result merged (updated or stale): ack
//! - session unknown to the coordinator: ack and drop
//! - malformed payload or result refused as invalid: nack without requeue
//! - any other refusal: nack with requeue
//! - link failure or submit timeout: drop the link, the coordinator
//!   requeues everything this consumer still held
//!
//! A stop request is honoured between fetches. A fetch already on the wire
//! is allowed to finish and whatever it returns is settled first, since
//! every delivery has already used up one of the task's attempts.

use crate::connection::CoordinatorLink;
use crate::config::{WorkerConfig, MAX_BACKOFF};
use crate::error::WorkerError;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::engine::advance;
use shared::protocol::{Delivery, ErrorKind, MergeOutcome};
use shared::task::TaskMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

/// Totals shared by every consumer of a pool.
#[derive(Debug, Default)]
pub struct PoolCounters {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl PoolCounters {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Consumer {
    id: usize,
    config: Arc<WorkerConfig>,
    prefetch: watch::Receiver<u32>,
    stop: watch::Receiver<bool>,
    counters: Arc<PoolCounters>,
    rng: StdRng,
}

impl Consumer {
    pub fn new(
        id: usize,
        config: Arc<WorkerConfig>,
        prefetch: watch::Receiver<u32>,
        stop: watch::Receiver<bool>,
        counters: Arc<PoolCounters>,
    ) -> Self {
        Self {
            id,
            config,
            prefetch,
            stop,
            counters,
            rng: StdRng::from_entropy(),
        }
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Sleeps for `delay` unless told to stop first. Returns true when
    /// stopped.
    async fn pause(&mut self, delay: Duration) -> bool {
        let interrupted = tokio::select! {
            _ = sleep(delay) => false,
            _ = self.stop.changed() => true,
        };
        interrupted || self.stopped()
    }

    /// Runs until stopped, reconnecting with backoff whenever the link fails.
    pub async fn run(mut self) {
        let mut backoff = self.config.reconnect_backoff;
        debug!("Consumer {} started", self.id);

        while !self.stopped() {
            let mut link = match CoordinatorLink::connect(&self.config.coordinator).await {
                Ok(link) => link,
                Err(e) => {
                    warn!("Consumer {} could not connect: {}", self.id, e);
                    if self.pause(backoff).await {
                        break;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };
            backoff = self.config.reconnect_backoff;

            match self.serve(&mut link).await {
                Ok(()) => break,
                Err(e) => {
                    warn!("Consumer {} lost its link: {}", self.id, e);
                    if self.pause(backoff).await {
                        break;
                    }
                }
            }
        }

        debug!("Consumer {} stopped", self.id);
    }

    /// Processes deliveries until stopped. Returns an error when the link has
    /// to be dropped.
    async fn serve(&mut self, link: &mut CoordinatorLink) -> Result<(), WorkerError> {
        loop {
            if self.stopped() {
                return Ok(());
            }

            let prefetch = (*self.prefetch.borrow()).max(1);
            let limit = self.config.poll_wait + self.config.task_timeout;
            let deliveries = timeout(limit, link.fetch(prefetch, self.config.poll_wait))
                .await
                .unwrap_or(Err(WorkerError::Timeout(limit)))?;

            for delivery in deliveries {
                self.process(link, delivery).await?;
            }
        }
    }

    async fn process(
        &mut self,
        link: &mut CoordinatorLink,
        delivery: Delivery,
    ) -> Result<(), WorkerError> {
        let tag = delivery.delivery_tag;
        if delivery.redelivered {
            debug!(
                "Task {} redelivered, attempt {}",
                delivery.correlation_id, delivery.attempt
            );
        }

        let task = match decode(&delivery) {
            Ok(task) => task,
            Err(e) => {
                warn!("Rejecting task {}: {}", delivery.correlation_id, e);
                self.counters.record_failed();
                return link.nack(tag, false).await;
            }
        };

        let next = advance(&task.state_snapshot, &mut self.rng);
        let terminal = next.terminal;
        let task_timeout = self.config.task_timeout;
        let submitted = timeout(task_timeout, link.submit_result(&task.session_id, next))
            .await
            .unwrap_or(Err(WorkerError::Timeout(task_timeout)));

        match submitted {
            Ok(outcome) => {
                match outcome {
                    MergeOutcome::Updated if terminal => {
                        info!("Session {} reached a terminal state", task.session_id)
                    }
                    MergeOutcome::Updated => {
                        debug!("Task {} merged into {}", task.task_id, task.session_id)
                    }
                    MergeOutcome::Stale => debug!("Task {} was stale", task.task_id),
                }
                link.ack(tag).await?;
                self.counters.record_processed();
            }
            Err(WorkerError::Rejected {
                kind: ErrorKind::NotFound,
                message,
            }) => {
                warn!("Dropping task {}: {}", task.task_id, message);
                link.ack(tag).await?;
                self.counters.record_processed();
            }
            Err(WorkerError::Rejected {
                kind: ErrorKind::BadRequest,
                message,
            }) => {
                warn!("Result for task {} refused: {}", task.task_id, message);
                self.counters.record_failed();
                link.nack(tag, false).await?;
            }
            Err(e) if e.breaks_link() => {
                self.counters.record_failed();
                return Err(e);
            }
            Err(e) => {
                warn!("Task {} failed, requeueing: {}", task.task_id, e);
                self.counters.record_failed();
                link.nack(tag, true).await?;
            }
        }
        Ok(())
    }
}

fn decode(delivery: &Delivery) -> Result<TaskMessage, WorkerError> {
    Ok(TaskMessage::from_json(&delivery.payload)?)
}

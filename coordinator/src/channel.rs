//! Task channel: an at-least-once queue of advance tasks.
//!
//! Producers publish JSON task payloads. Consumers pull deliveries, holding
//! at most `prefetch` unsettled deliveries each, and settle every delivery
//! with an ack or a nack. Nacked deliveries are requeued until they run out
//! of attempts, then dead-lettered. Deliveries held by a consumer that goes
//! away are requeued. The channel does not deduplicate, so one task may be
//! delivered more than once.

use crate::error::CoordinatorError;
use crate::journal::{Envelope, Journal, Record};
use log::{debug, info, warn};
use shared::protocol::{Delivery, QueueStats};
use shared::task::TaskMessage;
use shared::TaskId;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

pub type ConsumerId = u64;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub max_attempts: u32,
    pub journal_path: Option<PathBuf>,
    pub sync_journal: bool,
    /// Settled tasks between journal rewrites.
    pub compact_after: usize,
}

struct Unacked {
    consumer: ConsumerId,
    envelope: Envelope,
}

struct QueueState {
    ready: VecDeque<Envelope>,
    unacked: HashMap<u64, Unacked>,
    dead_lettered: Vec<Envelope>,
    journal: Option<Journal>,
    next_tag: u64,
    closed: bool,
}

impl QueueState {
    fn record(&mut self, record: &Record) -> std::io::Result<()> {
        match self.journal.as_mut() {
            Some(journal) => journal.append(record),
            None => Ok(()),
        }
    }

    /// Rewrites the journal down to the tasks still owed once it has
    /// collected enough settled records. In-flight tasks come first, in the
    /// order they were handed out.
    fn compact_if_needed(&mut self) {
        let Some(journal) = self.journal.as_mut() else {
            return;
        };
        if !journal.needs_compaction() {
            return;
        }

        let mut in_flight: Vec<(&u64, &Unacked)> = self.unacked.iter().collect();
        in_flight.sort_unstable_by_key(|(tag, _)| **tag);
        let live = in_flight
            .into_iter()
            .map(|(_, unacked)| &unacked.envelope)
            .chain(self.ready.iter());

        match journal.compact(live, &self.dead_lettered) {
            Ok(()) => debug!("Compacted journal {}", journal.path().display()),
            Err(e) => warn!("Could not compact journal {}: {}", journal.path().display(), e),
        }
    }

    fn take_unacked(&mut self, consumer: ConsumerId, tag: u64) -> Result<Envelope, CoordinatorError> {
        match self.unacked.remove(&tag) {
            Some(unacked) if unacked.consumer == consumer => Ok(unacked.envelope),
            Some(unacked) => {
                self.unacked.insert(tag, unacked);
                Err(CoordinatorError::UnknownDelivery(tag))
            }
            None => Err(CoordinatorError::UnknownDelivery(tag)),
        }
    }

    /// Requeues or dead-letters an envelope that was not acknowledged.
    /// Returns true when it went back to the ready queue.
    fn settle_failed(&mut self, envelope: Envelope, requeue: bool, max_attempts: u32) -> bool {
        if requeue && envelope.attempts < max_attempts {
            self.ready.push_back(envelope);
            return true;
        }

        warn!(
            "Dead-lettering task {} after {} attempt(s)",
            envelope.correlation_id, envelope.attempts
        );
        let record = Record::DeadLettered {
            correlation_id: envelope.correlation_id.clone(),
        };
        if let Err(e) = self.record(&record) {
            warn!("Could not journal dead letter {}: {}", envelope.correlation_id, e);
        }
        self.dead_lettered.push(envelope);
        false
    }
}

pub struct TaskChannel {
    state: Mutex<QueueState>,
    notify: Notify,
    max_attempts: u32,
    next_consumer: AtomicU64,
}

impl TaskChannel {
    /// Opens the channel, recovering unsettled tasks from the journal if one
    /// is configured.
    pub fn open(config: &ChannelConfig) -> Result<Self, CoordinatorError> {
        let channel = Self::in_memory(config.max_attempts);

        if let Some(path) = &config.journal_path {
            let (journal, recovered) =
                Journal::open(path, config.sync_journal, config.compact_after)?;
            info!(
                "Journal {} recovered {} pending and {} dead-lettered task(s)",
                path.display(),
                recovered.ready.len(),
                recovered.dead_lettered.len()
            );

            let mut state = channel.lock();
            state.ready.extend(recovered.ready);
            state.dead_lettered = recovered.dead_lettered;
            state.journal = Some(journal);
        }

        Ok(channel)
    }

    pub fn in_memory(max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(QueueState {
                ready: VecDeque::new(),
                unacked: HashMap::new(),
                dead_lettered: Vec::new(),
                journal: None,
                next_tag: 1,
                closed: false,
            }),
            notify: Notify::new(),
            max_attempts: max_attempts.max(1),
            next_consumer: AtomicU64::new(1),
        }
    }

    pub fn publish(&self, task: &TaskMessage) -> Result<(), CoordinatorError> {
        let payload = task
            .to_json()
            .map_err(|e| CoordinatorError::TransportUnavailable(e.to_string()))?;
        self.publish_payload(task.task_id.clone(), payload)
    }

    /// Publishes an already encoded payload under `correlation_id`.
    pub fn publish_payload(&self, correlation_id: TaskId, payload: Vec<u8>) -> Result<(), CoordinatorError> {
        let envelope = Envelope::new(correlation_id, payload);
        {
            let mut state = self.lock();
            if state.closed {
                return Err(CoordinatorError::TransportUnavailable(
                    "channel is closed".to_string(),
                ));
            }
            state
                .record(&Record::Published(envelope.clone()))
                .map_err(|e| CoordinatorError::TransportUnavailable(format!("journal write failed: {}", e)))?;
            state.ready.push_back(envelope);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    pub fn register_consumer(&self) -> ConsumerId {
        self.next_consumer.fetch_add(1, Ordering::Relaxed)
    }

    /// Hands out up to `max` deliveries minus those the consumer still holds,
    /// waiting up to `wait` for work to arrive.
    pub async fn fetch(&self, consumer: ConsumerId, max: u32, wait: Duration) -> Vec<Delivery> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (deliveries, may_wait) = self.take(consumer, max);
            if !deliveries.is_empty() || !may_wait {
                return deliveries;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Vec::new();
            }
        }
    }

    fn take(&self, consumer: ConsumerId, max: u32) -> (Vec<Delivery>, bool) {
        let mut guard = self.lock();
        let state = &mut *guard;

        let held = state
            .unacked
            .values()
            .filter(|unacked| unacked.consumer == consumer)
            .count();
        let allowance = (max.max(1) as usize).saturating_sub(held);

        let mut deliveries = Vec::new();
        while deliveries.len() < allowance {
            let Some(mut envelope) = state.ready.pop_front() else {
                break;
            };
            envelope.attempts += 1;
            let tag = state.next_tag;
            state.next_tag += 1;

            deliveries.push(Delivery {
                delivery_tag: tag,
                correlation_id: envelope.correlation_id.clone(),
                attempt: envelope.attempts,
                redelivered: envelope.attempts > 1,
                payload: envelope.payload.clone(),
            });
            state.unacked.insert(tag, Unacked { consumer, envelope });
        }

        (deliveries, allowance > 0 && !state.closed)
    }

    pub fn ack(&self, consumer: ConsumerId, tag: u64) -> Result<(), CoordinatorError> {
        let mut state = self.lock();
        let envelope = state.take_unacked(consumer, tag)?;
        let record = Record::Settled {
            correlation_id: envelope.correlation_id.clone(),
        };
        if let Err(e) = state.record(&record) {
            warn!("Could not journal ack of {}: {}", envelope.correlation_id, e);
        }
        state.compact_if_needed();
        Ok(())
    }

    pub fn nack(&self, consumer: ConsumerId, tag: u64, requeue: bool) -> Result<(), CoordinatorError> {
        let requeued = {
            let mut state = self.lock();
            let envelope = state.take_unacked(consumer, tag)?;
            state.settle_failed(envelope, requeue, self.max_attempts)
        };
        if requeued {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    /// Returns every delivery held by `consumer` to the queue. Returns how
    /// many deliveries were released.
    pub fn release_consumer(&self, consumer: ConsumerId) -> usize {
        let released = {
            let mut state = self.lock();
            let mut tags: Vec<u64> = state
                .unacked
                .iter()
                .filter(|(_, unacked)| unacked.consumer == consumer)
                .map(|(tag, _)| *tag)
                .collect();
            tags.sort_unstable();

            for tag in &tags {
                if let Some(unacked) = state.unacked.remove(tag) {
                    state.settle_failed(unacked.envelope, true, self.max_attempts);
                }
            }
            tags.len()
        };

        if released > 0 {
            info!("Released {} unsettled delivery(ies) of consumer {}", released, consumer);
            self.notify.notify_waiters();
        }
        released
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            pending: state.ready.len(),
            in_flight: state.unacked.len(),
            dead_lettered: state.dead_lettered.len(),
        }
    }

    /// Backlog waiting for a consumer.
    pub fn pending(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn dead_letters(&self) -> Vec<Envelope> {
        self.lock().dead_lettered.clone()
    }

    /// Refuses further publishes and wakes waiting consumers.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::DEFAULT_COMPACT_AFTER;
    use shared::engine::initial_session;
    use shared::task::TaskMessage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    const NO_WAIT: Duration = Duration::ZERO;

    fn task() -> TaskMessage {
        let session = initial_session(
            Uuid::new_v4().simple().to_string(),
            20,
            &mut StdRng::seed_from_u64(1),
        );
        TaskMessage::advance(session)
    }

    #[tokio::test]
    async fn test_publish_fetch_ack() {
        let channel = TaskChannel::in_memory(3);
        let consumer = channel.register_consumer();
        let published = task();
        assert_ok!(channel.publish(&published));
        assert_eq!(channel.pending(), 1);

        let deliveries = channel.fetch(consumer, 1, NO_WAIT).await;
        assert_eq!(deliveries.len(), 1);
        let delivery = &deliveries[0];
        assert_eq!(delivery.correlation_id, published.task_id);
        assert_eq!(delivery.attempt, 1);
        assert!(!delivery.redelivered);
        assert_eq!(TaskMessage::from_json(&delivery.payload).unwrap(), published);

        assert_eq!(channel.stats().in_flight, 1);
        assert_ok!(channel.ack(consumer, delivery.delivery_tag));
        assert_eq!(channel.stats(), QueueStats::default());
    }

    #[tokio::test]
    async fn test_prefetch_bounds_unsettled_deliveries() {
        let channel = TaskChannel::in_memory(3);
        let consumer = channel.register_consumer();
        for _ in 0..5 {
            channel.publish(&task()).unwrap();
        }

        let first = channel.fetch(consumer, 2, NO_WAIT).await;
        assert_eq!(first.len(), 2);
        assert!(channel.fetch(consumer, 2, NO_WAIT).await.is_empty());

        channel.ack(consumer, first[0].delivery_tag).unwrap();
        let second = channel.fetch(consumer, 2, NO_WAIT).await;
        assert_eq!(second.len(), 1);
        assert_eq!(channel.stats().pending, 2);
    }

    #[tokio::test]
    async fn test_nack_requeues_then_dead_letters() {
        let channel = TaskChannel::in_memory(2);
        let consumer = channel.register_consumer();
        let published = task();
        channel.publish(&published).unwrap();

        let first = channel.fetch(consumer, 1, NO_WAIT).await.remove(0);
        channel.nack(consumer, first.delivery_tag, true).unwrap();
        assert_eq!(channel.pending(), 1);

        let second = channel.fetch(consumer, 1, NO_WAIT).await.remove(0);
        assert!(second.redelivered);
        assert_eq!(second.attempt, 2);
        assert_ne!(second.delivery_tag, first.delivery_tag);

        channel.nack(consumer, second.delivery_tag, true).unwrap();
        assert_eq!(channel.pending(), 0);
        let dead = channel.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].correlation_id, published.task_id);
    }

    #[tokio::test]
    async fn test_reject_goes_straight_to_dead_letters() {
        let channel = TaskChannel::in_memory(5);
        let consumer = channel.register_consumer();
        channel
            .publish_payload("poison".to_string(), b"{".to_vec())
            .unwrap();

        let delivery = channel.fetch(consumer, 1, NO_WAIT).await.remove(0);
        channel.nack(consumer, delivery.delivery_tag, false).unwrap();

        assert_eq!(channel.stats().dead_lettered, 1);
        assert_eq!(channel.stats().pending, 0);
    }

    #[tokio::test]
    async fn test_settle_checks_ownership() {
        let channel = TaskChannel::in_memory(3);
        let owner = channel.register_consumer();
        let other = channel.register_consumer();
        channel.publish(&task()).unwrap();

        let delivery = channel.fetch(owner, 1, NO_WAIT).await.remove(0);
        let err = assert_err!(channel.ack(other, delivery.delivery_tag));
        assert!(matches!(err, CoordinatorError::UnknownDelivery(_)));
        assert_ok!(channel.ack(owner, delivery.delivery_tag));
        assert_err!(channel.ack(owner, delivery.delivery_tag));
    }

    #[tokio::test]
    async fn test_release_consumer_requeues() {
        let channel = TaskChannel::in_memory(3);
        let gone = channel.register_consumer();
        let survivor = channel.register_consumer();
        channel.publish(&task()).unwrap();
        channel.publish(&task()).unwrap();

        let held = channel.fetch(gone, 4, NO_WAIT).await;
        assert_eq!(held.len(), 2);
        assert_eq!(channel.release_consumer(gone), 2);

        let redelivered = channel.fetch(survivor, 4, NO_WAIT).await;
        assert_eq!(redelivered.len(), 2);
        assert!(redelivered.iter().all(|d| d.redelivered));
        assert_eq!(redelivered[0].correlation_id, held[0].correlation_id);
    }

    #[tokio::test]
    async fn test_fetch_waits_for_publish() {
        let channel = Arc::new(TaskChannel::in_memory(3));
        let consumer = channel.register_consumer();

        let waiter = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.fetch(consumer, 1, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.publish(&task()).unwrap();

        let deliveries = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deliveries.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_times_out_empty() {
        let channel = TaskChannel::in_memory(3);
        let consumer = channel.register_consumer();
        let deliveries = channel.fetch(consumer, 1, Duration::from_millis(20)).await;
        assert!(deliveries.is_empty());
    }

    #[tokio::test]
    async fn test_closed_channel_refuses_publish() {
        let channel = TaskChannel::in_memory(3);
        channel.close();
        assert!(channel.is_closed());

        let err = assert_err!(channel.publish(&task()));
        assert!(matches!(err, CoordinatorError::TransportUnavailable(_)));
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn test_journal_stays_bounded_while_running() {
        let path = std::env::temp_dir().join(format!("channel-{}.log", Uuid::new_v4().simple()));
        let config = ChannelConfig {
            max_attempts: 3,
            journal_path: Some(path.clone()),
            sync_journal: false,
            compact_after: 50,
        };
        let channel = TaskChannel::open(&config).unwrap();
        let consumer = channel.register_consumer();
        let published = task();

        let mut largest = 0;
        for _ in 0..1_000 {
            channel.publish(&published).unwrap();
            let delivery = channel.fetch(consumer, 1, NO_WAIT).await.remove(0);
            channel.ack(consumer, delivery.delivery_tag).unwrap();
            largest = largest.max(std::fs::metadata(&path).unwrap().len());
        }

        // One settled task is a publish record plus a settle record, and the
        // file never holds more than `compact_after` of them.
        let one_task = {
            let single = std::env::temp_dir().join(format!("channel-{}.log", Uuid::new_v4().simple()));
            let single_config = ChannelConfig {
                journal_path: Some(single.clone()),
                compact_after: 1_000_000,
                ..config.clone()
            };
            let channel = TaskChannel::open(&single_config).unwrap();
            let consumer = channel.register_consumer();
            channel.publish(&published).unwrap();
            let delivery = channel.fetch(consumer, 1, NO_WAIT).await.remove(0);
            channel.ack(consumer, delivery.delivery_tag).unwrap();
            let len = std::fs::metadata(&single).unwrap().len();
            std::fs::remove_file(single).unwrap();
            len
        };
        assert!(largest <= one_task * 50);
        assert_eq!(channel.stats(), QueueStats::default());

        // Work still owed survives a rewrite.
        let owed = task();
        channel.publish(&owed).unwrap();
        drop(channel);
        let reopened = TaskChannel::open(&config).unwrap();
        assert_eq!(reopened.pending(), 1);
        let delivery = reopened.fetch(reopened.register_consumer(), 1, NO_WAIT).await.remove(0);
        assert_eq!(delivery.correlation_id, owed.task_id);

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_compaction_keeps_in_flight_tasks() {
        let path = std::env::temp_dir().join(format!("channel-{}.log", Uuid::new_v4().simple()));
        let config = ChannelConfig {
            max_attempts: 3,
            journal_path: Some(path.clone()),
            sync_journal: false,
            compact_after: 1,
        };
        let held = task();
        let done = task();
        {
            let channel = TaskChannel::open(&config).unwrap();
            let consumer = channel.register_consumer();
            channel.publish(&held).unwrap();
            channel.publish(&done).unwrap();
            let deliveries = channel.fetch(consumer, 2, NO_WAIT).await;
            // Acking the second task triggers a rewrite while the first is
            // still held.
            channel.ack(consumer, deliveries[1].delivery_tag).unwrap();
        }

        let reopened = TaskChannel::open(&config).unwrap();
        assert_eq!(reopened.pending(), 1);
        let delivery = reopened.fetch(reopened.register_consumer(), 1, NO_WAIT).await.remove(0);
        assert_eq!(delivery.correlation_id, held.task_id);
        assert_eq!(delivery.attempt, 1);

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_journal_survives_restart() {
        let path = std::env::temp_dir().join(format!("channel-{}.log", Uuid::new_v4().simple()));
        let config = ChannelConfig {
            max_attempts: 3,
            journal_path: Some(path.clone()),
            sync_journal: false,
            compact_after: DEFAULT_COMPACT_AFTER,
        };

        let acked = task();
        let unacked = task();
        {
            let channel = TaskChannel::open(&config).unwrap();
            let consumer = channel.register_consumer();
            channel.publish(&acked).unwrap();
            channel.publish(&unacked).unwrap();

            let first = channel.fetch(consumer, 1, NO_WAIT).await.remove(0);
            channel.ack(consumer, first.delivery_tag).unwrap();
        }

        let reopened = TaskChannel::open(&config).unwrap();
        assert_eq!(reopened.pending(), 1);
        let consumer = reopened.register_consumer();
        let delivery = reopened.fetch(consumer, 1, NO_WAIT).await.remove(0);
        assert_eq!(delivery.correlation_id, unacked.task_id);

        std::fs::remove_file(path).unwrap();
    }
}

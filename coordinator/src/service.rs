//! Request dispatch for the coordinator.
//!
//! `Coordinator` wires the store, the task channel and the components that
//! use them, and turns every incoming request packet into exactly one
//! response packet. Errors never escape as anything but an `Error` packet.

use crate::channel::{ChannelConfig, ConsumerId, TaskChannel};
use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::ingress::MoveIngress;
use crate::registry::WorkerRegistry;
use crate::scheduler::TickScheduler;
use crate::sink::ResultSink;
use crate::store::SessionStore;
use log::{debug, warn};
use shared::protocol::{ErrorKind, Packet};
use shared::timestamp_ms;
use std::sync::Arc;
use std::time::Duration;

/// Per-connection state. A connection becomes a consumer the first time it
/// fetches.
#[derive(Debug, Default)]
pub struct ConnectionState {
    consumer: Option<ConsumerId>,
}

impl ConnectionState {
    pub fn consumer(&self) -> Option<ConsumerId> {
        self.consumer
    }

    fn consumer_or_register(&mut self, channel: &TaskChannel) -> ConsumerId {
        *self.consumer.get_or_insert_with(|| channel.register_consumer())
    }

    fn settling_consumer(&self, delivery_tag: u64) -> Result<ConsumerId, CoordinatorError> {
        self.consumer
            .ok_or(CoordinatorError::UnknownDelivery(delivery_tag))
    }
}

pub struct Coordinator {
    pub store: Arc<SessionStore>,
    pub channel: Arc<TaskChannel>,
    pub ingress: MoveIngress,
    pub sink: ResultSink,
    pub registry: WorkerRegistry,
    pub scheduler: TickScheduler,
    max_fetch_wait: Duration,
}

impl Coordinator {
    pub fn new(config: &CoordinatorConfig) -> Result<Self, CoordinatorError> {
        config.validate()?;

        let store = Arc::new(SessionStore::new(config.board_size));
        let channel = Arc::new(TaskChannel::open(&ChannelConfig {
            max_attempts: config.max_attempts,
            journal_path: config.journal_path.clone(),
            sync_journal: config.sync_journal,
            compact_after: config.journal_compact_after,
        })?);

        Ok(Self {
            ingress: MoveIngress::new(Arc::clone(&store), Arc::clone(&channel), config.move_throttle),
            sink: ResultSink::new(Arc::clone(&store)),
            scheduler: TickScheduler::new(Arc::clone(&store), Arc::clone(&channel), config.tick_interval),
            registry: WorkerRegistry::new(),
            store,
            channel,
            max_fetch_wait: config.max_fetch_wait,
        })
    }

    /// Answers one request.
    pub async fn handle(&self, packet: Packet, connection: &mut ConnectionState) -> Packet {
        let result = match packet {
            Packet::Join => Ok(Packet::Joined {
                session: self.store.create().await,
            }),
            Packet::Move { session_id, dx, dy } => self
                .ingress
                .submit_move(&session_id, dx, dy, timestamp_ms())
                .await
                .map(|accepted| Packet::MoveAccepted {
                    direction: accepted.direction,
                    task_id: accepted.task_id,
                }),
            Packet::GetState { session_id } => self
                .store
                .get(&session_id)
                .await
                .map(|session| Packet::State { session }),
            Packet::Fetch { max, wait_ms } => {
                let consumer = connection.consumer_or_register(&self.channel);
                let wait = Duration::from_millis(wait_ms).min(self.max_fetch_wait);
                Ok(Packet::Deliveries {
                    deliveries: self.channel.fetch(consumer, max, wait).await,
                })
            }
            Packet::Ack { delivery_tag } => connection
                .settling_consumer(delivery_tag)
                .and_then(|consumer| self.channel.ack(consumer, delivery_tag))
                .map(|()| Packet::Done),
            Packet::Nack {
                delivery_tag,
                requeue,
            } => connection
                .settling_consumer(delivery_tag)
                .and_then(|consumer| self.channel.nack(consumer, delivery_tag, requeue))
                .map(|()| Packet::Done),
            Packet::SubmitResult { session_id, next } => self
                .sink
                .submit_result(&session_id, next)
                .await
                .map(|outcome| Packet::Merged { outcome }),
            Packet::QueueDepth => Ok(Packet::Depth {
                stats: self.channel.stats(),
            }),
            Packet::ReportStatus { status } => {
                self.registry.report(status).await;
                Ok(Packet::Done)
            }
            Packet::ListWorkers => Ok(Packet::Workers {
                workers: self.registry.list().await,
            }),
            other => Err(CoordinatorError::UnexpectedRequest(format!("{:?}", other))),
        };

        result.unwrap_or_else(|e| {
            match e.kind() {
                ErrorKind::NotFound | ErrorKind::RateLimited | ErrorKind::SessionOver => {
                    debug!("Request refused: {}", e)
                }
                _ => warn!("Request failed: {}", e),
            }
            e.to_packet()
        })
    }

    /// Cleans up after a connection closes.
    pub fn disconnect(&self, connection: ConnectionState) {
        if let Some(consumer) = connection.consumer {
            self.channel.release_consumer(consumer);
        }
    }
}

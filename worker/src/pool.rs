use crate::config::WorkerConfig;
use crate::consumer::{Consumer, PoolCounters};
use crate::error::WorkerError;
use crate::load::LoadMonitor;
use crate::sizing::PoolSize;
use log::{error, info};
use shared::protocol::WorkerStatus;
use shared::timestamp_ms;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

struct ConsumerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// A resizable set of consumers sharing one prefetch setting.
pub struct WorkerPool {
    config: Arc<WorkerConfig>,
    monitor: LoadMonitor,
    counters: Arc<PoolCounters>,
    prefetch: watch::Sender<u32>,
    consumers: Vec<ConsumerHandle>,
    /// Consumers told to stop that may still be finishing a task.
    retiring: Vec<JoinHandle<()>>,
    next_id: usize,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig) -> Result<Self, WorkerError> {
        config.validate()?;
        let monitor = LoadMonitor::new(&config.coordinator, config.task_timeout);
        let (prefetch, _) = watch::channel(1);

        Ok(Self {
            config: Arc::new(config),
            monitor,
            counters: Arc::new(PoolCounters::default()),
            prefetch,
            consumers: Vec::new(),
            retiring: Vec::new(),
            next_id: 0,
        })
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn prefetch(&self) -> u32 {
        *self.prefetch.borrow()
    }

    pub fn counters(&self) -> Arc<PoolCounters> {
        Arc::clone(&self.counters)
    }

    /// Spawns or retires consumers until the pool matches `size`. The new
    /// prefetch applies to every consumer from its next fetch on.
    pub fn resize(&mut self, size: PoolSize) {
        let size = size.capped(self.config.max_consumers);
        self.prefetch.send_replace(size.prefetch);

        while self.consumers.len() < size.consumers {
            let (stop, stop_rx) = watch::channel(false);
            let consumer = Consumer::new(
                self.next_id,
                Arc::clone(&self.config),
                self.prefetch.subscribe(),
                stop_rx,
                Arc::clone(&self.counters),
            );
            self.next_id += 1;
            self.consumers.push(ConsumerHandle {
                stop,
                task: tokio::spawn(consumer.run()),
            });
        }

        while self.consumers.len() > size.consumers {
            if let Some(handle) = self.consumers.pop() {
                let _ = handle.stop.send(true);
                self.retiring.push(handle.task);
            }
        }

        self.retiring.retain(|task| !task.is_finished());
    }

    /// Samples load, resizes, and reports the new size to the coordinator.
    pub async fn rescale(&mut self) -> PoolSize {
        let planned = self.monitor.plan().await;
        let before = (self.consumer_count(), self.prefetch());
        self.resize(planned);

        let size = PoolSize {
            consumers: self.consumer_count(),
            prefetch: self.prefetch(),
        };
        if before != (size.consumers, size.prefetch) {
            info!(
                "Pool resized to {} consumer(s), prefetch {}",
                size.consumers, size.prefetch
            );
        }

        self.monitor.report(self.status()).await;
        size
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            name: self.config.name.clone(),
            consumers: self.consumer_count(),
            prefetch: self.prefetch(),
            processed: self.counters.processed(),
            failed: self.counters.failed(),
            reported_at: timestamp_ms(),
        }
    }

    /// Rescales every `rescale_interval` until `shutdown` flips to true, then
    /// stops all consumers.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = interval(self.config.rescale_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.rescale().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.stop_all().await;
    }

    /// Stops every consumer and waits for them to finish their current task.
    pub async fn stop_all(&mut self) {
        info!("Stopping {} consumer(s)", self.consumers.len());
        for handle in &self.consumers {
            let _ = handle.stop.send(true);
        }

        let tasks = self
            .consumers
            .drain(..)
            .map(|handle| handle.task)
            .chain(self.retiring.drain(..));
        for task in tasks.collect::<Vec<_>>() {
            if let Err(e) = task.await {
                error!("Consumer task panicked: {}", e);
            }
        }
    }
}

use log::debug;
use shared::protocol::WorkerStatus;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Last status reported by each worker, keyed by worker name.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerStatus>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn report(&self, status: WorkerStatus) {
        debug!(
            "Worker {} reports {} consumer(s), prefetch {}",
            status.name, status.consumers, status.prefetch
        );
        self.workers
            .write()
            .await
            .insert(status.name.clone(), status);
    }

    /// All known workers, sorted by name.
    pub async fn list(&self) -> Vec<WorkerStatus> {
        let mut workers: Vec<WorkerStatus> = self.workers.read().await.values().cloned().collect();
        workers.sort_by(|a, b| a.name.cmp(&b.name));
        workers
    }
}

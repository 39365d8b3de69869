use crate::connection::CoordinatorLink;
use crate::error::WorkerError;
use crate::sizing::{self, PoolSize};
use log::{debug, warn};
use shared::protocol::WorkerStatus;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSample {
    pub pending_tasks: usize,
    pub available_cores: usize,
}

/// Cores this process may run on.
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

/// Samples queue backlog and machine capacity for the pool sizing policy and
/// carries the worker's status reports. Keeps its own coordinator link,
/// separate from the consumers'.
pub struct LoadMonitor {
    coordinator: String,
    request_timeout: Duration,
    link: Option<CoordinatorLink>,
}

impl LoadMonitor {
    pub fn new(coordinator: &str, request_timeout: Duration) -> Self {
        Self {
            coordinator: coordinator.to_string(),
            request_timeout,
            link: None,
        }
    }

    async fn link(&mut self) -> Result<&mut CoordinatorLink, WorkerError> {
        if self.link.is_none() {
            let link = timeout(self.request_timeout, CoordinatorLink::connect(&self.coordinator))
                .await
                .map_err(|_| WorkerError::Timeout(self.request_timeout))??;
            self.link = Some(link);
        }
        self.link.as_mut().ok_or(WorkerError::Disconnected)
    }

    pub async fn sample(&mut self) -> Result<LoadSample, WorkerError> {
        let request_timeout = self.request_timeout;
        let result = match self.link().await {
            Ok(link) => timeout(request_timeout, link.queue_depth())
                .await
                .unwrap_or(Err(WorkerError::Timeout(request_timeout))),
            Err(e) => Err(e),
        };

        match result {
            Ok(stats) => Ok(LoadSample {
                pending_tasks: stats.pending,
                available_cores: available_cores(),
            }),
            Err(e) => {
                self.link = None;
                Err(e)
            }
        }
    }

    /// Pool size for the current load, or the fallback size when the backlog
    /// cannot be sampled.
    pub async fn plan(&mut self) -> PoolSize {
        match self.sample().await {
            Ok(sample) => {
                debug!(
                    "Backlog {} on {} core(s)",
                    sample.pending_tasks, sample.available_cores
                );
                sizing::plan(sample.pending_tasks, sample.available_cores)
            }
            Err(e) => {
                warn!("Could not sample queue depth: {}", e);
                sizing::fallback(available_cores())
            }
        }
    }

    /// Sends a status report. Failures are logged and otherwise ignored.
    pub async fn report(&mut self, status: WorkerStatus) {
        let request_timeout = self.request_timeout;
        let result = match self.link().await {
            Ok(link) => timeout(request_timeout, link.report_status(status))
                .await
                .unwrap_or(Err(WorkerError::Timeout(request_timeout))),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!("Status report failed: {}", e);
            self.link = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator::config::CoordinatorConfig;
    use coordinator::network::Server;
    use tokio::net::TcpListener;
    use tokio::sync::watch;

    #[tokio::test]
    async fn test_samples_backlog() {
        let server = Server::bind(&CoordinatorConfig {
            bind: "127.0.0.1:0".to_string(),
            tick_interval: Duration::from_secs(60),
            ..CoordinatorConfig::default()
        })
        .await
        .unwrap();
        let address = server.local_addr().unwrap().to_string();
        let coordinator = server.coordinator();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(server.run(shutdown_rx));

        for _ in 0..3 {
            coordinator.store.create().await;
        }
        coordinator.scheduler.tick().await;

        let mut monitor = LoadMonitor::new(&address, Duration::from_secs(1));
        let sample = monitor.sample().await.unwrap();
        assert_eq!(sample.pending_tasks, 3);
        assert!(sample.available_cores >= 1);
        assert_eq!(monitor.plan().await.prefetch, 2);

        monitor
            .report(WorkerStatus {
                name: "w1".to_string(),
                consumers: 2,
                prefetch: 2,
                processed: 0,
                failed: 0,
                reported_at: shared::timestamp_ms(),
            })
            .await;
        assert_eq!(coordinator.registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_when_unreachable() {
        // Grab a free port, then close it so nothing listens there.
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let mut monitor = LoadMonitor::new(&address, Duration::from_millis(200));
        assert!(monitor.sample().await.is_err());
        assert_eq!(monitor.plan().await, sizing::fallback(available_cores()));
    }
}

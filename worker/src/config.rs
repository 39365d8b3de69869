use crate::error::WorkerError;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Coordinator address, `host:port`.
    pub coordinator: String,
    /// Name this worker reports its status under.
    pub name: String,
    pub rescale_interval: Duration,
    /// How long one fetch may wait for work.
    pub poll_wait: Duration,
    /// Upper bound on submitting one result.
    pub task_timeout: Duration,
    /// Hard cap on consumers, on top of the sizing policy.
    pub max_consumers: Option<usize>,
    /// First delay before reconnecting; doubles up to `MAX_BACKOFF`.
    pub reconnect_backoff: Duration,
}

pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordinator: "127.0.0.1:8000".to_string(),
            name: "worker".to_string(),
            rescale_interval: Duration::from_secs(5),
            poll_wait: Duration::from_secs(1),
            task_timeout: Duration::from_secs(10),
            max_consumers: None,
            reconnect_backoff: Duration::from_millis(200),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.name.is_empty() {
            return Err(WorkerError::Config("worker name is empty".to_string()));
        }
        if self.rescale_interval.is_zero() {
            return Err(WorkerError::Config(
                "rescale interval must be positive".to_string(),
            ));
        }
        if self.task_timeout.is_zero() {
            return Err(WorkerError::Config("task timeout must be positive".to_string()));
        }
        if self.max_consumers == Some(0) {
            return Err(WorkerError::Config(
                "max consumers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

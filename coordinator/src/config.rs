use crate::error::CoordinatorError;
use crate::journal::DEFAULT_COMPACT_AFTER;
use shared::{BOARD_SIZE, MOVE_THROTTLE, TICK_INTERVAL};
use std::path::PathBuf;
use std::time::Duration;

/// Smallest board that fits the initial body plus a cell for food.
pub const MIN_BOARD_SIZE: i32 = 4;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub bind: String,
    pub board_size: i32,
    pub tick_interval: Duration,
    pub move_throttle: Duration,
    /// Deliveries per task before it is dead-lettered.
    pub max_attempts: u32,
    pub journal_path: Option<PathBuf>,
    /// Sync the journal to disk after every record.
    pub sync_journal: bool,
    /// Settled tasks between journal rewrites.
    pub journal_compact_after: usize,
    /// Upper bound on how long a `Fetch` may wait for work.
    pub max_fetch_wait: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            board_size: BOARD_SIZE,
            tick_interval: TICK_INTERVAL,
            move_throttle: MOVE_THROTTLE,
            max_attempts: 5,
            journal_path: None,
            sync_journal: false,
            journal_compact_after: DEFAULT_COMPACT_AFTER,
            max_fetch_wait: Duration::from_secs(5),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.board_size < MIN_BOARD_SIZE {
            return Err(CoordinatorError::Config(format!(
                "board size must be at least {}, got {}",
                MIN_BOARD_SIZE, self.board_size
            )));
        }
        if self.tick_interval.is_zero() {
            return Err(CoordinatorError::Config(
                "tick interval must be positive".to_string(),
            ));
        }
        if self.journal_compact_after == 0 {
            return Err(CoordinatorError::Config(
                "journal compaction threshold must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(CoordinatorError::Config(
                "max attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

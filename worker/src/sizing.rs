//! Pool sizing policy.
//!
//! | pending tasks | consumers           | prefetch |
//! |---------------|---------------------|----------|
//! | > 100         | min(2 x cores, 32)  | 4        |
//! | 1..=100       | cores               | 2        |
//! | 0             | max(1, cores / 2)   | 1        |

/// Ceiling on consumers the policy asks for under heavy backlog.
pub const MAX_CONSUMERS: usize = 32;
/// Backlog above which the pool scales to its burst size.
pub const HEAVY_BACKLOG: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSize {
    pub consumers: usize,
    /// Unacknowledged deliveries one consumer may hold.
    pub prefetch: u32,
}

impl PoolSize {
    /// Applies an operator cap on the consumer count.
    pub fn capped(self, max_consumers: Option<usize>) -> PoolSize {
        match max_consumers {
            Some(cap) => PoolSize {
                consumers: self.consumers.min(cap).max(1),
                prefetch: self.prefetch,
            },
            None => self,
        }
    }
}

pub fn plan(pending_tasks: usize, available_cores: usize) -> PoolSize {
    let cores = available_cores.max(1);
    if pending_tasks > HEAVY_BACKLOG {
        PoolSize {
            consumers: (2 * cores).min(MAX_CONSUMERS),
            prefetch: 4,
        }
    } else if pending_tasks > 0 {
        PoolSize {
            consumers: cores,
            prefetch: 2,
        }
    } else {
        PoolSize {
            consumers: (cores / 2).max(1),
            prefetch: 1,
        }
    }
}

/// Size used when the backlog cannot be sampled.
pub fn fallback(available_cores: usize) -> PoolSize {
    PoolSize {
        consumers: available_cores.max(1),
        prefetch: 1,
    }
}

//! Types and rules shared by the coordinator and the workers.
//!
//! The coordinator owns session state, the workers compute state transitions,
//! and both sides speak the same two formats: the JSON task message that
//! travels through the task channel and the binary `Packet` frames used on
//! every coordinator connection.

pub mod engine;
pub mod model;
pub mod protocol;
pub mod task;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use model::{Cell, Direction, NextState, Session, SessionId, TaskId};

pub const BOARD_SIZE: i32 = 20;
pub const INITIAL_LENGTH: usize = 3;
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
pub const MOVE_THROTTLE: Duration = Duration::from_secs(1);

/// Milliseconds since the unix epoch, saturating to zero on clock errors.
pub fn timestamp_ms() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    (millis.min(u64::MAX as u128)) as u64
}

//! Session data model.
//!
//! A `Session` is one game instance. The coordinator keeps the authoritative
//! copy; tasks carry deep copies of it to the workers, which answer with a
//! `NextState` describing the fields they are allowed to change.

use serde::{Deserialize, Serialize};

/// Opaque session identifier (uuid, simple hex form).
pub type SessionId = String;
/// Unique task identifier, also used as the delivery correlation id.
pub type TaskId = String;

/// A board cell. `x` grows to the right, `y` grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The neighbouring cell one step in `direction`.
    pub fn step(self, direction: Direction) -> Cell {
        let (dx, dy) = direction.delta();
        Cell {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    pub fn in_bounds(self, board_size: i32) -> bool {
        (0..board_size).contains(&self.x) && (0..board_size).contains(&self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Unit vector of the direction.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    /// Translates a unit vector into a direction.
    ///
    /// Returns `None` for the zero vector and for anything that is not one of
    /// the four unit vectors, in which case callers keep the current direction.
    pub fn from_delta(dx: i32, dy: i32) -> Option<Direction> {
        match (dx, dy) {
            (1, 0) => Some(Direction::Right),
            (-1, 0) => Some(Direction::Left),
            (0, 1) => Some(Direction::Down),
            (0, -1) => Some(Direction::Up),
            _ => None,
        }
    }
}

/// One game instance.
///
/// `version` increases by one every time a transition is merged into the
/// authoritative copy.
/// Snapshots carry it so that results computed from an outdated snapshot can
/// be recognised and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    /// Head first.
    pub body: Vec<Cell>,
    pub food: Cell,
    pub score: u32,
    pub terminal: bool,
    pub direction: Direction,
    pub board_size: i32,
    /// Unix milliseconds of the last accepted move, `None` until the first one.
    pub last_move_at: Option<u64>,
    pub version: u64,
}

impl Session {
    pub fn head(&self) -> Option<Cell> {
        self.body.first().copied()
    }

    /// The fields a transition may change, as they are right now.
    pub fn current_state(&self) -> NextState {
        NextState {
            based_on: self.version,
            body: self.body.clone(),
            food: self.food,
            score: self.score,
            terminal: self.terminal,
        }
    }
}

/// Result of one state transition, merged back by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextState {
    /// Version of the snapshot this state was computed from.
    pub based_on: u64,
    pub body: Vec<Cell>,
    pub food: Cell,
    pub score: u32,
    pub terminal: bool,
}

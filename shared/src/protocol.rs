//! Coordinator wire protocol.
//!
//! Every connection to the coordinator carries length-prefixed frames: a
//! big-endian `u32` length followed by a bincode encoded `Packet`. Each
//! request gets exactly one response, in order.

use crate::model::{Direction, NextState, Session, SessionId, TaskId};
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_LEN: u32 = 1 << 20;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame of {0} bytes exceeds the 1 MiB limit")]
    FrameTooLarge(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Packet {
    // Player requests
    Join,
    Move {
        session_id: SessionId,
        dx: i32,
        dy: i32,
    },
    GetState {
        session_id: SessionId,
    },

    // Worker requests
    Fetch {
        max: u32,
        wait_ms: u64,
    },
    Ack {
        delivery_tag: u64,
    },
    Nack {
        delivery_tag: u64,
        requeue: bool,
    },
    SubmitResult {
        session_id: SessionId,
        next: NextState,
    },
    QueueDepth,
    ReportStatus {
        status: WorkerStatus,
    },
    ListWorkers,

    // Responses
    Joined {
        session: Session,
    },
    MoveAccepted {
        direction: Direction,
        task_id: TaskId,
    },
    State {
        session: Session,
    },
    Deliveries {
        deliveries: Vec<Delivery>,
    },
    Merged {
        outcome: MergeOutcome,
    },
    Depth {
        stats: QueueStats,
    },
    Workers {
        workers: Vec<WorkerStatus>,
    },
    Done,
    Error {
        kind: ErrorKind,
        message: String,
    },
}

/// A task handed to a consumer, to be settled with `Ack` or `Nack`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub correlation_id: TaskId,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
    pub redelivered: bool,
    /// JSON encoded `TaskMessage`.
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOutcome {
    Updated,
    /// The result was computed from an outdated snapshot and was dropped.
    Stale,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub dead_lettered: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub name: String,
    pub consumers: usize,
    pub prefetch: u32,
    pub processed: u64,
    pub failed: u64,
    pub reported_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    RateLimited,
    SessionOver,
    TransportUnavailable,
    BadRequest,
}

impl ErrorKind {
    /// HTTP-equivalent status code.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::RateLimited => 429,
            ErrorKind::SessionOver => 409,
            ErrorKind::TransportUnavailable => 500,
            ErrorKind::BadRequest => 400,
        }
    }
}

/// Writes one frame and flushes it.
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let data = bincode::serialize(packet)?;
    let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    writer.write_u32(len).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. Returns `Ok(None)` when the peer closed the connection
/// cleanly between frames.
pub async fn read_packet<R>(reader: &mut R) -> Result<Option<Packet>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    let mut buffer = vec![0u8; len as usize];
    reader.read_exact(&mut buffer).await?;
    Ok(Some(bincode::deserialize(&buffer)?))
}

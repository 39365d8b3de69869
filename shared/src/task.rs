//! The advance task message carried by the task channel.
//!
//! On the wire it is a JSON object:
//!
//! ```json
//! {"taskKind": "advance", "sessionId": "...", "stateSnapshot": {...}, "taskId": "..."}
//! ```
//!
//! Consumers never trust field presence at use time: `TaskMessage::from_json`
//! rejects unknown fields, unknown kinds and snapshots that cannot be
//! advanced.

use crate::model::{Session, SessionId, TaskId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("malformed task payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid task: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Advance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskMessage {
    pub task_kind: TaskKind,
    pub session_id: SessionId,
    pub state_snapshot: Session,
    pub task_id: TaskId,
}

impl TaskMessage {
    /// Wraps a deep copy of a session into a new advance task.
    pub fn advance(snapshot: Session) -> Self {
        Self {
            task_kind: TaskKind::Advance,
            session_id: snapshot.id.clone(),
            state_snapshot: snapshot,
            task_id: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, TaskError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(payload: &[u8]) -> Result<Self, TaskError> {
        let task: TaskMessage = serde_json::from_slice(payload)?;
        task.validate()?;
        Ok(task)
    }

    fn validate(&self) -> Result<(), TaskError> {
        if self.task_id.is_empty() {
            return Err(TaskError::Invalid("empty task id".to_string()));
        }
        if self.session_id != self.state_snapshot.id {
            return Err(TaskError::Invalid(format!(
                "snapshot belongs to {}, task targets {}",
                self.state_snapshot.id, self.session_id
            )));
        }
        if self.state_snapshot.board_size <= 0 {
            return Err(TaskError::Invalid(format!(
                "board size {} is not positive",
                self.state_snapshot.board_size
            )));
        }
        if self.state_snapshot.body.is_empty() {
            return Err(TaskError::Invalid("snapshot has an empty body".to_string()));
        }
        Ok(())
    }
}

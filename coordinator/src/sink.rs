use crate::error::CoordinatorError;
use crate::store::SessionStore;
use log::{debug, info};
use shared::protocol::MergeOutcome;
use shared::NextState;
use std::sync::Arc;

/// Coordinator endpoint that merges worker results into the store.
pub struct ResultSink {
    store: Arc<SessionStore>,
}

impl ResultSink {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// Merges `next` into the session. Results computed from an outdated
    /// snapshot come back as `Stale` without touching the session.
    pub async fn submit_result(
        &self,
        session_id: &str,
        next: NextState,
    ) -> Result<MergeOutcome, CoordinatorError> {
        if next.body.is_empty() {
            return Err(CoordinatorError::InvalidResult("empty body".to_string()));
        }

        let (score, terminal, based_on) = (next.score, next.terminal, next.based_on);
        let outcome = self.store.apply(session_id, next).await?;
        match outcome {
            MergeOutcome::Updated if terminal => {
                info!("Session {} is over with score {}", session_id, score)
            }
            MergeOutcome::Updated => debug!("Session {} updated, score {}", session_id, score),
            MergeOutcome::Stale => debug!(
                "Session {} ignored a result based on version {}",
                session_id, based_on
            ),
        }
        Ok(outcome)
    }
}

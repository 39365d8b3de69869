//! Player move handling.
//!
//! A move is validated and throttled inside the session's exclusive section,
//! then turned into exactly one advance task. Requests inside the throttle
//! window change nothing and queue nothing.
//!
//! A move leaves the session version alone. Results never write `direction`,
//! so a transition computed before the move is still a valid successor and
//! merges normally; the new heading takes effect from the next step.

use crate::channel::TaskChannel;
use crate::error::CoordinatorError;
use crate::store::SessionStore;
use log::{debug, error};
use shared::task::TaskMessage;
use shared::{Direction, TaskId};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub direction: Direction,
    pub task_id: TaskId,
}

pub struct MoveIngress {
    store: Arc<SessionStore>,
    channel: Arc<TaskChannel>,
    throttle_ms: u64,
}

impl MoveIngress {
    pub fn new(store: Arc<SessionStore>, channel: Arc<TaskChannel>, throttle: Duration) -> Self {
        Self {
            store,
            channel,
            throttle_ms: throttle.as_millis() as u64,
        }
    }

    /// Applies a direction change requested at `now` (unix milliseconds).
    ///
    /// `(dx, dy)` must be a unit vector; anything else keeps the current
    /// direction. Reversing onto the neck is ignored the same way. If the
    /// task cannot be published the new direction stays persisted and the
    /// error is returned to the caller.
    pub async fn submit_move(
        &self,
        session_id: &str,
        dx: i32,
        dy: i32,
        now: u64,
    ) -> Result<Accepted, CoordinatorError> {
        let throttle_ms = self.throttle_ms;
        let snapshot = self
            .store
            .with_session(session_id, |session| {
                if session.terminal {
                    return Err(CoordinatorError::SessionOver(session.id.clone()));
                }
                if let Some(last) = session.last_move_at {
                    if now.saturating_sub(last) < throttle_ms {
                        return Err(CoordinatorError::RateLimited);
                    }
                }

                let requested = Direction::from_delta(dx, dy).unwrap_or(session.direction);
                if requested != session.direction.opposite() {
                    session.direction = requested;
                }
                session.last_move_at = Some(now);
                Ok(session.clone())
            })
            .await??;

        let direction = snapshot.direction;
        let task = TaskMessage::advance(snapshot);
        if let Err(e) = self.channel.publish(&task) {
            error!("Error sending task {} for session {}: {}", task.task_id, session_id, e);
            return Err(e);
        }

        debug!(
            "Queued task {} (move) for session {} heading {:?}",
            task.task_id, session_id, direction
        );
        Ok(Accepted {
            direction,
            task_id: task.task_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::engine::advance;
    use shared::protocol::MergeOutcome;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    async fn setup() -> (Arc<SessionStore>, Arc<TaskChannel>, MoveIngress) {
        let store = Arc::new(SessionStore::new(20));
        let channel = Arc::new(TaskChannel::in_memory(3));
        let ingress = MoveIngress::new(
            Arc::clone(&store),
            Arc::clone(&channel),
            Duration::from_secs(1),
        );
        (store, channel, ingress)
    }

    #[tokio::test]
    async fn test_accepted_move_queues_one_task() {
        let (store, channel, ingress) = setup().await;
        let session = store.create().await;

        let accepted = assert_ok!(ingress.submit_move(&session.id, 0, -1, 5_000).await);
        assert_eq!(accepted.direction, Direction::Up);
        assert_eq!(channel.pending(), 1);

        let stored = store.get(&session.id).await.unwrap();
        assert_eq!(stored.direction, Direction::Up);
        assert_eq!(stored.last_move_at, Some(5_000));
        assert_eq!(stored.version, 0);

        let consumer = channel.register_consumer();
        let delivery = channel.fetch(consumer, 1, Duration::ZERO).await.remove(0);
        let task = TaskMessage::from_json(&delivery.payload).unwrap();
        assert_eq!(task.task_id, accepted.task_id);
        assert_eq!(delivery.correlation_id, accepted.task_id);
        assert_eq!(task.state_snapshot, stored);
    }

    #[tokio::test]
    async fn test_steering_does_not_starve_results() {
        let (store, channel, ingress) = setup().await;
        let session = store.create().await;
        let consumer = channel.register_consumer();
        let mut rng = StdRng::seed_from_u64(9);

        // Each move's result only comes back after the following move.
        let turns = [(0, 1), (1, 0), (0, 1), (1, 0), (0, 1)];
        let mut outstanding: Option<TaskMessage> = None;
        let mut outcomes = Vec::new();
        for (i, (dx, dy)) in turns.into_iter().enumerate() {
            assert_ok!(ingress.submit_move(&session.id, dx, dy, i as u64 * 1_000).await);
            if let Some(task) = outstanding.take() {
                let next = advance(&task.state_snapshot, &mut rng);
                outcomes.push(store.apply(&session.id, next).await.unwrap());
            }
            let delivery = channel.fetch(consumer, 8, Duration::ZERO).await.remove(0);
            channel.ack(consumer, delivery.delivery_tag).unwrap();
            outstanding = Some(TaskMessage::from_json(&delivery.payload).unwrap());
        }

        assert_eq!(
            outcomes,
            vec![
                MergeOutcome::Updated,
                MergeOutcome::Stale,
                MergeOutcome::Updated,
                MergeOutcome::Stale
            ]
        );
        let stored = store.get(&session.id).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_ne!(stored.body, session.body);
        assert_eq!(stored.direction, Direction::Down);
    }

    #[tokio::test]
    async fn test_reverse_is_ignored() {
        let (store, _channel, ingress) = setup().await;
        let session = store.create().await;
        store
            .with_session(&session.id, |s| s.direction = Direction::Down)
            .await
            .unwrap();

        let accepted = ingress.submit_move(&session.id, 0, -1, 0).await.unwrap();

        assert_eq!(accepted.direction, Direction::Down);
        assert_eq!(
            store.get(&session.id).await.unwrap().direction,
            Direction::Down
        );
    }

    #[tokio::test]
    async fn test_throttle_window() {
        let (store, channel, ingress) = setup().await;
        let session = store.create().await;

        assert_ok!(ingress.submit_move(&session.id, 0, 1, 0).await);
        let before = store.get(&session.id).await.unwrap();

        let err = assert_err!(ingress.submit_move(&session.id, 1, 0, 500).await);
        assert!(matches!(err, CoordinatorError::RateLimited));
        assert_eq!(store.get(&session.id).await.unwrap(), before);
        assert_eq!(channel.pending(), 1);

        let accepted = assert_ok!(ingress.submit_move(&session.id, 1, 0, 1_100).await);
        assert_eq!(accepted.direction, Direction::Right);
        assert_eq!(channel.pending(), 2);
    }

    #[tokio::test]
    async fn test_zero_vector_keeps_direction() {
        let (store, channel, ingress) = setup().await;
        let session = store.create().await;

        let accepted = ingress.submit_move(&session.id, 0, 0, 0).await.unwrap();
        assert_eq!(accepted.direction, session.direction);

        let accepted = ingress.submit_move(&session.id, 3, 3, 2_000).await.unwrap();
        assert_eq!(accepted.direction, session.direction);
        assert_eq!(channel.pending(), 2);
    }

    #[tokio::test]
    async fn test_unknown_and_finished_sessions() {
        let (store, channel, ingress) = setup().await;

        let err = assert_err!(ingress.submit_move("missing", 1, 0, 0).await);
        assert!(matches!(err, CoordinatorError::NotFound(_)));

        let session = store.create().await;
        store
            .with_session(&session.id, |s| s.terminal = true)
            .await
            .unwrap();
        let err = assert_err!(ingress.submit_move(&session.id, 0, 1, 0).await);
        assert!(matches!(err, CoordinatorError::SessionOver(_)));
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_channel_keeps_direction() {
        let (store, channel, ingress) = setup().await;
        let session = store.create().await;
        channel.close();

        let err = assert_err!(ingress.submit_move(&session.id, 0, 1, 0).await);
        assert!(matches!(err, CoordinatorError::TransportUnavailable(_)));

        let stored = store.get(&session.id).await.unwrap();
        assert_eq!(stored.direction, Direction::Down);
        assert_eq!(stored.last_move_at, Some(0));
    }
}

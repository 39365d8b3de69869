//! Authoritative session storage.
//!
//! The store is the only owner of `Session` values. The map itself sits
//! behind a read-write lock that is only held long enough to find or insert
//! an entry; every session then has its own mutex, so mutations of one
//! session are serialized while different sessions proceed in parallel.

use crate::error::CoordinatorError;
use log::{debug, info};
use shared::engine;
use shared::protocol::MergeOutcome;
use shared::{NextState, Session, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    board_size: i32,
}

impl SessionStore {
    pub fn new(board_size: i32) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            board_size,
        }
    }

    /// Creates a session with a fresh id and the initial layout.
    pub async fn create(&self) -> Session {
        let id = Uuid::new_v4().simple().to_string();
        let session = engine::initial_session(id.clone(), self.board_size, &mut rand::thread_rng());

        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(session.clone())));
        info!("Session {} created", id);
        session
    }

    /// Returns a deep copy of the session.
    pub async fn get(&self, id: &str) -> Result<Session, CoordinatorError> {
        let entry = self.entry(id).await?;
        let session = entry.lock().await;
        Ok(session.clone())
    }

    /// Runs `f` inside the session's exclusive section.
    ///
    /// The closure is synchronous, so the section cannot be held across an
    /// await point by the caller.
    pub async fn with_session<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, CoordinatorError> {
        let entry = self.entry(id).await?;
        let mut session = entry.lock().await;
        Ok(f(&mut session))
    }

    /// Merges a computed transition into the session.
    ///
    /// The result is only applied when it was computed from the current
    /// version; anything else is reported as `Stale` and leaves the session
    /// untouched.
    pub async fn apply(&self, id: &str, next: NextState) -> Result<MergeOutcome, CoordinatorError> {
        let entry = self.entry(id).await?;
        let mut session = entry.lock().await;

        if session.terminal || next.based_on != session.version {
            debug!(
                "Dropping stale result for {} (based on {}, current {}, terminal {})",
                id, next.based_on, session.version, session.terminal
            );
            return Ok(MergeOutcome::Stale);
        }
        if next.score < session.score || next.score > session.score + 1 {
            return Err(CoordinatorError::InvalidResult(format!(
                "score may not go from {} to {}",
                session.score, next.score
            )));
        }

        session.body = next.body;
        session.food = next.food;
        session.score = next.score;
        session.terminal = next.terminal;
        session.version += 1;
        Ok(MergeOutcome::Updated)
    }

    /// Deep copies of every session that is still running.
    pub async fn active_snapshots(&self) -> Vec<Session> {
        let entries: Vec<Arc<Mutex<Session>>> =
            self.sessions.read().await.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            let session = entry.lock().await;
            if !session.terminal {
                snapshots.push(session.clone());
            }
        }
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub fn board_size(&self) -> i32 {
        self.board_size
    }

    async fn entry(&self, id: &str) -> Result<Arc<Mutex<Session>>, CoordinatorError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Cell;
    use tokio_test::{assert_err, assert_ok};

    fn orphan_result() -> NextState {
        NextState {
            based_on: 0,
            body: vec![Cell::new(1, 1)],
            food: Cell::new(2, 2),
            score: 0,
            terminal: false,
        }
    }

    fn grown(session: &Session) -> NextState {
        let mut next = session.current_state();
        next.body.insert(0, next.body[0].step(session.direction));
        next.score += 1;
        next
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = SessionStore::new(20);
        assert!(store.is_empty().await);

        let created = store.create().await;
        let fetched = assert_ok!(store.get(&created.id).await);

        assert_eq!(created, fetched);
        assert_eq!(store.len().await, 1);
        assert_eq!(fetched.version, 0);
        assert!(!fetched.body.contains(&fetched.food));
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let store = SessionStore::new(20);
        let err = assert_err!(store.get("missing").await);
        assert!(matches!(err, CoordinatorError::NotFound(_)));

        let err = assert_err!(store.apply("missing", orphan_result()).await);
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_apply_bumps_version() {
        let store = SessionStore::new(20);
        let session = store.create().await;

        let next = grown(&session);
        let outcome = assert_ok!(store.apply(&session.id, next.clone()).await);
        assert_eq!(outcome, MergeOutcome::Updated);

        let stored = store.get(&session.id).await.unwrap();
        assert_eq!(stored.body, next.body);
        assert_eq!(stored.score, 1);
        assert_eq!(stored.version, 1);
        assert_eq!(stored.direction, session.direction);
    }

    #[tokio::test]
    async fn test_stale_result_is_dropped() {
        let store = SessionStore::new(20);
        let session = store.create().await;

        let first = grown(&session);
        let duplicate = first.clone();
        assert_eq!(
            store.apply(&session.id, first).await.unwrap(),
            MergeOutcome::Updated
        );
        assert_eq!(
            store.apply(&session.id, duplicate).await.unwrap(),
            MergeOutcome::Stale
        );

        let stored = store.get(&session.id).await.unwrap();
        assert_eq!(stored.score, 1);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_terminal_is_final() {
        let store = SessionStore::new(20);
        let session = store.create().await;

        let mut over = session.current_state();
        over.terminal = true;
        store.apply(&session.id, over).await.unwrap();

        let mut revive = store.get(&session.id).await.unwrap().current_state();
        revive.terminal = false;
        assert_eq!(
            store.apply(&session.id, revive).await.unwrap(),
            MergeOutcome::Stale
        );
        assert!(store.get(&session.id).await.unwrap().terminal);
    }

    #[tokio::test]
    async fn test_score_jump_is_rejected() {
        let store = SessionStore::new(20);
        let session = store.create().await;

        let mut next = session.current_state();
        next.score = 5;
        let err = assert_err!(store.apply(&session.id, next).await);
        assert!(matches!(err, CoordinatorError::InvalidResult(_)));
        assert_eq!(store.get(&session.id).await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_active_snapshots_skip_terminal() {
        let store = SessionStore::new(20);
        let running = store.create().await;
        let finished = store.create().await;

        let mut over = finished.current_state();
        over.terminal = true;
        store.apply(&finished.id, over).await.unwrap();

        let active = store.active_snapshots().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, running.id);
    }

    #[tokio::test]
    async fn test_with_session_mutates_in_place() {
        let store = SessionStore::new(20);
        let session = store.create().await;

        let version = store
            .with_session(&session.id, |s| {
                s.food = Cell::new(0, 0);
                s.version += 1;
                s.version
            })
            .await
            .unwrap();

        assert_eq!(version, 1);
        assert_eq!(store.get(&session.id).await.unwrap().food, Cell::new(0, 0));
    }

    #[tokio::test]
    async fn test_concurrent_results_merge_once() {
        let store = Arc::new(SessionStore::new(20));
        let session = store.create().await;
        let next = grown(&session);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let id = session.id.clone();
            let next = next.clone();
            handles.push(tokio::spawn(async move { store.apply(&id, next).await }));
        }

        let mut updated = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == MergeOutcome::Updated {
                updated += 1;
            }
        }

        assert_eq!(updated, 1);
        let stored = store.get(&session.id).await.unwrap();
        assert_eq!(stored.score, 1);
        assert_eq!(stored.version, 1);
    }
}

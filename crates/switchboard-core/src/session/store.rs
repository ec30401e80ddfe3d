//! Session store: the only path through which session records change.
//!
//! Every change is a read-modify-write guarded by the record's `version`.
//! A lost compare-and-swap re-reads the record and re-runs the caller's
//! closure against the fresh snapshot, so the closure sees whatever the
//! concurrent writer did (including having already applied the same
//! message) and can turn the write into a no-op. The retry budget is
//! bounded; running out surfaces as [`EngineError::ConflictRetriesExhausted`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use switchboard_types::error::RepositoryError;
use switchboard_types::session::Session;
use uuid::Uuid;

use crate::monitor::deadline::DeadlineIndex;
use crate::repository::session::SessionRepository;
use crate::retry::RetryPolicy;
use crate::triage::error::EngineError;

/// What an update closure decided for the snapshot it was given.
#[derive(Debug)]
pub enum Mutation<T> {
    /// Write this record (the store sets its version) and return `T`.
    Write(Session, T),
    /// Leave the record untouched and return `T`.
    Skip(T),
}

/// Result of [`SessionStore::open`].
#[derive(Debug, Clone)]
pub enum OpenedSession {
    Created(Session),
    /// The contact already had an active session; the new one was discarded.
    Existing(Session),
}

pub struct SessionStore<S: SessionRepository> {
    repo: S,
    retry: RetryPolicy,
    deadlines: Arc<DeadlineIndex>,
}

impl<S: SessionRepository> SessionStore<S> {
    pub fn new(repo: S, retry: RetryPolicy, deadlines: Arc<DeadlineIndex>) -> Self {
        Self {
            repo,
            retry,
            deadlines,
        }
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<Session>, EngineError> {
        Ok(self
            .retry
            .run("get_session", || self.repo.get_session(id))
            .await?)
    }

    pub async fn active_for(&self, contact_id: &str) -> Result<Option<Session>, EngineError> {
        Ok(self
            .retry
            .run("get_active_session", || self.repo.get_active_session(contact_id))
            .await?)
    }

    pub async fn list_active(&self) -> Result<Vec<Session>, EngineError> {
        Ok(self
            .retry
            .run("list_active_sessions", || self.repo.list_active_sessions())
            .await?)
    }

    /// Whether the contact already had `message_key` applied.
    pub async fn message_applied(&self, contact_id: &str, message_key: &str) -> Result<bool, EngineError> {
        Ok(self
            .retry
            .run("message_applied", || self.repo.message_applied(contact_id, message_key))
            .await?)
    }

    pub async fn record_applied(
        &self,
        contact_id: &str,
        message_key: &str,
        at: DateTime<Utc>,
        keep: usize,
    ) -> Result<(), EngineError> {
        Ok(self
            .retry
            .run("record_applied_message", || {
                self.repo.record_applied_message(contact_id, message_key, at, keep)
            })
            .await?)
    }

    /// Insert a freshly started session, or return the session that won
    /// the race for the same contact.
    pub async fn open(&self, session: Session) -> Result<OpenedSession, EngineError> {
        for attempt in 1..=self.retry.max_attempts() {
            let inserted = self
                .retry
                .run("insert_session", || self.repo.insert_session(&session))
                .await;

            match inserted {
                Ok(()) => {
                    self.deadlines
                        .track_session(session.id, session.last_activity_at);
                    tracing::debug!(
                        session_id = %session.id,
                        contact_id = %session.contact_id,
                        "opened session"
                    );
                    return Ok(OpenedSession::Created(session));
                }
                Err(RepositoryError::Conflict(_)) => {
                    if let Some(existing) = self.active_for(&session.contact_id).await? {
                        return Ok(OpenedSession::Existing(existing));
                    }
                    // The winner closed between our insert and re-read.
                    self.retry.wait(attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::ConflictRetriesExhausted {
            attempts: self.retry.max_attempts(),
        })
    }

    /// Read-modify-write a session.
    ///
    /// `apply` may run several times, each time against the latest stored
    /// snapshot, and must therefore be free of side effects. Writing to a
    /// session that is already terminal fails with
    /// [`EngineError::SessionClosed`].
    pub async fn update<T, F>(&self, id: Uuid, mut apply: F) -> Result<T, EngineError>
    where
        F: FnMut(&Session) -> Result<Mutation<T>, EngineError>,
    {
        let mut attempt = 1;
        loop {
            let current = self.get(&id).await?.ok_or(EngineError::SessionNotFound(id))?;

            let (mut next, value) = match apply(&current)? {
                Mutation::Skip(value) => return Ok(value),
                Mutation::Write(next, value) => (next, value),
            };
            if !current.is_active() {
                return Err(EngineError::SessionClosed(id));
            }
            next.version = current.version + 1;

            match self.repo.compare_and_swap(&next, current.version).await {
                Ok(()) => {
                    if next.is_active() {
                        self.deadlines.track_session(next.id, next.last_activity_at);
                    } else {
                        self.deadlines.cancel_session(&next.id);
                    }
                    return Ok(value);
                }
                Err(e) if self.retry.should_retry(attempt, &e) => {
                    tracing::debug!(session_id = %id, attempt, error = %e, "session write conflicted, re-reading");
                    self.retry.wait(attempt).await;
                    attempt += 1;
                }
                Err(RepositoryError::StaleVersion { .. }) => {
                    tracing::warn!(session_id = %id, attempts = attempt, "session write retries exhausted");
                    return Err(EngineError::ConflictRetriesExhausted { attempts: attempt });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Utc;
    use switchboard_types::session::SessionState;

    use super::*;
    use crate::repository::memory::InMemorySessionRepository;

    fn store(repo: InMemorySessionRepository) -> SessionStore<InMemorySessionRepository> {
        SessionStore::new(repo, RetryPolicy::immediate(3), Arc::new(DeadlineIndex::new()))
    }

    fn fresh(contact: &str) -> Session {
        Session::start(contact, "t1", "whatsapp", "f", 1, "inicio", None, Utc::now())
    }

    #[tokio::test]
    async fn second_open_returns_existing_session() {
        let store = store(InMemorySessionRepository::new());
        let first = match store.open(fresh("c1")).await.unwrap() {
            OpenedSession::Created(s) => s,
            other => panic!("expected created, got {other:?}"),
        };

        match store.open(fresh("c1")).await.unwrap() {
            OpenedSession::Existing(s) => assert_eq!(s.id, first.id),
            other => panic!("expected existing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_bumps_version_and_writes() {
        let store = store(InMemorySessionRepository::new());
        let s = fresh("c1");
        store.open(s.clone()).await.unwrap();

        let step = store
            .update(s.id, |current| {
                let mut next = current.clone();
                next.current_step = "menu".to_string();
                Ok(Mutation::Write(next, "menu"))
            })
            .await
            .unwrap();
        assert_eq!(step, "menu");

        let stored = store.get(&s.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.current_step, "menu");
    }

    #[tokio::test]
    async fn lost_race_reruns_closure_on_fresh_snapshot() {
        let repo = InMemorySessionRepository::new();
        let store = store(repo.clone());
        let s = fresh("c1");
        store.open(s.clone()).await.unwrap();

        let calls = AtomicU32::new(0);
        let seen_version = store
            .update(s.id, |current| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    // Simulate a concurrent writer landing first.
                    let mut other = current.clone();
                    other.version = current.version + 1;
                    other.context.insert("x".into(), "1".into());
                    futures_util::FutureExt::now_or_never(
                        repo.compare_and_swap(&other, current.version),
                    )
                    .unwrap()
                    .unwrap();
                }
                Ok(Mutation::Write(current.clone(), current.version))
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(seen_version, 2);
        let stored = store.get(&s.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 3);
        assert_eq!(stored.context.get("x").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn terminal_sessions_reject_writes() {
        let store = store(InMemorySessionRepository::new());
        let s = fresh("c1");
        store.open(s.clone()).await.unwrap();

        store
            .update(s.id, |current| {
                let mut next = current.clone();
                next.state = SessionState::Finalizada;
                Ok(Mutation::Write(next, ()))
            })
            .await
            .unwrap();

        let err = store
            .update(s.id, |current| Ok(Mutation::Write(current.clone(), ())))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionClosed(id) if id == s.id));
    }

    #[tokio::test]
    async fn closing_cancels_inactivity_tracking() {
        let deadlines = Arc::new(DeadlineIndex::new());
        let store = SessionStore::new(
            InMemorySessionRepository::new(),
            RetryPolicy::immediate(3),
            Arc::clone(&deadlines),
        );
        let s = fresh("c1");
        store.open(s.clone()).await.unwrap();
        assert!(deadlines.is_tracking_session(&s.id));

        store
            .update(s.id, |current| {
                let mut next = current.clone();
                next.state = SessionState::Expirada;
                Ok(Mutation::Write(next, ()))
            })
            .await
            .unwrap();
        assert!(!deadlines.is_tracking_session(&s.id));
    }

    #[tokio::test]
    async fn missing_session_is_reported() {
        let store = store(InMemorySessionRepository::new());
        let id = Uuid::now_v7();
        let err = store
            .update(id, |current| Ok(Mutation::Write(current.clone(), ())))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(_)));
    }
}

//! Audit trail of every triage transition.
//!
//! One `in` entry per processed inbound message and one `out` entry per
//! message sent. Entries are write-once. A failed append never fails the
//! conversation: it is retried within the store budget and then logged.

use chrono::{DateTime, Utc};
use switchboard_types::audit::{Direction, TriageLogEntry};
use switchboard_types::error::RepositoryError;
use switchboard_types::session::Session;
use uuid::Uuid;

use crate::repository::triage_log::TriageLogRepository;
use crate::retry::RetryPolicy;

pub struct TriageLogger<L: TriageLogRepository> {
    repo: L,
    retry: RetryPolicy,
}

impl<L: TriageLogRepository> TriageLogger<L> {
    pub fn new(repo: L, retry: RetryPolicy) -> Self {
        Self { repo, retry }
    }

    pub async fn inbound(
        &self,
        session: &Session,
        step_id: &str,
        raw_input: &str,
        matched_option: Option<&str>,
        at: DateTime<Utc>,
    ) {
        self.record(TriageLogEntry {
            id: Uuid::now_v7(),
            session_id: session.id,
            tenant_id: session.tenant_id.clone(),
            step_id: step_id.to_string(),
            direction: Direction::In,
            raw_input: Some(raw_input.to_string()),
            matched_option: matched_option.map(str::to_string),
            timestamp: at,
        })
        .await;
    }

    pub async fn outbound(&self, session: &Session, step_id: &str, text: &str, at: DateTime<Utc>) {
        self.record(TriageLogEntry {
            id: Uuid::now_v7(),
            session_id: session.id,
            tenant_id: session.tenant_id.clone(),
            step_id: step_id.to_string(),
            direction: Direction::Out,
            raw_input: Some(text.to_string()),
            matched_option: None,
            timestamp: at,
        })
        .await;
    }

    async fn record(&self, entry: TriageLogEntry) {
        if let Err(e) = self
            .retry
            .run("append_triage_log", || self.repo.append(&entry))
            .await
        {
            tracing::error!(
                session_id = %entry.session_id,
                step = %entry.step_id,
                direction = %entry.direction,
                error = %e,
                "failed to append triage log entry"
            );
        }
    }

    pub async fn session_log(&self, session_id: &Uuid) -> Result<Vec<TriageLogEntry>, RepositoryError> {
        self.retry
            .run("list_triage_log", || self.repo.list_by_session(session_id))
            .await
    }

    pub async fn tenant_log(
        &self,
        tenant_id: &str,
        limit: u32,
    ) -> Result<Vec<TriageLogEntry>, RepositoryError> {
        self.retry
            .run("list_tenant_log", || self.repo.list_by_tenant(tenant_id, limit))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryTriageLogRepository;

    #[tokio::test]
    async fn records_both_directions_in_order() {
        let repo = InMemoryTriageLogRepository::new();
        let logger = TriageLogger::new(repo.clone(), RetryPolicy::immediate(2));
        let session = Session::start("c1", "empresa-1", "whatsapp", "f", 1, "inicio", None, Utc::now());

        logger.inbound(&session, "inicio", "1", Some("1"), Utc::now()).await;
        logger.outbound(&session, "suporte", "Escolha", Utc::now()).await;

        let entries = logger.session_log(&session.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].direction, Direction::In);
        assert_eq!(entries[0].matched_option.as_deref(), Some("1"));
        assert_eq!(entries[1].direction, Direction::Out);
        assert_eq!(entries[1].step_id, "suporte");

        let by_tenant = logger.tenant_log("empresa-1", 10).await.unwrap();
        assert_eq!(by_tenant.len(), 2);
    }
}

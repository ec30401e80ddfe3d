//! Storage backends selectable at startup.
//!
//! Services are generic over repository traits; the binary pins them to
//! these enums so one build can run against SQLite or entirely in memory
//! (`serve --memory`). Each enum forwards every call to the variant it holds.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use switchboard_core::repository::flow::FlowRepository;
use switchboard_core::repository::memory::{
    InMemoryFlowRepository, InMemorySessionRepository, InMemoryTicketRepository,
    InMemoryTriageLogRepository,
};
use switchboard_core::repository::session::SessionRepository;
use switchboard_core::repository::ticket::TicketRepository;
use switchboard_core::repository::triage_log::TriageLogRepository;
use switchboard_infra::sqlite::{
    DatabasePool, SqliteFlowRepository, SqliteSessionRepository, SqliteTicketRepository,
    SqliteTriageLogRepository,
};
use switchboard_types::audit::TriageLogEntry;
use switchboard_types::error::RepositoryError;
use switchboard_types::flow::FlowDefinition;
use switchboard_types::session::Session;
use switchboard_types::ticket::{AssignmentRecord, Queue, Ticket};
use uuid::Uuid;

macro_rules! forward {
    ($self:ident, $repo:ident => $call:expr) => {
        match $self {
            Self::Sqlite($repo) => $call,
            Self::Memory($repo) => $call,
        }
    };
}

/// One repository of each kind, all on the same backend.
pub struct Backends {
    pub kind: &'static str,
    pub flows: FlowBackend,
    pub sessions: SessionBackend,
    pub tickets: TicketBackend,
    pub log: LogBackend,
}

impl Backends {
    pub fn sqlite(pool: DatabasePool) -> Self {
        Self {
            kind: "sqlite",
            flows: FlowBackend::Sqlite(SqliteFlowRepository::new(pool.clone())),
            sessions: SessionBackend::Sqlite(SqliteSessionRepository::new(pool.clone())),
            tickets: TicketBackend::Sqlite(SqliteTicketRepository::new(pool.clone())),
            log: LogBackend::Sqlite(SqliteTriageLogRepository::new(pool)),
        }
    }

    pub fn memory() -> Self {
        Self {
            kind: "memory",
            flows: FlowBackend::Memory(InMemoryFlowRepository::new()),
            sessions: SessionBackend::Memory(InMemorySessionRepository::new()),
            tickets: TicketBackend::Memory(InMemoryTicketRepository::new()),
            log: LogBackend::Memory(InMemoryTriageLogRepository::new()),
        }
    }
}

pub enum FlowBackend {
    Sqlite(SqliteFlowRepository),
    Memory(InMemoryFlowRepository),
}

impl FlowRepository for FlowBackend {
    async fn save_version(&self, flow: &FlowDefinition) -> Result<(), RepositoryError> {
        forward!(self, r => r.save_version(flow).await)
    }

    async fn get_version(
        &self,
        flow_id: &str,
        version: u32,
    ) -> Result<Option<FlowDefinition>, RepositoryError> {
        forward!(self, r => r.get_version(flow_id, version).await)
    }

    async fn get_latest(&self, flow_id: &str) -> Result<Option<FlowDefinition>, RepositoryError> {
        forward!(self, r => r.get_latest(flow_id).await)
    }

    async fn list_versions(&self, flow_id: &str) -> Result<Vec<u32>, RepositoryError> {
        forward!(self, r => r.list_versions(flow_id).await)
    }

    async fn list_flows(&self) -> Result<Vec<String>, RepositoryError> {
        forward!(self, r => r.list_flows().await)
    }
}

pub enum SessionBackend {
    Sqlite(SqliteSessionRepository),
    Memory(InMemorySessionRepository),
}

impl SessionRepository for SessionBackend {
    async fn insert_session(&self, session: &Session) -> Result<(), RepositoryError> {
        forward!(self, r => r.insert_session(session).await)
    }

    async fn get_session(&self, id: &Uuid) -> Result<Option<Session>, RepositoryError> {
        forward!(self, r => r.get_session(id).await)
    }

    async fn get_active_session(&self, contact_id: &str) -> Result<Option<Session>, RepositoryError> {
        forward!(self, r => r.get_active_session(contact_id).await)
    }

    async fn compare_and_swap(
        &self,
        session: &Session,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        forward!(self, r => r.compare_and_swap(session, expected_version).await)
    }

    async fn list_active_sessions(&self) -> Result<Vec<Session>, RepositoryError> {
        forward!(self, r => r.list_active_sessions().await)
    }

    async fn message_applied(&self, contact_id: &str, message_key: &str) -> Result<bool, RepositoryError> {
        forward!(self, r => r.message_applied(contact_id, message_key).await)
    }

    async fn record_applied_message(
        &self,
        contact_id: &str,
        message_key: &str,
        applied_at: DateTime<Utc>,
        keep: usize,
    ) -> Result<(), RepositoryError> {
        forward!(self, r => r.record_applied_message(contact_id, message_key, applied_at, keep).await)
    }
}

pub enum TicketBackend {
    Sqlite(SqliteTicketRepository),
    Memory(InMemoryTicketRepository),
}

impl TicketRepository for TicketBackend {
    async fn save_queue(&self, queue: &Queue) -> Result<(), RepositoryError> {
        forward!(self, r => r.save_queue(queue).await)
    }

    async fn get_queue(&self, id: &str) -> Result<Option<Queue>, RepositoryError> {
        forward!(self, r => r.get_queue(id).await)
    }

    async fn list_queues(&self) -> Result<Vec<Queue>, RepositoryError> {
        forward!(self, r => r.list_queues().await)
    }

    async fn create_ticket(&self, ticket: &Ticket) -> Result<(), RepositoryError> {
        forward!(self, r => r.create_ticket(ticket).await)
    }

    async fn get_ticket(&self, id: &Uuid) -> Result<Option<Ticket>, RepositoryError> {
        forward!(self, r => r.get_ticket(id).await)
    }

    async fn find_open_by_session(&self, session_id: &Uuid) -> Result<Option<Ticket>, RepositoryError> {
        forward!(self, r => r.find_open_by_session(session_id).await)
    }

    async fn compare_and_swap_ticket(
        &self,
        ticket: &Ticket,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        forward!(self, r => r.compare_and_swap_ticket(ticket, expected_version).await)
    }

    async fn list_open_tickets(&self) -> Result<Vec<Ticket>, RepositoryError> {
        forward!(self, r => r.list_open_tickets().await)
    }

    async fn list_queued(&self, queue_id: &str) -> Result<Vec<Ticket>, RepositoryError> {
        forward!(self, r => r.list_queued(queue_id).await)
    }

    async fn active_load(&self, queue_id: &str) -> Result<HashMap<String, u32>, RepositoryError> {
        forward!(self, r => r.active_load(queue_id).await)
    }

    async fn commit_assignment(
        &self,
        queue: &Queue,
        expected_queue_version: u64,
        ticket: &Ticket,
        expected_ticket_version: u64,
    ) -> Result<(), RepositoryError> {
        forward!(self, r => r.commit_assignment(queue, expected_queue_version, ticket, expected_ticket_version).await)
    }

    async fn append_assignment(&self, record: &AssignmentRecord) -> Result<(), RepositoryError> {
        forward!(self, r => r.append_assignment(record).await)
    }

    async fn list_assignments(
        &self,
        ticket_id: &Uuid,
    ) -> Result<Vec<AssignmentRecord>, RepositoryError> {
        forward!(self, r => r.list_assignments(ticket_id).await)
    }
}

pub enum LogBackend {
    Sqlite(SqliteTriageLogRepository),
    Memory(InMemoryTriageLogRepository),
}

impl TriageLogRepository for LogBackend {
    async fn append(&self, entry: &TriageLogEntry) -> Result<(), RepositoryError> {
        forward!(self, r => r.append(entry).await)
    }

    async fn list_by_session(&self, session_id: &Uuid) -> Result<Vec<TriageLogEntry>, RepositoryError> {
        forward!(self, r => r.list_by_session(session_id).await)
    }

    async fn list_by_tenant(
        &self,
        tenant_id: &str,
        limit: u32,
    ) -> Result<Vec<TriageLogEntry>, RepositoryError> {
        forward!(self, r => r.list_by_tenant(tenant_id, limit).await)
    }
}

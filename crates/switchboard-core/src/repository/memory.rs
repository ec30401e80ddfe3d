//! In-memory repository implementations backed by `DashMap`.
//!
//! Every handle is cheap to clone and clones share state, so a test can
//! keep one handle for assertions while the engine owns another. Lock
//! guards are never held across an `.await`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use switchboard_types::audit::TriageLogEntry;
use switchboard_types::error::RepositoryError;
use switchboard_types::flow::FlowDefinition;
use switchboard_types::session::Session;
use switchboard_types::ticket::{AssignmentRecord, Queue, Ticket, TicketStatus};
use uuid::Uuid;

use super::flow::FlowRepository;
use super::session::SessionRepository;
use super::ticket::TicketRepository;
use super::triage_log::TriageLogRepository;

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct InMemoryFlowRepository {
    flows: Arc<DashMap<String, BTreeMap<u32, FlowDefinition>>>,
}

impl InMemoryFlowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlowRepository for InMemoryFlowRepository {
    async fn save_version(&self, flow: &FlowDefinition) -> Result<(), RepositoryError> {
        let mut versions = self.flows.entry(flow.id.clone()).or_default();
        if versions.contains_key(&flow.version) {
            return Err(RepositoryError::Conflict(format!(
                "flow '{}' version {} exists",
                flow.id, flow.version
            )));
        }
        versions.insert(flow.version, flow.clone());
        Ok(())
    }

    async fn get_version(
        &self,
        flow_id: &str,
        version: u32,
    ) -> Result<Option<FlowDefinition>, RepositoryError> {
        Ok(self
            .flows
            .get(flow_id)
            .and_then(|versions| versions.get(&version).cloned()))
    }

    async fn get_latest(&self, flow_id: &str) -> Result<Option<FlowDefinition>, RepositoryError> {
        Ok(self
            .flows
            .get(flow_id)
            .and_then(|versions| versions.values().next_back().cloned()))
    }

    async fn list_versions(&self, flow_id: &str) -> Result<Vec<u32>, RepositoryError> {
        Ok(self
            .flows
            .get(flow_id)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn list_flows(&self) -> Result<Vec<String>, RepositoryError> {
        let mut ids: Vec<String> = self.flows.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Sessions keyed by id, plus a `contact_id -> active session id` index that
/// enforces the single-active-session rule.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionRepository {
    sessions: Arc<DashMap<Uuid, Session>>,
    active: Arc<DashMap<String, Uuid>>,
    /// Applied message keys per contact, oldest first.
    applied: Arc<DashMap<String, VecDeque<String>>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionRepository for InMemorySessionRepository {
    async fn insert_session(&self, session: &Session) -> Result<(), RepositoryError> {
        if !session.is_active() {
            self.sessions.insert(session.id, session.clone());
            return Ok(());
        }

        match self.active.entry(session.contact_id.clone()) {
            Entry::Occupied(mut slot) => {
                // The index may point at a session closed concurrently.
                let still_active = self
                    .sessions
                    .get(slot.get())
                    .map(|s| s.is_active())
                    .unwrap_or(false);
                if still_active {
                    return Err(RepositoryError::Conflict(format!(
                        "contact '{}' already has an active session",
                        session.contact_id
                    )));
                }
                self.sessions.insert(session.id, session.clone());
                slot.insert(session.id);
            }
            Entry::Vacant(slot) => {
                self.sessions.insert(session.id, session.clone());
                slot.insert(session.id);
            }
        }
        Ok(())
    }

    async fn get_session(&self, id: &Uuid) -> Result<Option<Session>, RepositoryError> {
        Ok(self.sessions.get(id).map(|s| s.clone()))
    }

    async fn get_active_session(&self, contact_id: &str) -> Result<Option<Session>, RepositoryError> {
        let Some(id) = self.active.get(contact_id).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self
            .sessions
            .get(&id)
            .filter(|s| s.is_active())
            .map(|s| s.clone()))
    }

    async fn compare_and_swap(
        &self,
        session: &Session,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let closed = {
            let mut stored = self
                .sessions
                .get_mut(&session.id)
                .ok_or(RepositoryError::NotFound)?;
            if stored.version != expected_version {
                return Err(RepositoryError::StaleVersion {
                    expected: expected_version,
                });
            }
            *stored = session.clone();
            !session.is_active()
        };

        if closed {
            self.active
                .remove_if(&session.contact_id, |_, id| *id == session.id);
        }
        Ok(())
    }

    async fn list_active_sessions(&self) -> Result<Vec<Session>, RepositoryError> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.is_active())
            .map(|s| s.clone())
            .collect())
    }

    async fn message_applied(&self, contact_id: &str, message_key: &str) -> Result<bool, RepositoryError> {
        Ok(self
            .applied
            .get(contact_id)
            .map(|keys| keys.iter().any(|k| k == message_key))
            .unwrap_or(false))
    }

    async fn record_applied_message(
        &self,
        contact_id: &str,
        message_key: &str,
        _applied_at: DateTime<Utc>,
        keep: usize,
    ) -> Result<(), RepositoryError> {
        let mut keys = self.applied.entry(contact_id.to_string()).or_default();
        if !keys.iter().any(|k| k == message_key) {
            keys.push_back(message_key.to_string());
        }
        while keys.len() > keep.max(1) {
            keys.pop_front();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Queues and tickets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct InMemoryTicketRepository {
    queues: Arc<DashMap<String, Queue>>,
    tickets: Arc<DashMap<Uuid, Ticket>>,
    assignments: Arc<DashMap<Uuid, Vec<AssignmentRecord>>>,
}

impl InMemoryTicketRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TicketRepository for InMemoryTicketRepository {
    async fn save_queue(&self, queue: &Queue) -> Result<(), RepositoryError> {
        self.queues.insert(queue.id.clone(), queue.clone());
        Ok(())
    }

    async fn get_queue(&self, id: &str) -> Result<Option<Queue>, RepositoryError> {
        Ok(self.queues.get(id).map(|q| q.clone()))
    }

    async fn list_queues(&self) -> Result<Vec<Queue>, RepositoryError> {
        let mut queues: Vec<Queue> = self.queues.iter().map(|q| q.clone()).collect();
        queues.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(queues)
    }

    async fn create_ticket(&self, ticket: &Ticket) -> Result<(), RepositoryError> {
        match self.tickets.entry(ticket.id) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "ticket {} exists",
                ticket.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(ticket.clone());
                Ok(())
            }
        }
    }

    async fn get_ticket(&self, id: &Uuid) -> Result<Option<Ticket>, RepositoryError> {
        Ok(self.tickets.get(id).map(|t| t.clone()))
    }

    async fn find_open_by_session(&self, session_id: &Uuid) -> Result<Option<Ticket>, RepositoryError> {
        Ok(self
            .tickets
            .iter()
            .find(|t| t.session_id == Some(*session_id) && !t.is_closed())
            .map(|t| t.clone()))
    }

    async fn compare_and_swap_ticket(
        &self,
        ticket: &Ticket,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let mut stored = self
            .tickets
            .get_mut(&ticket.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != expected_version {
            return Err(RepositoryError::StaleVersion {
                expected: expected_version,
            });
        }
        *stored = ticket.clone();
        Ok(())
    }

    async fn list_open_tickets(&self) -> Result<Vec<Ticket>, RepositoryError> {
        Ok(self
            .tickets
            .iter()
            .filter(|t| !t.is_closed())
            .map(|t| t.clone())
            .collect())
    }

    async fn list_queued(&self, queue_id: &str) -> Result<Vec<Ticket>, RepositoryError> {
        let mut queued: Vec<Ticket> = self
            .tickets
            .iter()
            .filter(|t| t.queue_id == queue_id && t.status == TicketStatus::Fila)
            .map(|t| t.clone())
            .collect();
        queued.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(queued)
    }

    async fn active_load(&self, queue_id: &str) -> Result<HashMap<String, u32>, RepositoryError> {
        let mut load = HashMap::new();
        for ticket in self.tickets.iter() {
            if ticket.queue_id != queue_id || ticket.is_closed() {
                continue;
            }
            if let Some(assignee) = &ticket.assignee_id {
                *load.entry(assignee.clone()).or_insert(0) += 1;
            }
        }
        Ok(load)
    }

    async fn commit_assignment(
        &self,
        queue: &Queue,
        expected_queue_version: u64,
        ticket: &Ticket,
        expected_ticket_version: u64,
    ) -> Result<(), RepositoryError> {
        // Lock order: queue, then ticket. Nothing else nests these two.
        let mut stored_queue = self
            .queues
            .get_mut(&queue.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored_queue.version != expected_queue_version {
            return Err(RepositoryError::StaleVersion {
                expected: expected_queue_version,
            });
        }
        let mut stored_ticket = self
            .tickets
            .get_mut(&ticket.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored_ticket.version != expected_ticket_version {
            return Err(RepositoryError::StaleVersion {
                expected: expected_ticket_version,
            });
        }
        *stored_queue = queue.clone();
        *stored_ticket = ticket.clone();
        Ok(())
    }

    async fn append_assignment(&self, record: &AssignmentRecord) -> Result<(), RepositoryError> {
        self.assignments
            .entry(record.ticket_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn list_assignments(
        &self,
        ticket_id: &Uuid,
    ) -> Result<Vec<AssignmentRecord>, RepositoryError> {
        Ok(self
            .assignments
            .get(ticket_id)
            .map(|records| records.clone())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Triage log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct InMemoryTriageLogRepository {
    by_session: Arc<DashMap<Uuid, Vec<TriageLogEntry>>>,
}

impl InMemoryTriageLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TriageLogRepository for InMemoryTriageLogRepository {
    async fn append(&self, entry: &TriageLogEntry) -> Result<(), RepositoryError> {
        self.by_session
            .entry(entry.session_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list_by_session(&self, session_id: &Uuid) -> Result<Vec<TriageLogEntry>, RepositoryError> {
        Ok(self
            .by_session
            .get(session_id)
            .map(|entries| entries.clone())
            .unwrap_or_default())
    }

    async fn list_by_tenant(
        &self,
        tenant_id: &str,
        limit: u32,
    ) -> Result<Vec<TriageLogEntry>, RepositoryError> {
        let mut entries: Vec<TriageLogEntry> = self
            .by_session
            .iter()
            .flat_map(|e| e.value().clone())
            .filter(|e| e.tenant_id == tenant_id)
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        entries.truncate(limit as usize);
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

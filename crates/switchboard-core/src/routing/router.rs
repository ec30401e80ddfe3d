//! Ticket router: ticket creation, assignment and lifecycle.
//!
//! Assignment is a compare-and-swap over two records at once: the queue
//! (whose version serializes every assignment in that queue, cursor
//! included) and the ticket. Capacity is checked against the load read in
//! the same attempt, so two concurrent assignments cannot both take the
//! last free slot of an attendant: one of them loses the queue CAS and
//! re-reads the load. Manual reassignment goes through the same commit.
//!
//! Every assignment appends an [`AssignmentRecord`] to the distribution log.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use switchboard_types::config::SlaConfig;
use switchboard_types::error::{RepositoryError, RoutingError};
use switchboard_types::event::TriageEvent;
use switchboard_types::ticket::{
    AssignedLevel, AssignmentKind, AssignmentRecord, Queue, Severity, Ticket, TicketStatus,
};
use uuid::Uuid;

use crate::event::EventBus;
use crate::monitor::deadline::DeadlineIndex;
use crate::repository::ticket::TicketRepository;
use crate::retry::RetryPolicy;
use crate::routing::strategy::select_assignee;

/// Context key carrying the triage-assigned priority.
pub const PRIORITY_CONTEXT_KEY: &str = "prioridade";

/// Input of [`TicketRouter::route`].
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub queue_id: String,
    pub contact_id: String,
    pub tenant_id: String,
    pub session_id: Option<Uuid>,
    pub triage_context: BTreeMap<String, String>,
}

pub struct TicketRouter<T: TicketRepository> {
    repo: T,
    events: EventBus,
    retry: RetryPolicy,
    sla: SlaConfig,
    deadlines: Arc<DeadlineIndex>,
}

impl<T: TicketRepository> TicketRouter<T> {
    pub fn new(
        repo: T,
        events: EventBus,
        retry: RetryPolicy,
        sla: SlaConfig,
        deadlines: Arc<DeadlineIndex>,
    ) -> Self {
        Self {
            repo,
            events,
            retry,
            sla,
            deadlines,
        }
    }

    pub fn sla_config(&self) -> &SlaConfig {
        &self.sla
    }

    // -----------------------------------------------------------------------
    // Queues
    // -----------------------------------------------------------------------

    pub async fn create_queue(&self, queue: Queue) -> Result<Queue, RoutingError> {
        if queue.id.trim().is_empty() {
            return Err(RoutingError::InvalidQueue("queue id must not be empty".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = queue.members.iter().find(|m| !seen.insert(m.as_str())) {
            return Err(RoutingError::InvalidQueue(format!(
                "member '{dup}' listed twice"
            )));
        }
        if self.get_queue(&queue.id).await?.is_some() {
            return Err(RoutingError::InvalidQueue(format!(
                "queue '{}' already exists",
                queue.id
            )));
        }

        self.retry
            .run("save_queue", || self.repo.save_queue(&queue))
            .await
            .map_err(storage)?;
        tracing::info!(
            queue_id = %queue.id,
            strategy = %queue.strategy,
            members = queue.members.len(),
            "created queue"
        );
        Ok(queue)
    }

    pub async fn get_queue(&self, id: &str) -> Result<Option<Queue>, RoutingError> {
        self.retry
            .run("get_queue", || self.repo.get_queue(id))
            .await
            .map_err(storage)
    }

    pub async fn list_queues(&self) -> Result<Vec<Queue>, RoutingError> {
        self.retry
            .run("list_queues", || self.repo.list_queues())
            .await
            .map_err(storage)
    }

    // -----------------------------------------------------------------------
    // Tickets
    // -----------------------------------------------------------------------

    pub async fn get_ticket(&self, id: &Uuid) -> Result<Option<Ticket>, RoutingError> {
        self.retry
            .run("get_ticket", || self.repo.get_ticket(id))
            .await
            .map_err(storage)
    }

    pub async fn list_open_tickets(&self) -> Result<Vec<Ticket>, RoutingError> {
        self.retry
            .run("list_open_tickets", || self.repo.list_open_tickets())
            .await
            .map_err(storage)
    }

    /// Create a `FILA` ticket for a triaged contact and try to assign it.
    ///
    /// Idempotent per session: when the session already produced an open
    /// ticket, that ticket is returned untouched.
    pub async fn route(&self, request: RouteRequest, now: DateTime<Utc>) -> Result<Ticket, RoutingError> {
        if let Some(session_id) = request.session_id {
            let existing = self
                .retry
                .run("find_open_by_session", || self.repo.find_open_by_session(&session_id))
                .await
                .map_err(storage)?;
            if let Some(ticket) = existing {
                tracing::debug!(%session_id, ticket_id = %ticket.id, "session already has an open ticket");
                return Ok(ticket);
            }
        }

        if self.get_queue(&request.queue_id).await?.is_none() {
            return Err(RoutingError::QueueNotFound(request.queue_id));
        }

        let severity = request
            .triage_context
            .get(PRIORITY_CONTEXT_KEY)
            .and_then(|p| p.parse::<Severity>().ok())
            .unwrap_or_default();

        let ticket = Ticket {
            id: Uuid::now_v7(),
            queue_id: request.queue_id,
            contact_id: request.contact_id,
            tenant_id: request.tenant_id,
            session_id: request.session_id,
            status: TicketStatus::Fila,
            severity,
            assigned_level: AssignedLevel::N1,
            sla_target_at: Some(now + self.sla.target_for(severity)),
            escalated_at: None,
            assignee_id: None,
            triage_context: request.triage_context,
            created_at: now,
            last_activity_at: now,
            inactivity_warned_at: None,
            closed_at: None,
            version: 1,
        };

        self.retry
            .run("create_ticket", || self.repo.create_ticket(&ticket))
            .await
            .map_err(storage)?;

        if let Some(target) = ticket.sla_target_at {
            self.deadlines.track_sla(ticket.id, target);
        }
        self.deadlines.track_ticket(ticket.id, ticket.last_activity_at);

        tracing::info!(
            ticket_id = %ticket.id,
            queue_id = %ticket.queue_id,
            severity = %ticket.severity,
            "created ticket"
        );
        self.events.publish(TriageEvent::TicketCreated {
            ticket_id: ticket.id,
            queue_id: ticket.queue_id.clone(),
            contact_id: ticket.contact_id.clone(),
            severity: ticket.severity,
        });

        let (ticket, assigned) = self.try_assign(ticket.id, "route").await?;
        if !assigned && ticket.status == TicketStatus::Fila {
            self.events.publish(TriageEvent::TicketQueued {
                ticket_id: ticket.id,
                queue_id: ticket.queue_id.clone(),
            });
        }
        Ok(ticket)
    }

    /// Assign a queued ticket if any member has room. Tickets not in `FILA`
    /// are returned as they are.
    pub async fn assign(&self, ticket_id: Uuid) -> Result<Ticket, RoutingError> {
        self.try_assign(ticket_id, "assign").await.map(|(ticket, _)| ticket)
    }

    /// Assign queued tickets of `queue_id` oldest first, stopping at the
    /// first one that finds no free attendant.
    pub async fn redistribute(&self, queue_id: &str) -> Result<Vec<Ticket>, RoutingError> {
        if self.get_queue(queue_id).await?.is_none() {
            return Err(RoutingError::QueueNotFound(queue_id.to_string()));
        }
        let queued = self
            .retry
            .run("list_queued", || self.repo.list_queued(queue_id))
            .await
            .map_err(storage)?;

        let mut assigned = Vec::new();
        for ticket in queued {
            match self.try_assign(ticket.id, "redistribute").await? {
                (ticket, true) => assigned.push(ticket),
                (ticket, false) if ticket.status == TicketStatus::Fila => break,
                // Closed or assigned elsewhere in the meantime.
                (_, false) => {}
            }
        }
        if !assigned.is_empty() {
            tracing::info!(queue_id, assigned = assigned.len(), "redistributed queued tickets");
        }
        Ok(assigned)
    }

    /// Returns the ticket and whether this call assigned it.
    async fn try_assign(&self, ticket_id: Uuid, reason: &str) -> Result<(Ticket, bool), RoutingError> {
        let mut attempt = 1;
        loop {
            let ticket = self
                .get_ticket(&ticket_id)
                .await?
                .ok_or(RoutingError::TicketNotFound(ticket_id))?;
            if ticket.status != TicketStatus::Fila {
                return Ok((ticket, false));
            }
            let queue = self
                .get_queue(&ticket.queue_id)
                .await?
                .ok_or_else(|| RoutingError::QueueNotFound(ticket.queue_id.clone()))?;
            let load = self
                .retry
                .run("active_load", || self.repo.active_load(&queue.id))
                .await
                .map_err(storage)?;

            let Some(selection) = select_assignee(&queue, &load) else {
                tracing::debug!(%ticket_id, queue_id = %queue.id, "no attendant with capacity, ticket stays queued");
                return Ok((ticket, false));
            };

            let held = load.get(&selection.assignee).copied().unwrap_or(0);
            let mut next_queue = queue.clone();
            next_queue.cursor = selection.next_cursor;
            next_queue.version = queue.version + 1;

            let mut next_ticket = ticket.clone();
            next_ticket.status = TicketStatus::EmAtendimento;
            next_ticket.assignee_id = Some(selection.assignee);
            next_ticket.version = ticket.version + 1;

            match self
                .repo
                .commit_assignment(&next_queue, queue.version, &next_ticket, ticket.version)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        %ticket_id,
                        queue_id = %next_queue.id,
                        assignee = ?next_ticket.assignee_id,
                        "assigned ticket"
                    );
                    self.events
                        .publish(TriageEvent::TicketAssigned(next_ticket.assignment()));
                    self.record_assignment(
                        &next_queue,
                        &next_ticket,
                        None,
                        AssignmentKind::Distribution,
                        reason,
                        held,
                        Utc::now(),
                    )
                    .await;
                    return Ok((next_ticket, true));
                }
                Err(e) => attempt = self.on_conflict(attempt, e, "assignment").await?,
            }
        }
    }

    /// Move a non-closed ticket to `attendant`, who must be a member of the
    /// ticket's queue with room below its capacity. A queued ticket becomes
    /// attended; the previous attendant's slot is offered to the queue.
    pub async fn reassign(
        &self,
        ticket_id: Uuid,
        attendant: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Ticket, RoutingError> {
        let mut attempt = 1;
        loop {
            let ticket = self
                .get_ticket(&ticket_id)
                .await?
                .ok_or(RoutingError::TicketNotFound(ticket_id))?;
            if ticket.is_closed() {
                return Err(RoutingError::TicketClosed(ticket_id));
            }
            if ticket.assignee_id.as_deref() == Some(attendant) {
                return Ok(ticket);
            }
            let queue = self
                .get_queue(&ticket.queue_id)
                .await?
                .ok_or_else(|| RoutingError::QueueNotFound(ticket.queue_id.clone()))?;
            if !queue.members.iter().any(|m| m == attendant) {
                return Err(RoutingError::NotAMember {
                    queue_id: queue.id,
                    attendant: attendant.to_string(),
                });
            }
            let load = self
                .retry
                .run("active_load", || self.repo.active_load(&queue.id))
                .await
                .map_err(storage)?;
            let held = load.get(attendant).copied().unwrap_or(0);
            if queue.capacity_per_attendant.is_some_and(|cap| held >= cap) {
                return Err(RoutingError::AttendantAtCapacity {
                    queue_id: queue.id,
                    attendant: attendant.to_string(),
                });
            }

            // The cursor stays put; the version bump serializes this with
            // strategy assignments in the same queue.
            let mut next_queue = queue.clone();
            next_queue.version = queue.version + 1;

            let mut next_ticket = ticket.clone();
            if next_ticket.status == TicketStatus::Fila {
                next_ticket.status = TicketStatus::EmAtendimento;
            }
            next_ticket.assignee_id = Some(attendant.to_string());
            next_ticket.last_activity_at = now;
            next_ticket.inactivity_warned_at = None;
            next_ticket.version = ticket.version + 1;

            match self
                .repo
                .commit_assignment(&next_queue, queue.version, &next_ticket, ticket.version)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        %ticket_id,
                        queue_id = %next_queue.id,
                        from = ?ticket.assignee_id,
                        to = attendant,
                        reason,
                        "reassigned ticket"
                    );
                    self.deadlines.track_ticket(ticket_id, now);
                    self.events
                        .publish(TriageEvent::TicketAssigned(next_ticket.assignment()));
                    self.record_assignment(
                        &next_queue,
                        &next_ticket,
                        ticket.assignee_id.clone(),
                        AssignmentKind::Reassignment,
                        reason,
                        held,
                        now,
                    )
                    .await;

                    if ticket.assignee_id.is_some() {
                        if let Err(e) = self.redistribute(&next_queue.id).await {
                            tracing::warn!(queue_id = %next_queue.id, error = %e, "redistribution after reassignment failed");
                        }
                    }
                    return Ok(next_ticket);
                }
                Err(e) => attempt = self.on_conflict(attempt, e, "reassignment").await?,
            }
        }
    }

    /// Assignment history of a ticket, oldest first.
    pub async fn assignment_history(
        &self,
        ticket_id: &Uuid,
    ) -> Result<Vec<AssignmentRecord>, RoutingError> {
        self.retry
            .run("list_assignments", || self.repo.list_assignments(ticket_id))
            .await
            .map_err(storage)
    }

    /// Append to the distribution log. The assignment is already committed,
    /// so a failed append is logged and not surfaced.
    async fn record_assignment(
        &self,
        queue: &Queue,
        ticket: &Ticket,
        previous_assignee_id: Option<String>,
        kind: AssignmentKind,
        reason: &str,
        assignee_load: u32,
        assigned_at: DateTime<Utc>,
    ) {
        let Some(assignee_id) = ticket.assignee_id.clone() else {
            return;
        };
        let record = AssignmentRecord {
            id: Uuid::now_v7(),
            ticket_id: ticket.id,
            queue_id: queue.id.clone(),
            assignee_id,
            previous_assignee_id,
            strategy: queue.strategy,
            kind,
            reason: reason.to_string(),
            assignee_load,
            assigned_at,
        };
        if let Err(e) = self
            .retry
            .run("append_assignment", || self.repo.append_assignment(&record))
            .await
        {
            tracing::warn!(ticket_id = %ticket.id, error = %e, "failed to append to the distribution log");
        }
    }

    /// Close a ticket and release its attendant's slot to the queue.
    pub async fn close_ticket(
        &self,
        ticket_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Ticket, RoutingError> {
        self.close_where(ticket_id, reason, now, |_| true)
            .await
            .map(|(ticket, _)| ticket)
    }

    /// Close a ticket only if `guard` holds for the stored snapshot at
    /// write time. Returns the resulting ticket and whether it was closed.
    pub(crate) async fn close_where<G>(
        &self,
        ticket_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
        mut guard: G,
    ) -> Result<(Ticket, bool), RoutingError>
    where
        G: FnMut(&Ticket) -> bool,
    {
        let (closed, written) = self
            .modify_if(ticket_id, |ticket| {
                if !guard(ticket) {
                    return Ok(None);
                }
                let mut next = ticket.clone();
                next.status = TicketStatus::Encerrado;
                next.closed_at = Some(now);
                next.last_activity_at = now;
                Ok(Some(next))
            })
            .await?;
        if !written {
            return Ok((closed, false));
        }

        self.deadlines.cancel_ticket(&ticket_id);
        tracing::info!(%ticket_id, reason, "closed ticket");
        self.events.publish(TriageEvent::TicketClosed {
            ticket_id,
            reason: reason.to_string(),
        });

        if closed.assignee_id.is_some() {
            if let Err(e) = self.redistribute(&closed.queue_id).await {
                tracing::warn!(queue_id = %closed.queue_id, error = %e, "redistribution after close failed");
            }
        }
        Ok((closed, true))
    }

    /// Stamp the inactivity warning on a ticket if `guard` still holds.
    pub(crate) async fn mark_warned_where<G>(
        &self,
        ticket_id: Uuid,
        now: DateTime<Utc>,
        mut guard: G,
    ) -> Result<(Ticket, bool), RoutingError>
    where
        G: FnMut(&Ticket) -> bool,
    {
        self.modify_if(ticket_id, |ticket| {
            if !guard(ticket) {
                return Ok(None);
            }
            let mut next = ticket.clone();
            next.inactivity_warned_at = Some(now);
            Ok(Some(next))
        })
        .await
    }

    /// Move a ticket along its lifecycle.
    ///
    /// `FILA -> EM_ATENDIMENTO` goes through assignment, since an attended
    /// ticket must have an assignee. `ENCERRADO` goes through
    /// [`close_ticket`](Self::close_ticket).
    pub async fn update_status(
        &self,
        ticket_id: Uuid,
        next_status: TicketStatus,
        now: DateTime<Utc>,
    ) -> Result<Ticket, RoutingError> {
        let current = self
            .get_ticket(&ticket_id)
            .await?
            .ok_or(RoutingError::TicketNotFound(ticket_id))?;
        if current.is_closed() {
            return Err(RoutingError::TicketClosed(ticket_id));
        }
        if !current.status.can_transition_to(next_status) {
            return Err(RoutingError::InvalidTransition {
                from: current.status.to_string(),
                to: next_status.to_string(),
            });
        }

        match (current.status, next_status) {
            (_, TicketStatus::Encerrado) => self.close_ticket(ticket_id, "status", now).await,
            (TicketStatus::Fila, TicketStatus::EmAtendimento) => {
                let (ticket, _) = self.try_assign(ticket_id, "status").await?;
                if ticket.status == TicketStatus::Fila {
                    return Err(RoutingError::InvalidTransition {
                        from: TicketStatus::Fila.to_string(),
                        to: format!("{next_status} (no attendant with capacity)"),
                    });
                }
                Ok(ticket)
            }
            _ => {
                self.modify(ticket_id, |ticket| {
                    if !ticket.status.can_transition_to(next_status) {
                        return Err(RoutingError::InvalidTransition {
                            from: ticket.status.to_string(),
                            to: next_status.to_string(),
                        });
                    }
                    let mut next = ticket.clone();
                    next.status = next_status;
                    next.last_activity_at = now;
                    next.inactivity_warned_at = None;
                    Ok(next)
                })
                .await
            }
        }
    }

    /// Record attendant or contact activity on a ticket.
    pub async fn touch(&self, ticket_id: Uuid, now: DateTime<Utc>) -> Result<Ticket, RoutingError> {
        let ticket = self
            .modify(ticket_id, |ticket| {
                let mut next = ticket.clone();
                next.last_activity_at = now;
                next.inactivity_warned_at = None;
                Ok(next)
            })
            .await?;
        self.deadlines.track_ticket(ticket.id, ticket.last_activity_at);
        Ok(ticket)
    }

    /// Read-modify-write of a non-closed ticket under compare-and-swap.
    /// `apply` may run more than once.
    async fn modify<F>(&self, ticket_id: Uuid, mut apply: F) -> Result<Ticket, RoutingError>
    where
        F: FnMut(&Ticket) -> Result<Ticket, RoutingError>,
    {
        self.modify_if(ticket_id, |current| apply(current).map(Some))
            .await
            .map(|(ticket, _)| ticket)
    }

    /// Like `modify`, but `apply` may return `None` to leave the ticket
    /// untouched. Returns the resulting ticket and whether it was written.
    pub(crate) async fn modify_if<F>(
        &self,
        ticket_id: Uuid,
        mut apply: F,
    ) -> Result<(Ticket, bool), RoutingError>
    where
        F: FnMut(&Ticket) -> Result<Option<Ticket>, RoutingError>,
    {
        let mut attempt = 1;
        loop {
            let current = self
                .get_ticket(&ticket_id)
                .await?
                .ok_or(RoutingError::TicketNotFound(ticket_id))?;
            if current.is_closed() {
                return Err(RoutingError::TicketClosed(ticket_id));
            }

            let Some(mut next) = apply(&current)? else {
                return Ok((current, false));
            };
            next.version = current.version + 1;

            match self.repo.compare_and_swap_ticket(&next, current.version).await {
                Ok(()) => return Ok((next, true)),
                Err(e) => attempt = self.on_conflict(attempt, e, "ticket write").await?,
            }
        }
    }

    /// Back off and return the next attempt number, or the error to surface.
    async fn on_conflict(&self, attempt: u32, e: RepositoryError, what: &str) -> Result<u32, RoutingError> {
        if self.retry.should_retry(attempt, &e) {
            tracing::debug!(attempt, error = %e, "{what} conflicted, re-reading");
            self.retry.wait(attempt).await;
            return Ok(attempt + 1);
        }
        match e {
            RepositoryError::StaleVersion { .. } => {
                tracing::warn!(attempts = attempt, "{what} retries exhausted");
                Err(RoutingError::ConflictRetriesExhausted { attempts: attempt })
            }
            other => Err(storage(other)),
        }
    }
}

fn storage(e: RepositoryError) -> RoutingError {
    RoutingError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use switchboard_types::ticket::DistributionStrategy;

    use super::*;
    use crate::repository::memory::InMemoryTicketRepository;

    struct Fixture {
        router: TicketRouter<InMemoryTicketRepository>,
        deadlines: Arc<DeadlineIndex>,
        events: EventBus,
    }

    fn fixture() -> Fixture {
        let deadlines = Arc::new(DeadlineIndex::new());
        let events = EventBus::new(64);
        let router = TicketRouter::new(
            InMemoryTicketRepository::new(),
            events.clone(),
            RetryPolicy::immediate(3),
            SlaConfig::default(),
            Arc::clone(&deadlines),
        );
        Fixture {
            router,
            deadlines,
            events,
        }
    }

    fn request(queue: &str, contact: &str) -> RouteRequest {
        RouteRequest {
            queue_id: queue.to_string(),
            contact_id: contact.to_string(),
            tenant_id: "t1".to_string(),
            session_id: None,
            triage_context: BTreeMap::new(),
        }
    }

    async fn with_queue(f: &Fixture, strategy: DistributionStrategy, cap: Option<u32>) {
        f.router
            .create_queue(Queue::new(
                "Q1",
                "Suporte",
                strategy,
                cap,
                vec!["A".into(), "B".into(), "C".into()],
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn round_robin_assigns_a_b_c_a() {
        let f = fixture();
        with_queue(&f, DistributionStrategy::RoundRobin, None).await;

        let mut assignees = Vec::new();
        for i in 0..4 {
            let t = f
                .router
                .route(request("Q1", &format!("c{i}")), Utc::now())
                .await
                .unwrap();
            assert_eq!(t.status, TicketStatus::EmAtendimento);
            assignees.push(t.assignee_id.unwrap());
        }
        assert_eq!(assignees, vec!["A", "B", "C", "A"]);
    }

    #[tokio::test]
    async fn full_priority_queue_leaves_ticket_queued() {
        let f = fixture();
        with_queue(&f, DistributionStrategy::Priority, Some(1)).await;
        let mut rx = f.events.subscribe();

        for i in 0..3 {
            f.router
                .route(request("Q1", &format!("c{i}")), Utc::now())
                .await
                .unwrap();
        }
        let overflow = f.router.route(request("Q1", "c9"), Utc::now()).await.unwrap();
        assert_eq!(overflow.status, TicketStatus::Fila);
        assert!(overflow.assignee_id.is_none());

        let mut saw_queued = false;
        while let Ok(event) = rx.try_recv() {
            if let TriageEvent::TicketQueued { ticket_id, .. } = event {
                assert_eq!(ticket_id, overflow.id);
                saw_queued = true;
            }
        }
        assert!(saw_queued);
    }

    #[tokio::test]
    async fn closing_frees_capacity_for_queued_ticket() {
        let f = fixture();
        f.router
            .create_queue(Queue::new(
                "Q1",
                "Suporte",
                DistributionStrategy::Priority,
                Some(1),
                vec!["A".into()],
            ))
            .await
            .unwrap();

        let first = f.router.route(request("Q1", "c1"), Utc::now()).await.unwrap();
        let waiting = f.router.route(request("Q1", "c2"), Utc::now()).await.unwrap();
        assert_eq!(waiting.status, TicketStatus::Fila);

        f.router.close_ticket(first.id, "resolvido", Utc::now()).await.unwrap();

        let promoted = f.router.get_ticket(&waiting.id).await.unwrap().unwrap();
        assert_eq!(promoted.status, TicketStatus::EmAtendimento);
        assert_eq!(promoted.assignee_id.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn reassignment_moves_the_ticket_and_frees_the_old_slot() {
        let f = fixture();
        with_queue(&f, DistributionStrategy::RoundRobin, Some(1)).await;
        let on_a = f.router.route(request("Q1", "c1"), Utc::now()).await.unwrap();
        f.router.route(request("Q1", "c2"), Utc::now()).await.unwrap();
        f.router.route(request("Q1", "c3"), Utc::now()).await.unwrap();
        let waiting = f.router.route(request("Q1", "c4"), Utc::now()).await.unwrap();
        assert_eq!(on_a.assignee_id.as_deref(), Some("A"));
        assert_eq!(waiting.status, TicketStatus::Fila);

        let err = f
            .router
            .reassign(on_a.id, "C", "ferias", Utc::now())
            .await
            .unwrap_err();
        assert!(
            matches!(err, RoutingError::AttendantAtCapacity { ref attendant, .. } if attendant == "C")
        );
        let err = f
            .router
            .reassign(on_a.id, "D", "ferias", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::NotAMember { .. }));

        let mut queue = f.router.get_queue("Q1").await.unwrap().unwrap();
        queue.members.push("D".to_string());
        f.router.repo.save_queue(&queue).await.unwrap();

        let moved = f
            .router
            .reassign(on_a.id, "D", "ferias", Utc::now())
            .await
            .unwrap();
        assert_eq!(moved.assignee_id.as_deref(), Some("D"));
        assert_eq!(moved.status, TicketStatus::EmAtendimento);

        // A's released slot goes to the waiting ticket.
        let promoted = f.router.get_ticket(&waiting.id).await.unwrap().unwrap();
        assert_eq!(promoted.assignee_id.as_deref(), Some("A"));

        let history = f.router.assignment_history(&on_a.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, AssignmentKind::Distribution);
        assert_eq!(history[0].reason, "route");
        assert_eq!(history[0].assignee_id, "A");
        assert_eq!(history[1].kind, AssignmentKind::Reassignment);
        assert_eq!(history[1].assignee_id, "D");
        assert_eq!(history[1].previous_assignee_id.as_deref(), Some("A"));
        assert_eq!(history[1].reason, "ferias");
        assert_eq!(history[1].strategy, DistributionStrategy::RoundRobin);

        let history = f.router.assignment_history(&waiting.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason, "redistribute");
    }

    #[tokio::test]
    async fn reassigning_a_queued_ticket_attends_it() {
        let f = fixture();
        with_queue(&f, DistributionStrategy::Priority, Some(1)).await;
        for i in 0..3 {
            f.router
                .route(request("Q1", &format!("c{i}")), Utc::now())
                .await
                .unwrap();
        }
        let queued = f.router.route(request("Q1", "c9"), Utc::now()).await.unwrap();
        assert_eq!(queued.status, TicketStatus::Fila);

        // Everyone is full at capacity 1; widen the queue and move it by hand.
        let mut queue = f.router.get_queue("Q1").await.unwrap().unwrap();
        queue.members.push("D".to_string());
        f.router.repo.save_queue(&queue).await.unwrap();

        let mut rx = f.events.subscribe();
        let attended = f
            .router
            .reassign(queued.id, "D", "supervisor", Utc::now())
            .await
            .unwrap();
        assert_eq!(attended.status, TicketStatus::EmAtendimento);
        assert_eq!(attended.assignee_id.as_deref(), Some("D"));
        assert!(matches!(
            rx.try_recv(),
            Ok(TriageEvent::TicketAssigned(a)) if a.assignee_id.as_deref() == Some("D")
        ));

        let history = f.router.assignment_history(&queued.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].previous_assignee_id, None);
        assert_eq!(history[0].assignee_load, 0);

        // Same attendant again is a no-op.
        let again = f
            .router
            .reassign(queued.id, "D", "supervisor", Utc::now())
            .await
            .unwrap();
        assert_eq!(again.version, attended.version);
        assert_eq!(f.router.assignment_history(&queued.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closed_tickets_cannot_be_reassigned() {
        let f = fixture();
        with_queue(&f, DistributionStrategy::RoundRobin, None).await;
        let t = f.router.route(request("Q1", "c1"), Utc::now()).await.unwrap();
        f.router.close_ticket(t.id, "resolvido", Utc::now()).await.unwrap();

        let err = f
            .router
            .reassign(t.id, "B", "x", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::TicketClosed(id) if id == t.id));
    }

    #[tokio::test]
    async fn closed_ticket_is_immutable_and_untracked() {
        let f = fixture();
        with_queue(&f, DistributionStrategy::RoundRobin, None).await;
        let t = f.router.route(request("Q1", "c1"), Utc::now()).await.unwrap();
        assert!(f.deadlines.is_tracking_sla(&t.id));

        f.router.close_ticket(t.id, "resolvido", Utc::now()).await.unwrap();
        assert!(!f.deadlines.is_tracking_sla(&t.id));
        assert!(!f.deadlines.is_tracking_ticket(&t.id));

        let err = f.router.touch(t.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, RoutingError::TicketClosed(_)));
        let err = f
            .router
            .update_status(t.id, TicketStatus::EnvioAtivo, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::TicketClosed(_)));
    }

    #[tokio::test]
    async fn status_updates_follow_lifecycle() {
        let f = fixture();
        with_queue(&f, DistributionStrategy::RoundRobin, None).await;
        let t = f.router.route(request("Q1", "c1"), Utc::now()).await.unwrap();

        let err = f
            .router
            .update_status(t.id, TicketStatus::Fila, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::InvalidTransition { .. }));

        let active = f
            .router
            .update_status(t.id, TicketStatus::EnvioAtivo, Utc::now())
            .await
            .unwrap();
        assert_eq!(active.status, TicketStatus::EnvioAtivo);
        assert_eq!(active.assignee_id, t.assignee_id);

        let closed = f
            .router
            .update_status(t.id, TicketStatus::Encerrado, Utc::now())
            .await
            .unwrap();
        assert!(closed.closed_at.is_some());
    }

    #[tokio::test]
    async fn routing_is_idempotent_per_session() {
        let f = fixture();
        with_queue(&f, DistributionStrategy::RoundRobin, None).await;
        let session_id = Uuid::now_v7();
        let mut req = request("Q1", "c1");
        req.session_id = Some(session_id);

        let first = f.router.route(req.clone(), Utc::now()).await.unwrap();
        let second = f.router.route(req, Utc::now()).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn priority_from_context_sets_severity_and_sla() {
        let f = fixture();
        with_queue(&f, DistributionStrategy::RoundRobin, None).await;
        let now = Utc::now();
        let mut req = request("Q1", "c1");
        req.triage_context
            .insert(PRIORITY_CONTEXT_KEY.to_string(), "urgente".to_string());

        let t = f.router.route(req, now).await.unwrap();
        assert_eq!(t.severity, Severity::Urgente);
        assert_eq!(t.sla_target_at, Some(now + chrono::Duration::minutes(30)));
        assert_eq!(t.assigned_level, AssignedLevel::N1);
    }

    #[tokio::test]
    async fn unknown_queue_is_reported() {
        let f = fixture();
        let err = f.router.route(request("nope", "c1"), Utc::now()).await.unwrap_err();
        assert!(matches!(err, RoutingError::QueueNotFound(q) if q == "nope"));
    }

    #[tokio::test]
    async fn concurrent_assignments_never_double_book() {
        let f = Arc::new(fixture());
        f.router
            .create_queue(Queue::new(
                "Q1",
                "Suporte",
                DistributionStrategy::LeastLoad,
                Some(1),
                vec!["A".into(), "B".into()],
            ))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..6 {
            let f = Arc::clone(&f);
            handles.push(tokio::spawn(async move {
                f.router.route(request("Q1", &format!("c{i}")), Utc::now()).await
            }));
        }
        let mut assigned = Vec::new();
        for h in handles {
            // Losing every retry is allowed; double-booking is not.
            if let Ok(Ok(t)) = h.await {
                if let Some(a) = t.assignee_id {
                    assigned.push(a);
                }
            }
        }
        assigned.sort();
        assigned.dedup();
        let open = f.router.list_open_tickets().await.unwrap();
        let per_member = |m: &str| {
            open.iter()
                .filter(|t| t.assignee_id.as_deref() == Some(m))
                .count()
        };
        assert!(per_member("A") <= 1);
        assert!(per_member("B") <= 1);
    }
}

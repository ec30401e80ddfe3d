//! Working set of pending deadlines for the background monitors.
//!
//! The escalation monitor and the inactivity reaper only look at subjects
//! tracked here, so a tick costs O(tracked) instead of a table scan. The
//! store stays the source of truth: monitors re-read every candidate before
//! acting, and the index is updated whenever a session or ticket is written.
//! Entries are removed the moment their subject reaches a terminal state.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use switchboard_types::session::Session;
use switchboard_types::ticket::Ticket;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct DeadlineIndex {
    /// Ticket id -> SLA target, for tickets not yet escalated.
    sla: DashMap<Uuid, DateTime<Utc>>,
    /// Session id -> last activity.
    sessions: DashMap<Uuid, DateTime<Utc>>,
    /// Ticket id -> last activity.
    tickets: DashMap<Uuid, DateTime<Utc>>,
}

impl DeadlineIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // SLA
    // -----------------------------------------------------------------------

    pub fn track_sla(&self, ticket_id: Uuid, target: DateTime<Utc>) {
        self.sla.insert(ticket_id, target);
    }

    pub fn cancel_sla(&self, ticket_id: &Uuid) {
        self.sla.remove(ticket_id);
    }

    /// Tickets whose SLA target is strictly before `now`.
    pub fn due_sla(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.sla
            .iter()
            .filter(|e| *e.value() < now)
            .map(|e| *e.key())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Inactivity
    // -----------------------------------------------------------------------

    pub fn track_session(&self, session_id: Uuid, last_activity: DateTime<Utc>) {
        self.sessions.insert(session_id, last_activity);
    }

    pub fn cancel_session(&self, session_id: &Uuid) {
        self.sessions.remove(session_id);
    }

    /// Sessions idle since at or before `cutoff`.
    pub fn idle_sessions(&self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        idle(&self.sessions, cutoff)
    }

    pub fn track_ticket(&self, ticket_id: Uuid, last_activity: DateTime<Utc>) {
        self.tickets.insert(ticket_id, last_activity);
    }

    /// Drop both the SLA and the inactivity entry of a ticket.
    pub fn cancel_ticket(&self, ticket_id: &Uuid) {
        self.tickets.remove(ticket_id);
        self.sla.remove(ticket_id);
    }

    /// Tickets idle since at or before `cutoff`.
    pub fn idle_tickets(&self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        idle(&self.tickets, cutoff)
    }

    // -----------------------------------------------------------------------
    // Bookkeeping
    // -----------------------------------------------------------------------

    /// Rebuild the working set from persisted state after a restart.
    pub fn hydrate(&self, sessions: &[Session], tickets: &[Ticket]) {
        for session in sessions.iter().filter(|s| s.is_active()) {
            self.track_session(session.id, session.last_activity_at);
        }
        for ticket in tickets.iter().filter(|t| !t.is_closed()) {
            self.track_ticket(ticket.id, ticket.last_activity_at);
            if let (Some(target), None) = (ticket.sla_target_at, ticket.escalated_at) {
                self.track_sla(ticket.id, target);
            }
        }
        tracing::info!(
            sessions = self.sessions.len(),
            tickets = self.tickets.len(),
            sla = self.sla.len(),
            "hydrated deadline index"
        );
    }

    pub fn is_tracking_sla(&self, ticket_id: &Uuid) -> bool {
        self.sla.contains_key(ticket_id)
    }

    pub fn is_tracking_session(&self, session_id: &Uuid) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn is_tracking_ticket(&self, ticket_id: &Uuid) -> bool {
        self.tickets.contains_key(ticket_id)
    }

    /// `(sessions, tickets, sla)` entry counts.
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.sessions.len(), self.tickets.len(), self.sla.len())
    }
}

fn idle(map: &DashMap<Uuid, DateTime<Utc>>, cutoff: DateTime<Utc>) -> Vec<Uuid> {
    map.iter()
        .filter(|e| *e.value() <= cutoff)
        .map(|e| *e.key())
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[test]
    fn due_sla_is_strictly_after_target() {
        let index = DeadlineIndex::new();
        let t = Uuid::now_v7();
        index.track_sla(t, at(10));

        assert!(index.due_sla(at(10)).is_empty());
        assert_eq!(index.due_sla(at(11)), vec![t]);
    }

    #[test]
    fn cancelling_a_ticket_drops_all_its_timers() {
        let index = DeadlineIndex::new();
        let t = Uuid::now_v7();
        index.track_sla(t, at(0));
        index.track_ticket(t, at(0));

        index.cancel_ticket(&t);
        assert!(index.due_sla(at(100)).is_empty());
        assert!(index.idle_tickets(at(100)).is_empty());
    }

    #[test]
    fn idle_sessions_respect_cutoff() {
        let index = DeadlineIndex::new();
        let old = Uuid::now_v7();
        let fresh = Uuid::now_v7();
        index.track_session(old, at(0));
        index.track_session(fresh, at(20));

        assert_eq!(index.idle_sessions(at(5)), vec![old]);

        // Activity moves the entry forward.
        index.track_session(old, at(30));
        assert!(index.idle_sessions(at(5)).is_empty());
    }
}

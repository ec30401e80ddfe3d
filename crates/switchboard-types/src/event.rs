//! Event types for the Switchboard event bus.
//!
//! `TriageEvent` is broadcast whenever a session or ticket changes in a way
//! an external collaborator (notifications, dashboards) may care about.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SessionState;
use crate::ticket::{AssignedLevel, Severity, TicketAssignment};

/// Events emitted by the triage engine and the background monitors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriageEvent {
    /// A contact without an active session started a new one.
    SessionStarted {
        session_id: Uuid,
        contact_id: String,
        flow_id: String,
        flow_version: u32,
    },

    /// A session reached a terminal state.
    SessionClosed {
        session_id: Uuid,
        contact_id: String,
        state: SessionState,
    },

    /// A ticket was created in `FILA`.
    TicketCreated {
        ticket_id: Uuid,
        queue_id: String,
        contact_id: String,
        severity: Severity,
    },

    /// A ticket was assigned to an attendant.
    TicketAssigned(TicketAssignment),

    /// No attendant had capacity; the ticket stays queued.
    TicketQueued { ticket_id: Uuid, queue_id: String },

    /// The SLA target passed without resolution.
    TicketEscalated {
        ticket_id: Uuid,
        queue_id: String,
        severity: Severity,
        assigned_level: AssignedLevel,
        escalated_at: DateTime<Utc>,
    },

    /// A ticket reached `ENCERRADO`.
    TicketClosed { ticket_id: Uuid, reason: String },

    /// An inactivity warning was delivered.
    InactivityWarning {
        subject: InactivitySubject,
        contact_id: String,
    },
}

impl TriageEvent {
    /// The serialized `type` tag, for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::SessionClosed { .. } => "session_closed",
            Self::TicketCreated { .. } => "ticket_created",
            Self::TicketAssigned(_) => "ticket_assigned",
            Self::TicketQueued { .. } => "ticket_queued",
            Self::TicketEscalated { .. } => "ticket_escalated",
            Self::TicketClosed { .. } => "ticket_closed",
            Self::InactivityWarning { .. } => "inactivity_warning",
        }
    }
}

/// What an inactivity event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum InactivitySubject {
    Session(Uuid),
    Ticket(Uuid),
}

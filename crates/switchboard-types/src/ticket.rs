//! Queue and ticket domain types.
//!
//! A ticket is the service request created when a conversation hands off to
//! human attendance. Queues own the attendant roster and the distribution
//! strategy used to pick an assignee.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// A pool of attendants with a distribution strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub id: String,
    pub name: String,
    pub strategy: DistributionStrategy,
    /// Maximum concurrent non-terminal tickets per attendant in this queue.
    /// `None` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_per_attendant: Option<u32>,
    /// Attendant ids. For `PRIORITY` the order is the priority order.
    pub members: Vec<String>,
    /// Round-robin cursor; advanced atomically with each assignment.
    #[serde(default)]
    pub cursor: u64,
    /// Optimistic concurrency token for cursor and roster updates.
    #[serde(default)]
    pub version: u64,
}

impl Queue {
    pub fn new(
        id: &str,
        name: &str,
        strategy: DistributionStrategy,
        capacity_per_attendant: Option<u32>,
        members: Vec<String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            strategy,
            capacity_per_attendant,
            members,
            cursor: 0,
            version: 1,
        }
    }
}

/// How a queue picks the attendant for a new ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistributionStrategy {
    RoundRobin,
    LeastLoad,
    Priority,
}

impl DistributionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionStrategy::RoundRobin => "ROUND_ROBIN",
            DistributionStrategy::LeastLoad => "LEAST_LOAD",
            DistributionStrategy::Priority => "PRIORITY",
        }
    }
}

impl fmt::Display for DistributionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistributionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "ROUND_ROBIN" => Ok(DistributionStrategy::RoundRobin),
            "LEAST_LOAD" => Ok(DistributionStrategy::LeastLoad),
            "PRIORITY" => Ok(DistributionStrategy::Priority),
            other => Err(format!("unknown distribution strategy '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// A service request waiting for, or receiving, human attendance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub queue_id: String,
    pub contact_id: String,
    pub tenant_id: String,
    /// Triage session that produced the ticket, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub status: TicketStatus,
    pub severity: Severity,
    pub assigned_level: AssignedLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_target_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
    /// Set iff `status != FILA`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    /// Snapshot of the session context at handoff.
    #[serde(default)]
    pub triage_context: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inactivity_warned_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Ticket {
    /// The contract handed to attendant and queue UIs.
    pub fn assignment(&self) -> TicketAssignment {
        TicketAssignment {
            ticket_id: self.id,
            queue_id: self.queue_id.clone(),
            assignee_id: self.assignee_id.clone(),
            status: self.status,
            severity: self.severity,
            assigned_level: self.assigned_level,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == TicketStatus::Encerrado
    }
}

/// Ticket lifecycle.
///
/// `FILA -> EM_ATENDIMENTO -> ENVIO_ATIVO -> ENCERRADO`, plus the shortcuts
/// `FILA -> ENCERRADO` and `EM_ATENDIMENTO -> ENCERRADO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Fila,
    EmAtendimento,
    EnvioAtivo,
    Encerrado,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Fila => "FILA",
            TicketStatus::EmAtendimento => "EM_ATENDIMENTO",
            TicketStatus::EnvioAtivo => "ENVIO_ATIVO",
            TicketStatus::Encerrado => "ENCERRADO",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == TicketStatus::Encerrado
    }

    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (*self, next),
            (Fila, EmAtendimento)
                | (Fila, Encerrado)
                | (EmAtendimento, EnvioAtivo)
                | (EmAtendimento, Encerrado)
                | (EnvioAtivo, Encerrado)
        )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FILA" => Ok(TicketStatus::Fila),
            "EM_ATENDIMENTO" => Ok(TicketStatus::EmAtendimento),
            "ENVIO_ATIVO" => Ok(TicketStatus::EnvioAtivo),
            "ENCERRADO" => Ok(TicketStatus::Encerrado),
            other => Err(format!("unknown ticket status '{other}'")),
        }
    }
}

/// Ticket severity tiers, lowest first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Baixa,
    #[default]
    Normal,
    Alta,
    Urgente,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Baixa => "baixa",
            Severity::Normal => "normal",
            Severity::Alta => "alta",
            Severity::Urgente => "urgente",
        }
    }

    /// One tier up, saturating at `urgente`.
    pub fn bumped(self) -> Severity {
        match self {
            Severity::Baixa => Severity::Normal,
            Severity::Normal => Severity::Alta,
            Severity::Alta | Severity::Urgente => Severity::Urgente,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "baixa" => Ok(Severity::Baixa),
            "normal" | "media" => Ok(Severity::Normal),
            "alta" => Ok(Severity::Alta),
            "urgente" | "critica" => Ok(Severity::Urgente),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Attendance tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignedLevel {
    N1,
    N2,
}

impl AssignedLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignedLevel::N1 => "N1",
            AssignedLevel::N2 => "N2",
        }
    }
}

impl fmt::Display for AssignedLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignedLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "N1" => Ok(AssignedLevel::N1),
            "N2" => Ok(AssignedLevel::N2),
            other => Err(format!("unknown level '{other}'")),
        }
    }
}

/// Assignment record produced for attendant/queue UIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketAssignment {
    pub ticket_id: Uuid,
    pub queue_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    pub status: TicketStatus,
    pub severity: Severity,
    pub assigned_level: AssignedLevel,
}

/// Why an attendant received a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentKind {
    /// Picked by the queue strategy.
    Distribution,
    /// Moved by an operator.
    Reassignment,
}

impl AssignmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentKind::Distribution => "distribution",
            AssignmentKind::Reassignment => "reassignment",
        }
    }
}

impl fmt::Display for AssignmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "distribution" => Ok(AssignmentKind::Distribution),
            "reassignment" => Ok(AssignmentKind::Reassignment),
            other => Err(format!("unknown assignment kind '{other}'")),
        }
    }
}

/// Append-only entry of the distribution log, one per assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub queue_id: String,
    pub assignee_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_assignee_id: Option<String>,
    pub strategy: DistributionStrategy,
    pub kind: AssignmentKind,
    pub reason: String,
    /// Open tickets the assignee held in the queue before this one.
    pub assignee_load: u32,
    pub assigned_at: DateTime<Utc>,
}

/// SLA compliance of a ticket at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaStatus {
    /// Inside the window and below the at-risk threshold.
    Cumprido,
    /// Past the at-risk share of the window.
    EmRisco,
    /// Past the target.
    Violado,
}

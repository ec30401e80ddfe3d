//! Triage session domain types.
//!
//! A session is the live state of one contact's walk through a flow. It is
//! mutated only through a versioned compare-and-swap, so every field change
//! bumps `version`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context key holding the count of consecutive unmatched inputs.
pub const UNMATCHED_ATTEMPTS_KEY: &str = "__tentativasInvalidas";

/// Context key holding the RFC 3339 instant an inactivity warning was sent.
pub const INACTIVITY_WARNED_AT_KEY: &str = "__avisoInatividadeEm";

/// Context key holding the ticket id a session was transferred into.
pub const TICKET_ID_KEY: &str = "__ticketId";

/// Context key recording why a session reached a terminal state.
pub const CLOSE_REASON_KEY: &str = "__motivoEncerramento";

/// Per-contact conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// Channel-level contact identifier (phone number, chat id).
    pub contact_id: String,
    /// Tenant (empresa) that owns the contact.
    pub tenant_id: String,
    /// Channel the conversation arrived on (e.g. "whatsapp").
    pub channel: String,
    pub flow_id: String,
    /// Pinned for the whole session lifetime.
    pub flow_version: u32,
    pub current_step: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Optimistic concurrency token, incremented on every write.
    pub version: u64,
    /// Dedupe key of the last inbound message applied to this session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_key: Option<String>,
}

impl Session {
    /// Build a fresh `ATIVA` session positioned at `initial_step`.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        contact_id: &str,
        tenant_id: &str,
        channel: &str,
        flow_id: &str,
        flow_version: u32,
        initial_step: &str,
        message_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            contact_id: contact_id.to_string(),
            tenant_id: tenant_id.to_string(),
            channel: channel.to_string(),
            flow_id: flow_id.to_string(),
            flow_version,
            current_step: initial_step.to_string(),
            context: BTreeMap::new(),
            state: SessionState::Ativa,
            started_at: now,
            last_activity_at: now,
            version: 1,
            last_message_key: message_key,
        }
    }

    /// Whether the session still accepts input.
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Consecutive unmatched inputs at the current step.
    pub fn unmatched_attempts(&self) -> u32 {
        self.context
            .get(UNMATCHED_ATTEMPTS_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// When the pending inactivity warning was sent, if any.
    pub fn inactivity_warned_at(&self) -> Option<DateTime<Utc>> {
        self.context
            .get(INACTIVITY_WARNED_AT_KEY)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Session lifecycle state.
///
/// `ATIVA <-> AGUARDANDO_INPUT -> {FINALIZADA, EXPIRADA, TRANSFERIDA}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Ativa,
    AguardandoInput,
    Finalizada,
    Expirada,
    Transferida,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Ativa => "ATIVA",
            SessionState::AguardandoInput => "AGUARDANDO_INPUT",
            SessionState::Finalizada => "FINALIZADA",
            SessionState::Expirada => "EXPIRADA",
            SessionState::Transferida => "TRANSFERIDA",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Finalizada | SessionState::Expirada | SessionState::Transferida
        )
    }

    /// Terminal states have no outgoing edges; every other move is allowed.
    pub fn can_transition_to(&self, _next: SessionState) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ATIVA" => Ok(SessionState::Ativa),
            "AGUARDANDO_INPUT" => Ok(SessionState::AguardandoInput),
            "FINALIZADA" => Ok(SessionState::Finalizada),
            "EXPIRADA" => Ok(SessionState::Expirada),
            "TRANSFERIDA" => Ok(SessionState::Transferida),
            other => Err(format!("unknown session state '{other}'")),
        }
    }
}

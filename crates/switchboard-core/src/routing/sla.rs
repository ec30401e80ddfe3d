//! SLA classification.

use chrono::{DateTime, Utc};
use serde::Serialize;
use switchboard_types::ticket::{SlaStatus, Ticket};

/// SLA position of a ticket at an instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaReport {
    pub status: SlaStatus,
    pub target_at: DateTime<Utc>,
    /// Negative once the target has passed.
    pub remaining_minutes: i64,
}

/// Classify `ticket` at `now`.
///
/// Closed tickets are judged at their closing instant. `None` when the
/// ticket has no SLA target.
pub fn sla_report(ticket: &Ticket, now: DateTime<Utc>, at_risk_percent: u8) -> Option<SlaReport> {
    let target = ticket.sla_target_at?;
    let at = ticket.closed_at.unwrap_or(now);

    let window = (target - ticket.created_at).num_seconds().max(1);
    let elapsed = (at - ticket.created_at).num_seconds();

    let status = if at > target {
        SlaStatus::Violado
    } else if elapsed * 100 >= window * i64::from(at_risk_percent.min(100)) {
        SlaStatus::EmRisco
    } else {
        SlaStatus::Cumprido
    };

    Some(SlaReport {
        status,
        target_at: target,
        remaining_minutes: (target - at).num_minutes(),
    })
}

//! One-shot triage commands: feed a message, run the monitors once.

use anyhow::Result;
use chrono::Utc;
use console::style;

use switchboard_core::triage::Outcome;
use switchboard_types::message::InboundMessage;

use crate::state::AppState;

/// Handle one inbound message as if it came from a channel adapter.
pub async fn send(
    state: &AppState,
    contact: &str,
    text: &str,
    channel: &str,
    tenant: Option<String>,
    flow: Option<String>,
    json: bool,
) -> Result<()> {
    let mut message = InboundMessage::new(contact, channel, text, Utc::now());
    if let Some(tenant) = tenant {
        message.tenant_id = tenant;
    }
    message.flow_id = flow;

    let reply = state.engine.handle(message).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
        return Ok(());
    }

    println!();
    for text in &reply.messages {
        for line in text.lines() {
            println!("  {} {}", style("│").dim(), line);
        }
        println!();
    }
    let summary = match &reply.outcome {
        Outcome::Started { step } => format!("session started at {step}"),
        Outcome::Advanced { step } => format!("moved to {step}"),
        Outcome::Reprompted { attempt } => format!("no option matched (attempt {attempt})"),
        Outcome::Finished { state, reason } => format!("session {state} ({})", reason.as_str()),
        Outcome::Transferred {
            ticket_id,
            queue_id,
            assignee_id,
        } => format!(
            "ticket {ticket_id} in {queue_id}, {}",
            assignee_id.as_deref().unwrap_or("waiting")
        ),
        Outcome::Duplicate => "already handled".to_string(),
        Outcome::FlowUnavailable => "no flow available".to_string(),
    };
    println!("  {} {}", style("→").cyan().bold(), style(summary).dim());
    println!();
    Ok(())
}

/// Hydrate the deadline index, then run one escalation and one
/// inactivity pass.
pub async fn sweep(state: &AppState, json: bool) -> Result<()> {
    state.hydrate().await?;
    let now = Utc::now();
    let escalated = state.escalation.sweep(now).await;
    let reaped = state.reaper.sweep(now).await;

    if json {
        let out = serde_json::json!({
            "escalated": escalated.iter().map(|t| t.id).collect::<Vec<_>>(),
            "warned_sessions": reaped.warned_sessions,
            "expired_sessions": reaped.expired_sessions,
            "warned_tickets": reaped.warned_tickets,
            "closed_tickets": reaped.closed_tickets,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  Escalated tickets:  {}", style(escalated.len()).bold());
    println!(
        "  Sessions:           {} warned, {} expired",
        reaped.warned_sessions, reaped.expired_sessions
    );
    println!(
        "  Tickets:            {} warned, {} closed",
        reaped.warned_tickets, reaped.closed_tickets
    );
    println!();
    Ok(())
}

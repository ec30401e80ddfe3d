//! System status dashboard command.

use anyhow::Result;
use console::style;

use switchboard_types::ticket::TicketStatus;

use crate::state::AppState;

/// Display counts of flows, queues, active sessions and open tickets.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let flows = state.flows.list_flows().await?;
    let queues = state.router.list_queues().await?;
    let sessions = state.sessions.list_active().await?;
    let tickets = state.router.list_open_tickets().await?;

    let waiting = tickets
        .iter()
        .filter(|t| t.status == TicketStatus::Fila)
        .count();
    let escalated = tickets.iter().filter(|t| t.escalated_at.is_some()).count();

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "backend": state.backend,
            "transport": state.sender.transport(),
            "default_flow": state.flows.default_flow_id(),
            "flows": flows.len(),
            "queues": queues.len(),
            "active_sessions": sessions.len(),
            "tickets": {
                "open": tickets.len(),
                "waiting": waiting,
                "escalated": escalated,
            },
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Switchboard v{}",
        style("⚡").bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();

    println!("  {}", style("── Triage ──").dim());
    println!("  Flows:            {}", style(flows.len()).bold());
    match state.flows.default_flow_id() {
        Some(id) => println!("  Default flow:     {}", style(id).cyan()),
        None => println!("  Default flow:     {}", style("not set").yellow()),
    }
    println!("  Active sessions:  {}", style(sessions.len()).bold());
    println!();

    println!("  {}", style("── Tickets ──").dim());
    println!("  Queues:           {}", style(queues.len()).bold());
    println!("  Open:             {}", style(tickets.len()).bold());
    if waiting > 0 {
        println!("  Waiting:          {}", style(waiting).yellow());
    }
    if escalated > 0 {
        println!("  Escalated:        {}", style(escalated).red());
    }
    println!();

    println!("  {}", style("── Runtime ──").dim());
    println!("  Data dir:         {}", state.data_dir.display());
    println!("  Storage:          {}", state.backend);
    println!("  Outbound:         {}", state.sender.transport());
    println!();
    Ok(())
}

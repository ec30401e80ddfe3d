//! Ticket inspection and lifecycle commands.

use anyhow::Result;
use chrono::Utc;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use switchboard_core::routing::sla::sla_report;
use switchboard_types::ticket::{SlaStatus, Ticket, TicketStatus};

use crate::cli::parse_id;
use crate::state::AppState;

fn status_cell(status: TicketStatus) -> Cell {
    match status {
        TicketStatus::Fila => Cell::new("◌ FILA").fg(Color::Yellow),
        TicketStatus::EmAtendimento => Cell::new("● EM_ATENDIMENTO").fg(Color::Green),
        TicketStatus::EnvioAtivo => Cell::new("● ENVIO_ATIVO").fg(Color::Cyan),
        TicketStatus::Encerrado => Cell::new("○ ENCERRADO").fg(Color::DarkGrey),
    }
}

fn sla_cell(status: Option<SlaStatus>) -> Cell {
    match status {
        Some(SlaStatus::Cumprido) => Cell::new("cumprido").fg(Color::Green),
        Some(SlaStatus::EmRisco) => Cell::new("em risco").fg(Color::Yellow),
        Some(SlaStatus::Violado) => Cell::new("violado").fg(Color::Red),
        None => Cell::new("-"),
    }
}

/// Show a ticket with its SLA position.
pub async fn show_ticket(state: &AppState, id: &str, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let Some(ticket) = state.router.get_ticket(&id).await? else {
        anyhow::bail!("ticket {id} not found");
    };
    let sla = sla_report(&ticket, Utc::now(), state.router.sla_config().at_risk_percent);

    if json {
        let out = serde_json::json!({ "ticket": ticket, "sla": sla });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {} {}", style("Ticket").bold(), style(ticket.id).cyan());
    println!();
    println!("  Queue:     {}", ticket.queue_id);
    println!("  Contact:   {} ({})", ticket.contact_id, ticket.tenant_id);
    println!("  Status:    {}", ticket.status);
    println!("  Severity:  {}", ticket.severity);
    println!("  Level:     {}", ticket.assigned_level);
    println!(
        "  Assignee:  {}",
        ticket.assignee_id.as_deref().unwrap_or("-")
    );
    if let Some(report) = &sla {
        let label = match report.status {
            SlaStatus::Cumprido => style("cumprido").green(),
            SlaStatus::EmRisco => style("em risco").yellow(),
            SlaStatus::Violado => style("violado").red(),
        };
        println!(
            "  SLA:       {label} (target {}, {} min left)",
            report.target_at.format("%Y-%m-%d %H:%M"),
            report.remaining_minutes
        );
    }
    if !ticket.triage_context.is_empty() {
        println!();
        println!("  {}", style("── Triage context ──").dim());
        for (key, value) in &ticket.triage_context {
            println!("  {key}: {value}");
        }
    }
    println!();
    Ok(())
}

/// List open tickets, optionally of one queue.
pub async fn list_tickets(state: &AppState, queue: Option<&str>, json: bool) -> Result<()> {
    let now = Utc::now();
    let at_risk = state.router.sla_config().at_risk_percent;
    let tickets: Vec<Ticket> = state
        .router
        .list_open_tickets()
        .await?
        .into_iter()
        .filter(|t| queue.is_none_or(|q| t.queue_id == q))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&tickets)?);
        return Ok(());
    }

    if tickets.is_empty() {
        println!();
        println!("  {} No open tickets", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Ticket").fg(Color::White),
        Cell::new("Queue").fg(Color::White),
        Cell::new("Contact").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Severity").fg(Color::White),
        Cell::new("Assignee").fg(Color::White),
        Cell::new("SLA").fg(Color::White),
    ]);
    for ticket in &tickets {
        let sla = sla_report(ticket, now, at_risk).map(|r| r.status);
        table.add_row(vec![
            Cell::new(ticket.id),
            Cell::new(&ticket.queue_id),
            Cell::new(&ticket.contact_id),
            status_cell(ticket.status),
            Cell::new(ticket.severity),
            Cell::new(ticket.assignee_id.as_deref().unwrap_or("-")),
            sla_cell(sla),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

/// Close a ticket.
pub async fn close_ticket(state: &AppState, id: &str, reason: &str, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let ticket = state.router.close_ticket(id, reason, Utc::now()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ticket)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Closed ticket {} ({})",
        style("✓").green().bold(),
        style(ticket.id).cyan(),
        reason
    );
    println!();
    Ok(())
}

/// Move a ticket to another lifecycle status.
pub async fn set_status(state: &AppState, id: &str, status: &str, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let status = status
        .trim()
        .to_ascii_uppercase()
        .parse::<TicketStatus>()
        .map_err(|e| anyhow::anyhow!(e))?;
    let ticket = state.router.update_status(id, status, Utc::now()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ticket)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Ticket {} is now {}",
        style("✓").green().bold(),
        style(ticket.id).cyan(),
        style(ticket.status).bold()
    );
    println!();
    Ok(())
}

/// Hand a ticket to another attendant of its queue.
pub async fn reassign(
    state: &AppState,
    id: &str,
    attendant: &str,
    reason: &str,
    json: bool,
) -> Result<()> {
    let id = parse_id(id)?;
    let ticket = state.router.reassign(id, attendant, reason, Utc::now()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ticket)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Ticket {} is now with {}",
        style("✓").green().bold(),
        style(ticket.id).cyan(),
        style(attendant).bold()
    );
    println!();
    Ok(())
}

/// Print the distribution log of a ticket, oldest first.
pub async fn history(state: &AppState, id: &str, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    if state.router.get_ticket(&id).await?.is_none() {
        anyhow::bail!("ticket {id} not found");
    }
    let records = state.router.assignment_history(&id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!();
        println!("  {} Ticket was never assigned", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("When").fg(Color::White),
        Cell::new("Kind").fg(Color::White),
        Cell::new("From").fg(Color::White),
        Cell::new("To").fg(Color::White),
        Cell::new("Load").fg(Color::White),
        Cell::new("Strategy").fg(Color::White),
        Cell::new("Reason").fg(Color::White),
    ]);
    for record in &records {
        table.add_row(vec![
            Cell::new(record.assigned_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(record.kind),
            Cell::new(record.previous_assignee_id.as_deref().unwrap_or("-")),
            Cell::new(&record.assignee_id),
            Cell::new(record.assignee_load),
            Cell::new(record.strategy),
            Cell::new(&record.reason),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

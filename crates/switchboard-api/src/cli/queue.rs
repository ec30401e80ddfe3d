//! Queue management commands.

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use switchboard_types::ticket::{DistributionStrategy, Queue, TicketStatus};

use crate::state::AppState;

/// Create a queue.
pub async fn create_queue(
    state: &AppState,
    id: &str,
    name: Option<String>,
    strategy: &str,
    capacity: Option<u32>,
    members: Vec<String>,
    json: bool,
) -> Result<()> {
    let strategy = strategy
        .parse::<DistributionStrategy>()
        .map_err(|e| anyhow::anyhow!(e))?;
    let name = name.unwrap_or_else(|| id.to_string());
    let members = members
        .into_iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();

    let queue = state
        .router
        .create_queue(Queue::new(id, &name, strategy, capacity, members))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&queue)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Queue {} ready ({}, {} attendants)",
        style("✓").green().bold(),
        style(&queue.id).cyan().bold(),
        queue.strategy,
        queue.members.len()
    );
    println!();
    Ok(())
}

/// List queues with their waiting and in-service counts.
pub async fn list_queues(state: &AppState, json: bool) -> Result<()> {
    let queues = state.router.list_queues().await?;
    let open = state.router.list_open_tickets().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&queues)?);
        return Ok(());
    }

    if queues.is_empty() {
        println!();
        println!(
            "  {} No queues found. Create one with: {}",
            style("i").blue().bold(),
            style("swbd queue create <id> -m <attendant>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Queue").fg(Color::White),
        Cell::new("Strategy").fg(Color::White),
        Cell::new("Capacity").fg(Color::White),
        Cell::new("Attendants").fg(Color::White),
        Cell::new("Waiting").fg(Color::White),
        Cell::new("In service").fg(Color::White),
    ]);

    for queue in &queues {
        let waiting = open
            .iter()
            .filter(|t| t.queue_id == queue.id && t.status == TicketStatus::Fila)
            .count();
        let serving = open
            .iter()
            .filter(|t| t.queue_id == queue.id && t.status != TicketStatus::Fila)
            .count();
        let capacity = queue
            .capacity_per_attendant
            .map(|c| c.to_string())
            .unwrap_or_else(|| "∞".to_string());
        let waiting_cell = if waiting > 0 {
            Cell::new(waiting).fg(Color::Yellow)
        } else {
            Cell::new(waiting)
        };

        table.add_row(vec![
            Cell::new(format!("{} ({})", queue.name, queue.id)),
            Cell::new(queue.strategy.as_str()),
            Cell::new(capacity),
            Cell::new(queue.members.join(", ")),
            waiting_cell,
            Cell::new(serving),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

/// Retry assignment of every waiting ticket in a queue.
pub async fn redistribute(state: &AppState, id: &str, json: bool) -> Result<()> {
    let assigned = state.router.redistribute(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&assigned)?);
        return Ok(());
    }

    println!();
    if assigned.is_empty() {
        println!(
            "  {} No waiting ticket in {} could be assigned",
            style("i").blue().bold(),
            style(id).cyan()
        );
    } else {
        for ticket in &assigned {
            println!(
                "  {} {} → {}",
                style("✓").green(),
                ticket.id,
                style(ticket.assignee_id.as_deref().unwrap_or("-")).bold()
            );
        }
    }
    println!();
    Ok(())
}

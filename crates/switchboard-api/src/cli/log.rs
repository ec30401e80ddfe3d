//! Triage log queries.

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use switchboard_types::audit::{Direction, TriageLogEntry};

use crate::cli::parse_id;
use crate::state::AppState;

/// Print a session's path through its flow, oldest first.
pub async fn session_log(state: &AppState, id: &str, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let entries = state.logger.session_log(&id).await?;
    print_entries(&entries, false, json)
}

/// Print the latest entries of a tenant, newest first.
pub async fn tenant_log(state: &AppState, tenant: &str, limit: u32, json: bool) -> Result<()> {
    let entries = state.logger.tenant_log(tenant, limit).await?;
    print_entries(&entries, true, json)
}

fn print_entries(entries: &[TriageLogEntry], with_session: bool, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!();
        println!("  {} No log entries", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    let mut header = vec![Cell::new("Time").fg(Color::White)];
    if with_session {
        header.push(Cell::new("Session").fg(Color::White));
    }
    header.extend([
        Cell::new("Step").fg(Color::White),
        Cell::new("").fg(Color::White),
        Cell::new("Input").fg(Color::White),
        Cell::new("Matched").fg(Color::White),
    ]);
    table.set_header(header);

    for entry in entries {
        let mut row = vec![Cell::new(entry.timestamp.format("%Y-%m-%d %H:%M:%S"))];
        if with_session {
            row.push(Cell::new(entry.session_id));
        }
        let direction = match entry.direction {
            Direction::In => Cell::new("←").fg(Color::Cyan),
            Direction::Out => Cell::new("→").fg(Color::Green),
        };
        row.extend([
            Cell::new(&entry.step_id),
            direction,
            Cell::new(entry.raw_input.as_deref().unwrap_or("")),
            Cell::new(entry.matched_option.as_deref().unwrap_or("")),
        ]);
        table.add_row(row);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

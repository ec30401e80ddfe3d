//! Flow definition commands: validate, publish, show, list.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use switchboard_core::flow::document::FlowDocument;
use switchboard_core::flow::validate::validate_flow;
use switchboard_types::flow::{FlowDefinition, OptionAction};

use crate::state::AppState;

async fn read_document(file: &Path) -> Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))
}

/// Parse and validate a document without touching storage.
pub async fn validate(file: &Path, json: bool) -> Result<()> {
    let text = read_document(file).await?;
    let flow_id = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "flow".to_string());

    let definition = FlowDocument::parse(&text)?.into_definition(&flow_id)?;
    let report = validate_flow(&definition)?;

    if json {
        let out = serde_json::json!({
            "valid": true,
            "initial_step": definition.initial_step,
            "steps": definition.steps.len(),
            "unreachable": report.unreachable,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} is valid ({} steps, starts at {})",
        style("✓").green().bold(),
        style(file.display()).cyan(),
        definition.steps.len(),
        style(&definition.initial_step).bold()
    );
    if !report.unreachable.is_empty() {
        println!(
            "  {} Unreachable steps: {}",
            style("!").yellow().bold(),
            report.unreachable.join(", ")
        );
    }
    println!();
    Ok(())
}

/// Publish a document as the next version of `flow_id`.
pub async fn publish(state: &AppState, flow_id: &str, file: &Path, json: bool) -> Result<()> {
    let text = read_document(file).await?;
    let flow = state.flows.publish_document(flow_id, &text).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(flow.as_ref())?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Published {} version {}",
        style("✓").green().bold(),
        style(&flow.id).cyan().bold(),
        style(flow.version).bold()
    );
    println!();
    Ok(())
}

/// Show one version of a flow, the latest unless `version` is given.
pub async fn show(state: &AppState, flow_id: &str, version: Option<u32>, json: bool) -> Result<()> {
    let flow = match version {
        Some(v) => state.flows.get_version(flow_id, v).await?,
        None => state.flows.get_latest(flow_id).await?,
    };
    let Some(flow) = flow else {
        anyhow::bail!("flow '{flow_id}' has no such version");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(flow.as_ref())?);
        return Ok(());
    }

    print_flow(&flow);
    Ok(())
}

fn print_flow(flow: &FlowDefinition) {
    println!();
    println!(
        "  {} v{}  {}",
        style(&flow.id).cyan().bold(),
        flow.version,
        style(format!("initial step: {}", flow.initial_step)).dim()
    );
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Step").fg(Color::White),
        Cell::new("Kind").fg(Color::White),
        Cell::new("Options").fg(Color::White),
    ]);

    for step in flow.steps.values() {
        let options = match &step.capture {
            Some(capture) => format!(
                "{{{}}} → {}",
                capture.variable,
                describe_goto(&capture.next_step, capture.branches.len())
            ),
            None => step
                .options
                .iter()
                .map(|o| format!("{} → {}", o.match_value, describe_action(&o.action)))
                .collect::<Vec<_>>()
                .join("\n"),
        };
        table.add_row(vec![
            Cell::new(&step.id),
            Cell::new(step.kind.to_string()),
            Cell::new(options),
        ]);
    }

    println!("{table}");
    println!();
}

fn describe_action(action: &OptionAction) -> String {
    match action {
        OptionAction::Goto {
            next_step,
            branches,
        } => describe_goto(next_step, branches.len()),
        OptionAction::TransferQueue { target } => match &target.queue_id {
            Some(queue) => format!("queue {queue}"),
            None => format!("queue from '{}'", target.context_key()),
        },
        OptionAction::Finish { .. } => "finish".to_string(),
    }
}

fn describe_goto(next_step: &str, branches: usize) -> String {
    match branches {
        0 => next_step.to_string(),
        n => format!("{next_step} (or {n} conditional)"),
    }
}

/// List every flow with its versions.
pub async fn list(state: &AppState, json: bool) -> Result<()> {
    let mut rows = Vec::new();
    for flow_id in state.flows.list_flows().await? {
        let versions = state.flows.list_versions(&flow_id).await?;
        rows.push((flow_id, versions));
    }

    if json {
        let out: Vec<_> = rows
            .iter()
            .map(|(id, versions)| serde_json::json!({ "id": id, "versions": versions }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!();
        println!(
            "  {} No flows published. Publish one with: {}",
            style("i").blue().bold(),
            style("swbd flow publish <id> <file>").yellow()
        );
        println!();
        return Ok(());
    }

    let default_flow = state.flows.default_flow_id();
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Flow").fg(Color::White),
        Cell::new("Latest").fg(Color::White),
        Cell::new("Versions").fg(Color::White),
    ]);
    for (id, versions) in &rows {
        let name = if default_flow == Some(id.as_str()) {
            Cell::new(format!("{id} (default)")).fg(Color::Cyan)
        } else {
            Cell::new(id)
        };
        let latest = versions.iter().max().map(|v| v.to_string()).unwrap_or_default();
        table.add_row(vec![name, Cell::new(latest), Cell::new(versions.len())]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

//! Switchboard CLI and REST API entry point.
//!
//! Binary name: `swbd`
//!
//! Parses CLI arguments, initializes storage and services, then dispatches
//! to the appropriate command handler or starts the webhook and REST API
//! server together with the escalation and inactivity monitors.

mod backend;
mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands, FlowCommand, LogCommand, QueueCommand, TicketCommand};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let otel = matches!(cli.command, Commands::Serve { otel: true, .. });
    switchboard_observe::tracing_setup::init_tracing(
        switchboard_observe::tracing_setup::filter_for(cli.quiet, cli.verbose),
        otel,
    )
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions and offline validation don't need app state
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(*shell, &mut cmd, "swbd", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Flow {
            command: FlowCommand::Validate { file },
        } => {
            return cli::flow::validate(file, cli.json).await;
        }
        _ => {}
    }

    let memory = matches!(cli.command, Commands::Serve { memory: true, .. });
    let state = AppState::init(memory).await?;

    match cli.command {
        Commands::Serve { port, host, .. } => {
            serve(state, &host, port).await?;
        }

        Commands::Flow { command } => match command {
            FlowCommand::Validate { .. } => unreachable!("handled above"),
            FlowCommand::Publish { id, file } => {
                cli::flow::publish(&state, &id, &file, cli.json).await?;
            }
            FlowCommand::Show { id, revision } => {
                cli::flow::show(&state, &id, revision, cli.json).await?;
            }
            FlowCommand::List => {
                cli::flow::list(&state, cli.json).await?;
            }
        },

        Commands::Queue { command } => match command {
            QueueCommand::Create {
                id,
                name,
                strategy,
                capacity,
                members,
            } => {
                cli::queue::create_queue(&state, &id, name, &strategy, capacity, members, cli.json)
                    .await?;
            }
            QueueCommand::List => {
                cli::queue::list_queues(&state, cli.json).await?;
            }
            QueueCommand::Redistribute { id } => {
                cli::queue::redistribute(&state, &id, cli.json).await?;
            }
        },

        Commands::Ticket { command } => match command {
            TicketCommand::Show { id } => {
                cli::ticket::show_ticket(&state, &id, cli.json).await?;
            }
            TicketCommand::List { queue } => {
                cli::ticket::list_tickets(&state, queue.as_deref(), cli.json).await?;
            }
            TicketCommand::Close { id, reason } => {
                cli::ticket::close_ticket(&state, &id, &reason, cli.json).await?;
            }
            TicketCommand::Status { id, status } => {
                cli::ticket::set_status(&state, &id, &status, cli.json).await?;
            }
            TicketCommand::Reassign {
                id,
                attendant,
                reason,
            } => {
                cli::ticket::reassign(&state, &id, &attendant, &reason, cli.json).await?;
            }
            TicketCommand::History { id } => {
                cli::ticket::history(&state, &id, cli.json).await?;
            }
        },

        Commands::Log { command } => match command {
            LogCommand::Session { id } => {
                cli::log::session_log(&state, &id, cli.json).await?;
            }
            LogCommand::Tenant { tenant, limit } => {
                cli::log::tenant_log(&state, &tenant, limit, cli.json).await?;
            }
        },

        Commands::Send {
            contact,
            text,
            channel,
            tenant,
            flow,
        } => {
            cli::triage::send(&state, &contact, &text, &channel, tenant, flow, cli.json).await?;
        }

        Commands::Sweep => {
            cli::triage::sweep(&state, cli.json).await?;
        }

        Commands::Status => {
            cli::status::status(&state, cli.json).await?;
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Run the HTTP server and background monitors until a shutdown signal.
async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let (sessions, tickets, slas) = state.hydrate().await?;

    let cancel = CancellationToken::new();
    let escalation = std::sync::Arc::clone(&state.escalation).spawn(cancel.clone());
    let reaper = std::sync::Arc::clone(&state.reaper).spawn(cancel.clone());

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!();
    println!(
        "  {} Switchboard listening on {}",
        console::style("⚡").bold(),
        console::style(format!("http://{addr}")).cyan()
    );
    println!(
        "  {}",
        console::style(format!(
            "storage: {}, outbound: {}, tracking {sessions} sessions, {slas} SLAs, {tickets} tickets",
            state.backend,
            state.sender.transport()
        ))
        .dim()
    );
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    let router = http::router::build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = tokio::join!(escalation, reaper);
    switchboard_observe::tracing_setup::shutdown_tracing();

    println!("\n  Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

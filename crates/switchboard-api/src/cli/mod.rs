//! CLI command definitions and dispatch for the `swbd` binary.
//!
//! Uses clap derive macros for argument parsing. Commands are grouped by
//! noun (`swbd flow publish`, `swbd queue list`, `swbd ticket close`).

pub mod flow;
pub mod log;
pub mod queue;
pub mod status;
pub mod ticket;
pub mod triage;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Conversational triage and ticket distribution.
#[derive(Parser)]
#[command(name = "swbd", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the inbound webhook and REST API server.
    Serve {
        /// Port to listen on.
        #[arg(long, short, default_value = "7770", env = "SWITCHBOARD_PORT")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1", env = "SWITCHBOARD_HOST")]
        host: String,

        /// Keep all state in memory; nothing survives a restart.
        #[arg(long)]
        memory: bool,

        /// Export spans through OpenTelemetry (stdout exporter).
        #[arg(long)]
        otel: bool,
    },

    /// Manage flow definitions.
    Flow {
        #[command(subcommand)]
        command: FlowCommand,
    },

    /// Manage queues.
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },

    /// Inspect and update tickets.
    Ticket {
        #[command(subcommand)]
        command: TicketCommand,
    },

    /// Read the triage log.
    Log {
        #[command(subcommand)]
        command: LogCommand,
    },

    /// Feed one inbound message through the triage engine.
    Send {
        /// Contact the message comes from.
        contact: String,

        /// Message text.
        text: String,

        /// Channel name recorded on a new session.
        #[arg(long, default_value = "cli")]
        channel: String,

        /// Tenant of the contact.
        #[arg(long)]
        tenant: Option<String>,

        /// Flow to start when the contact has no active session.
        #[arg(long)]
        flow: Option<String>,
    },

    /// Run one escalation and inactivity pass, then exit.
    Sweep,

    /// Show counts of flows, queues, sessions and open tickets.
    Status,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum FlowCommand {
    /// Check a flow document without publishing it.
    Validate {
        /// Path to a JSON or YAML flow document.
        file: PathBuf,
    },

    /// Publish a flow document as the next version of a flow.
    Publish {
        /// Flow id.
        id: String,

        /// Path to a JSON or YAML flow document.
        file: PathBuf,
    },

    /// Show a flow version (latest by default).
    Show {
        /// Flow id.
        id: String,

        /// Exact version number.
        #[arg(long = "rev")]
        revision: Option<u32>,
    },

    /// List flows and their published versions.
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand)]
pub enum QueueCommand {
    /// Create a queue.
    Create {
        /// Queue id.
        id: String,

        /// Display name (defaults to the id).
        #[arg(long)]
        name: Option<String>,

        /// Distribution strategy: round_robin, least_load or priority.
        #[arg(long, default_value = "round_robin")]
        strategy: String,

        /// Maximum open tickets per attendant.
        #[arg(long)]
        capacity: Option<u32>,

        /// Attendant ids, in rotation order.
        #[arg(long = "member", short = 'm', value_delimiter = ',')]
        members: Vec<String>,
    },

    /// List queues.
    #[command(alias = "ls")]
    List,

    /// Offer waiting tickets of a queue to its attendants again.
    Redistribute {
        /// Queue id.
        id: String,
    },
}

#[derive(Subcommand)]
pub enum TicketCommand {
    /// Show a ticket with its SLA position.
    Show {
        /// Ticket id.
        id: String,
    },

    /// List open tickets.
    #[command(alias = "ls")]
    List {
        /// Only tickets of this queue.
        #[arg(long)]
        queue: Option<String>,
    },

    /// Close a ticket.
    Close {
        /// Ticket id.
        id: String,

        /// Closing reason recorded on the ticket event.
        #[arg(long, default_value = "manual")]
        reason: String,
    },

    /// Move a ticket to another status (FILA, EM_ATENDIMENTO, ENVIO_ATIVO, ENCERRADO).
    Status {
        /// Ticket id.
        id: String,

        /// Target status.
        status: String,
    },

    /// Hand a ticket to another member of its queue.
    Reassign {
        /// Ticket id.
        id: String,

        /// Attendant id; must be a queue member with free capacity.
        attendant: String,

        /// Reason recorded in the distribution log.
        #[arg(long, default_value = "manual")]
        reason: String,
    },

    /// Show the distribution log of a ticket.
    History {
        /// Ticket id.
        id: String,
    },
}

#[derive(Subcommand)]
pub enum LogCommand {
    /// Entries of one session, oldest first.
    Session {
        /// Session id.
        id: String,
    },

    /// Latest entries of a tenant, newest first.
    Tenant {
        /// Tenant id.
        tenant: String,

        /// Maximum entries.
        #[arg(long, default_value = "50")]
        limit: u32,
    },
}

/// Parse a UUID argument with a readable error.
pub fn parse_id(raw: &str) -> anyhow::Result<uuid::Uuid> {
    uuid::Uuid::parse_str(raw.trim()).map_err(|_| anyhow::anyhow!("'{raw}' is not a valid id"))
}

//! Infrastructure layer for Switchboard.
//!
//! Contains implementations of the ports defined in `switchboard-core`:
//! SQLite storage for flows, sessions, tickets and the triage log, the
//! outbound channel senders, the `config.toml` loader and inbound webhook
//! signature verification (HMAC-SHA256).

pub mod channel;
pub mod config;
pub mod sqlite;
pub mod webhook;

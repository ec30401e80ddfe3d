//! Shared domain types for Switchboard.
//!
//! This crate contains the data model for conversation flows, triage
//! sessions, tickets, queues and the audit trail, together with the
//! error enums and configuration shared by every other crate. No I/O.

pub mod audit;
pub mod config;
pub mod error;
pub mod event;
pub mod flow;
pub mod message;
pub mod session;
pub mod ticket;

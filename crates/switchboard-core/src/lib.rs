//! Triage engine, ticket routing and repository trait definitions for Switchboard.
//!
//! This crate defines the "ports" (repository traits and the outbound
//! channel sender) that the infrastructure layer implements, plus every
//! piece of conversation and ticket logic. It depends only on
//! `switchboard-types`, never on `switchboard-infra` or any database/IO crate.

pub mod channel;
pub mod event;
pub mod flow;
pub mod monitor;
pub mod repository;
pub mod retry;
pub mod routing;
pub mod runtime;
pub mod session;
pub mod triage;

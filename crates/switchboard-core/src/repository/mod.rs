//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (switchboard-infra) implements. Every mutable record carries a version
//! and is written through compare-and-swap, so implementations only need
//! per-key atomic read-modify-write. [`memory`] holds the in-process
//! implementation used by tests and `serve --memory`.

pub mod flow;
pub mod memory;
pub mod session;
pub mod ticket;
pub mod triage_log;

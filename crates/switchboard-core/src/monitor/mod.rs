//! Background monitors: SLA escalation and inactivity reaping, both driven
//! by the in-memory [`DeadlineIndex`].

pub mod deadline;
pub mod escalation;
pub mod reaper;

pub use deadline::DeadlineIndex;
pub use escalation::EscalationMonitor;
pub use reaper::{InactivityReaper, ReapReport};

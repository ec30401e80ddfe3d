//! Event distribution for triage and ticket lifecycle changes.

pub mod bus;

pub use bus::EventBus;

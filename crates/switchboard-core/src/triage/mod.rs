//! Conversation handling: interpretation, templates, transition
//! application, audit logging and the engine that ties them together.

pub mod engine;
pub mod error;
pub(crate) mod executor;
pub mod interpreter;
pub mod logger;
pub mod template;

pub use engine::{EngineSettings, Outcome, Reply, TriageEngine, message_key};
pub use error::EngineError;
pub use logger::TriageLogger;

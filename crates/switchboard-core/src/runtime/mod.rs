//! Inbound message runtime.

pub mod dispatcher;

pub use dispatcher::{ContactDispatcher, DispatchError, InboundHandler};

//! Session persistence with optimistic concurrency.

pub mod store;

pub use store::{Mutation, OpenedSession, SessionStore};

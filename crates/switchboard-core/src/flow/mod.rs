//! Flow definitions: document import, validation and the versioned store.

pub mod document;
pub mod store;
pub mod validate;

pub use store::FlowDefinitionStore;

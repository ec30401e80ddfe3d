//! Ticket routing: queue strategies, ticket lifecycle and SLA classification.

pub mod router;
pub mod sla;
pub mod strategy;

pub use router::{RouteRequest, TicketRouter};

//! HTTP/REST API layer for Switchboard.
//!
//! Axum-based API at `/api/v1/`: the signed inbound webhook that feeds the
//! triage engine, plus administration of flows, queues and tickets. All
//! responses use the envelope format.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;

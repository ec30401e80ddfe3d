//! Ticket and queue repository trait definition.

use std::collections::HashMap;

use switchboard_types::error::RepositoryError;
use switchboard_types::ticket::{AssignmentRecord, Queue, Ticket};
use uuid::Uuid;

/// Storage for queues and tickets.
///
/// Covers two entity families:
/// - **Queues:** roster, strategy and the round-robin cursor.
/// - **Tickets:** lifecycle records, written through compare-and-swap,
///   plus their append-only assignment history.
///
/// [`commit_assignment`](TicketRepository::commit_assignment) is the only
/// operation touching both, and must be atomic.
pub trait TicketRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Queues
    // -----------------------------------------------------------------------

    /// Insert or replace a queue definition.
    fn save_queue(
        &self,
        queue: &Queue,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_queue(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Queue>, RepositoryError>> + Send;

    fn list_queues(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Queue>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Tickets
    // -----------------------------------------------------------------------

    fn create_ticket(
        &self,
        ticket: &Ticket,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_ticket(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Ticket>, RepositoryError>> + Send;

    /// The non-closed ticket created from a triage session, if any.
    fn find_open_by_session(
        &self,
        session_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Ticket>, RepositoryError>> + Send;

    /// Same contract as the session CAS: `StaleVersion` on mismatch.
    fn compare_and_swap_ticket(
        &self,
        ticket: &Ticket,
        expected_version: u64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Every ticket not in `ENCERRADO`.
    fn list_open_tickets(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Ticket>, RepositoryError>> + Send;

    /// Tickets in `FILA` for a queue, oldest first.
    fn list_queued(
        &self,
        queue_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Ticket>, RepositoryError>> + Send;

    /// Non-terminal ticket count per assignee within a queue.
    fn active_load(
        &self,
        queue_id: &str,
    ) -> impl std::future::Future<Output = Result<HashMap<String, u32>, RepositoryError>> + Send;

    /// Atomically write the advanced queue (cursor, version) and the assigned
    /// ticket. Fails with `StaleVersion` without writing anything if either
    /// stored version differs from the expected one.
    fn commit_assignment(
        &self,
        queue: &Queue,
        expected_queue_version: u64,
        ticket: &Ticket,
        expected_ticket_version: u64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Assignment log
    // -----------------------------------------------------------------------

    fn append_assignment(
        &self,
        record: &AssignmentRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Assignments of a ticket, oldest first.
    fn list_assignments(
        &self,
        ticket_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<AssignmentRecord>, RepositoryError>> + Send;
}

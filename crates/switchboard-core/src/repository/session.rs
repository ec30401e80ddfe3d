//! Session repository trait definition.

use chrono::{DateTime, Utc};
use switchboard_types::error::RepositoryError;
use switchboard_types::session::Session;
use uuid::Uuid;

/// Durable per-contact session records.
///
/// Implementations must enforce at most one non-terminal session per
/// `contact_id` and apply updates only through [`compare_and_swap`].
///
/// [`compare_and_swap`]: SessionRepository::compare_and_swap
pub trait SessionRepository: Send + Sync {
    /// Insert a new session. `Conflict` while the contact already has an
    /// active session.
    fn insert_session(
        &self,
        session: &Session,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_session(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Session>, RepositoryError>> + Send;

    /// The contact's non-terminal session, if any.
    fn get_active_session(
        &self,
        contact_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Session>, RepositoryError>> + Send;

    /// Replace the stored record with `session` if the stored version equals
    /// `expected_version`. `session.version` must already be bumped.
    ///
    /// Fails with `StaleVersion` on mismatch and `NotFound` for unknown ids.
    fn compare_and_swap(
        &self,
        session: &Session,
        expected_version: u64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Every non-terminal session (used to hydrate the reaper's working set).
    fn list_active_sessions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Session>, RepositoryError>> + Send;

    /// Whether `message_key` was already applied for `contact_id`, in this
    /// session or an earlier one.
    fn message_applied(
        &self,
        contact_id: &str,
        message_key: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Remember an applied message key. Only the newest `keep` keys per
    /// contact are retained; recording a known key is a no-op.
    fn record_applied_message(
        &self,
        contact_id: &str,
        message_key: &str,
        applied_at: DateTime<Utc>,
        keep: usize,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

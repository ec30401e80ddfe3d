//! Triage audit log repository trait definition.

use switchboard_types::audit::TriageLogEntry;
use switchboard_types::error::RepositoryError;
use uuid::Uuid;

/// Append-only store for [`TriageLogEntry`] rows.
pub trait TriageLogRepository: Send + Sync {
    fn append(
        &self,
        entry: &TriageLogEntry,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// A session's entries in the order they were recorded.
    fn list_by_session(
        &self,
        session_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<TriageLogEntry>, RepositoryError>> + Send;

    /// Most recent entries for a tenant, newest first.
    fn list_by_tenant(
        &self,
        tenant_id: &str,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<TriageLogEntry>, RepositoryError>> + Send;
}

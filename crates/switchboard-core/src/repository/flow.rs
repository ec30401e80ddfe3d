//! Flow repository trait definition.

use switchboard_types::error::RepositoryError;
use switchboard_types::flow::FlowDefinition;

/// Storage for published flow versions.
///
/// Versions are immutable: `save_version` never overwrites.
pub trait FlowRepository: Send + Sync {
    /// Insert a new version. `Conflict` if `(id, version)` already exists.
    fn save_version(
        &self,
        flow: &FlowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_version(
        &self,
        flow_id: &str,
        version: u32,
    ) -> impl std::future::Future<Output = Result<Option<FlowDefinition>, RepositoryError>> + Send;

    /// Highest published version of a flow.
    fn get_latest(
        &self,
        flow_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<FlowDefinition>, RepositoryError>> + Send;

    /// Published version numbers of a flow, ascending.
    fn list_versions(
        &self,
        flow_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<u32>, RepositoryError>> + Send;

    /// Distinct flow ids, sorted.
    fn list_flows(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<String>, RepositoryError>> + Send;
}
